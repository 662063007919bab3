//! wellknown-check: configuration drift checks for CI.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use mesh_bus::{FileKvStore, InMemoryKvStore, KeyValueStore};
use mesh_telemetry::{init_logging, TelemetryConfig};
use tracing::{error, info};

use wellknown_check::{load_fields, Args, Checker};

const REGISTRY_DIR_ENV: &str = "MESH_REGISTRY_DIR";

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if !args.has_action() {
        let _ = Args::command().print_help();
        eprintln!("\nerror: at least one of --schema-dump, --check-deps, --check-consumers, --self is required");
        return ExitCode::from(2);
    }

    // Logs go to stderr; stdout carries the reports.
    let telemetry = TelemetryConfig {
        log_level: std::env::var("MESH_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string()),
        ..TelemetryConfig::for_service("wellknown-check")
    };
    if let Err(e) = init_logging(&telemetry) {
        eprintln!("warning: logging disabled: {e}");
    }

    match run(&args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Run every requested action. `Ok(false)` when any of them failed.
async fn run(args: &Args) -> Result<bool> {
    let store = open_registry(args).await?;
    let checker = Checker::new(store, args.timeout);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    // --check-consumers alone only needs the identity.
    let needs_current =
        args.schema_dump || args.self_check || args.check_deps || args.repo.is_none();
    let current = if needs_current {
        Some(
            checker
                .current(args.schema.as_deref(), args.repo.as_ref())
                .await
                .context("loading current schema")?,
        )
    } else {
        None
    };

    let mut passed = true;
    let mut record = |action: &str, result: Result<bool, wellknown_check::CheckError>| {
        match result {
            Ok(true) => info!(action, "Check passed"),
            Ok(false) => {
                error!(action, "Check failed");
                passed = false;
            }
            Err(e) => {
                error!(action, error = %e, "Check could not run");
                eprintln!("error: {action}: {e}");
                passed = false;
            }
        }
    };

    if let Some(current) = &current {
        if args.schema_dump {
            record("schema-dump", checker.schema_dump(current, &mut out));
        }
        if args.self_check {
            let result = match &args.pr_schema {
                Some(path) => load_fields(path).and_then(|candidate| {
                    checker.self_check(current, Some(&candidate), args.allow_breaking, &mut out)
                }),
                None => checker.self_check(current, None, args.allow_breaking, &mut out),
            };
            record("self", result);
        }
        if args.check_deps {
            record("check-deps", checker.check_deps(&current.fields, &mut out).await);
        }
    }
    if args.check_consumers {
        let identity = args
            .repo
            .as_ref()
            .or_else(|| current.as_ref().map(|c| c.identity()));
        if let Some(identity) = identity {
            record(
                "check-consumers",
                checker.check_consumers(identity, &mut out).await,
            );
        }
    }

    out.flush()?;
    Ok(passed)
}

async fn open_registry(args: &Args) -> Result<Arc<dyn KeyValueStore>> {
    let dir = args
        .registry_dir
        .clone()
        .or_else(|| std::env::var_os(REGISTRY_DIR_ENV).map(PathBuf::from));
    match dir {
        Some(dir) => {
            let store = FileKvStore::open(dir.clone())
                .await
                .with_context(|| format!("opening registry at {}", dir.display()))?;
            Ok(Arc::new(store))
        }
        None if args.needs_registry() => {
            bail!("no registry: pass --registry-dir or set {REGISTRY_DIR_ENV}")
        }
        None => Ok(Arc::new(InMemoryKvStore::new())),
    }
}
