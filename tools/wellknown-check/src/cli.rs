//! Command-line arguments.

use clap::Parser;
use mesh_types::ServiceIdentity;
use std::path::PathBuf;
use std::time::Duration;

/// wellknown-check: configuration drift checks for CI
#[derive(Parser, Debug, Clone)]
#[command(name = "wellknown-check")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Print the current service registration as JSON
    #[arg(long)]
    pub schema_dump: bool,

    /// Check that every declared dependency has a live instance
    #[arg(long)]
    pub check_deps: bool,

    /// List services that depend on this one
    #[arg(long)]
    pub check_consumers: bool,

    /// Diff this service's schema against --pr-schema
    #[arg(long = "self")]
    pub self_check: bool,

    /// Candidate schema (registration JSON or a bare field list)
    #[arg(long, value_name = "PATH")]
    pub pr_schema: Option<PathBuf>,

    /// Service identity (org/repo)
    #[arg(long, value_name = "ORG/REPO")]
    pub repo: Option<ServiceIdentity>,

    /// Timeout for registry operations (e.g. 500ms, 10s, 2m)
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Current schema file; defaults to the live registration of --repo
    #[arg(long, value_name = "PATH")]
    pub schema: Option<PathBuf>,

    /// Directory-backed registry (falls back to MESH_REGISTRY_DIR)
    #[arg(long, value_name = "PATH")]
    pub registry_dir: Option<PathBuf>,

    /// Exit 0 from --self even when the diff is breaking
    #[arg(long)]
    pub allow_breaking: bool,
}

impl Args {
    /// Whether any action flag was given.
    #[must_use]
    pub fn has_action(&self) -> bool {
        self.schema_dump || self.check_deps || self.check_consumers || self.self_check
    }

    /// Whether the requested actions read the live registry.
    #[must_use]
    pub fn needs_registry(&self) -> bool {
        self.check_deps || self.check_consumers || (self.has_action() && self.schema.is_none())
    }
}

/// Parse `500ms`, `10s`, `2m`, `1h`; a bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {s:?}"))?;
    let duration = match unit {
        "" | "s" => Duration::from_secs(value),
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(3600)),
        other => return Err(format!("unknown duration unit {other:?} (use ms, s, m, h)")),
    };
    if duration.is_zero() {
        return Err("duration must be non-zero".to_string());
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("7"), Ok(Duration::from_secs(7)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("3d").is_err());
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "wellknown-check",
            "--self",
            "--check-deps",
            "--pr-schema",
            "pr.json",
            "--repo",
            "org/api",
            "--timeout",
            "3s",
        ])
        .unwrap();
        assert!(args.self_check && args.check_deps);
        assert!(!args.schema_dump && !args.check_consumers);
        assert_eq!(args.repo.unwrap().to_string(), "org/api");
        assert_eq!(args.timeout, Duration::from_secs(3));
        assert_eq!(args.pr_schema, Some(PathBuf::from("pr.json")));
    }

    #[test]
    fn test_needs_registry() {
        let args = Args::try_parse_from(["wellknown-check"]).unwrap();
        assert!(!args.has_action());
        assert!(!args.needs_registry());

        let args =
            Args::try_parse_from(["wellknown-check", "--self", "--schema", "cur.json"]).unwrap();
        assert!(!args.needs_registry());

        let args = Args::try_parse_from(["wellknown-check", "--schema-dump", "--repo", "o/r"])
            .unwrap();
        assert!(args.needs_registry());
    }

    #[test]
    fn test_bad_repo_rejected() {
        assert!(Args::try_parse_from(["wellknown-check", "--repo", "not-a-repo"]).is_err());
    }
}
