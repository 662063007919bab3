//! Built-in secret backends.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::{SecretError, SecretReference};
use crate::ports::SecretResolver;

/// `ref+echo://<value>[#<fragment>]` resolves to `<value>[#<fragment>]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoResolver;

#[async_trait]
impl SecretResolver for EchoResolver {
    fn scheme(&self) -> &str {
        "echo"
    }

    async fn resolve(&self, reference: &SecretReference) -> Result<String, SecretError> {
        Ok(match &reference.fragment {
            Some(fragment) => format!("{}#{fragment}", reference.location),
            None => reference.location.clone(),
        })
    }
}

/// `ref+file://<path>[#<json-pointer>]`
///
/// Reads the file and strips one trailing newline. With a fragment the file
/// is parsed as JSON and the fragment is used as a JSON pointer.
#[derive(Debug, Clone, Default)]
pub struct FileResolver {
    base_dir: Option<PathBuf>,
}

impl FileResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative locations against `dir`.
    #[must_use]
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }

    fn path_for(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn backend_error(reference: &SecretReference, message: impl Into<String>) -> SecretError {
    SecretError::Backend {
        scheme: reference.scheme.clone(),
        location: reference.location.clone(),
        message: message.into(),
    }
}

#[async_trait]
impl SecretResolver for FileResolver {
    fn scheme(&self) -> &str {
        "file"
    }

    async fn resolve(&self, reference: &SecretReference) -> Result<String, SecretError> {
        let path = self.path_for(&reference.location);
        debug!(path = %path.display(), "reading secret file");
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| backend_error(reference, e.to_string()))?;

        let Some(fragment) = &reference.fragment else {
            let trimmed = contents
                .strip_suffix('\n')
                .map(|s| s.strip_suffix('\r').unwrap_or(s))
                .unwrap_or(&contents);
            return Ok(trimmed.to_string());
        };

        let document: serde_json::Value = serde_json::from_str(&contents)
            .map_err(|e| backend_error(reference, format!("not JSON: {e}")))?;
        let pointer = if fragment.starts_with('/') {
            fragment.clone()
        } else {
            format!("/{fragment}")
        };
        match document.pointer(&pointer) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(backend_error(reference, format!("no member at {pointer}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(s: &str) -> SecretReference {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_echo() {
        let r = EchoResolver;
        assert_eq!(r.resolve(&reference("ref+echo://hunter2")).await.unwrap(), "hunter2");
        assert_eq!(r.resolve(&reference("ref+echo://a#b")).await.unwrap(), "a#b");
    }

    #[tokio::test]
    async fn test_file_plain_and_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token"), "s3cret\n").unwrap();
        std::fs::write(
            dir.path().join("db.json"),
            r#"{"password":"pw","port":5432,"nested":{"user":"app"}}"#,
        )
        .unwrap();

        let r = FileResolver::with_base_dir(dir.path());
        assert_eq!(r.resolve(&reference("ref+file://token")).await.unwrap(), "s3cret");
        assert_eq!(r.resolve(&reference("ref+file://db.json#password")).await.unwrap(), "pw");
        assert_eq!(r.resolve(&reference("ref+file://db.json#port")).await.unwrap(), "5432");
        assert_eq!(
            r.resolve(&reference("ref+file://db.json#/nested/user")).await.unwrap(),
            "app"
        );
    }

    #[tokio::test]
    async fn test_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("db.json"), r#"{"password":"pw"}"#).unwrap();
        let r = FileResolver::with_base_dir(dir.path());

        assert!(matches!(
            r.resolve(&reference("ref+file://missing")).await,
            Err(SecretError::Backend { .. })
        ));
        assert!(matches!(
            r.resolve(&reference("ref+file://db.json#user")).await,
            Err(SecretError::Backend { .. })
        ));
    }
}
