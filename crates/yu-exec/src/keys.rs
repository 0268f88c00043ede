//! SSH key management and resolution

use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Where a node's private key comes from
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Explicit path to key file
    Path(PathBuf),
    /// Base64-encoded key from environment
    Env(String),
}

impl KeySource {
    /// Resolve key source to a key file on disk
    ///
    /// For `Env`, decodes base64 and writes to a temp file that lives as long as the
    /// returned `ResolvedKey`.
    ///
    /// # Errors
    /// Returns `KeyError` if the key file is missing or the environment variable is
    /// unset or not valid base64
    pub fn resolve(&self) -> Result<ResolvedKey, KeyError> {
        match self {
            KeySource::Path(path) => {
                if !path.is_file() {
                    return Err(KeyError::NotFound(path.display().to_string()));
                }
                check_key_permissions(path)?;
                Ok(ResolvedKey::Path(path.clone()))
            }
            KeySource::Env(var_name) => {
                let base64_key =
                    env::var(var_name).map_err(|_| KeyError::EnvNotSet(var_name.clone()))?;
                let key_data = base64_decode(&base64_key).map_err(|_| KeyError::InvalidBase64)?;

                Ok(ResolvedKey::Temp(write_temp_key(&key_data)?))
            }
        }
    }
}

/// Resolved key location
#[derive(Debug)]
pub enum ResolvedKey {
    /// Path to key file
    Path(PathBuf),
    /// Private temporary copy, removed when dropped
    Temp(NamedTempFile),
}

impl ResolvedKey {
    /// Path handed to the SSH library
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ResolvedKey::Path(p) => p,
            ResolvedKey::Temp(file) => file.path(),
        }
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("{0} is not a valid key")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

/// Warn when group/other can read the key; the SSH library loads it regardless
fn check_key_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();
    if mode & 0o77 != 0 {
        warn!(path = %path.display(), mode = format!("{mode:o}"), "key file permissions too open (should be 600)");
    }
    Ok(())
}

/// Each call gets its own 0600 file, so holders never share a path
fn write_temp_key(key_data: &[u8]) -> Result<NamedTempFile, KeyError> {
    let mut file = tempfile::Builder::new().prefix("yu_ssh_key_").tempfile()?;
    file.write_all(key_data)?;
    file.flush()?;

    debug!(path = %file.path().display(), "wrote temporary SSH key");
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_file() {
        let source = KeySource::Path(PathBuf::from("/nonexistent/id_ed25519"));
        let err = source.resolve().unwrap_err();
        assert!(matches!(err, KeyError::NotFound(_)));
        assert!(err.to_string().contains("is not a valid key"));
    }

    #[test]
    fn test_existing_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("id_ed25519");
        std::fs::write(&key_path, b"not really a key").unwrap();

        let resolved = KeySource::Path(key_path.clone()).resolve().unwrap();
        assert_eq!(resolved.path(), key_path.as_path());
    }

    #[test]
    fn test_env_not_set() {
        let source = KeySource::Env("YU_TEST_KEY_THAT_IS_NEVER_SET".to_string());
        assert!(matches!(source.resolve(), Err(KeyError::EnvNotSet(_))));
    }

    #[test]
    fn test_base64_decode_trims() {
        assert_eq!(base64_decode("aGVsbG8=\n").unwrap(), b"hello");
        assert!(base64_decode("!!!").is_err());
    }

    #[test]
    fn test_env_key_copies_are_independent() {
        let var = "YU_TEST_KEY_INDEPENDENT_COPIES";
        // SAFETY: no other test reads or writes this variable
        unsafe { std::env::set_var(var, "a2V5IGRhdGE=") };

        let source = KeySource::Env(var.to_string());
        let first = source.resolve().unwrap();
        let second = source.resolve().unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(std::fs::read(second.path()).unwrap(), b"key data");

        let first_path = first.path().to_path_buf();
        drop(first);
        assert!(!first_path.exists());
        assert!(second.path().is_file());
    }

    #[test]
    fn test_temp_key_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let file = write_temp_key(b"secret").unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
