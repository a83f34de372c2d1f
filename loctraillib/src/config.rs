//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or none at all) is valid:
//!
//! ```toml
//! workspace_root = "/var/lib/loctrail/repos"
//! max_blob_bytes = 1048576
//!
//! [retry]
//! max_retries = 5
//! cool_down = 600      # seconds
//!
//! [policy]
//! exclude_globs = ["**/generated/**"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analysis::{CommitAnalyzer, DEFAULT_MAX_BLOB_BYTES};
use crate::classify::ClassificationPolicy;
use crate::error::LoctrailError;
use crate::ledger::RetryPolicy;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parent directory of all working copies; relative paths are resolved
    /// against the data directory
    pub workspace_root: PathBuf,
    /// Blobs above this size are not counted
    pub max_blob_bytes: u64,
    pub retry: RetryPolicy,
    pub policy: ClassificationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("repos"),
            max_blob_bytes: DEFAULT_MAX_BLOB_BYTES,
            retry: RetryPolicy::default(),
            policy: ClassificationPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_error = |message: String| LoctrailError::Config {
            path: path.to_path_buf(),
            message,
        };

        let content = std::fs::read_to_string(path)
            .map_err(|e| config_error(format!("failed to read: {}", e)))?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| config_error(format!("failed to parse: {}", e)))?;
        config.validate().map_err(config_error)?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.max_blob_bytes == 0 {
            return Err("max_blob_bytes must be greater than 0".to_string());
        }
        if self.retry.poll_interval.is_zero() {
            return Err("retry.poll_interval must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Workspace root, resolved against `base` when relative.
    pub fn workspace_root_in(&self, base: &Path) -> PathBuf {
        if self.workspace_root.is_absolute() {
            self.workspace_root.clone()
        } else {
            base.join(&self.workspace_root)
        }
    }

    /// Analyzer for this configuration's policy and blob limit.
    pub fn analyzer(&self) -> Result<CommitAnalyzer> {
        Ok(CommitAnalyzer::from_policy(&self.policy)?.with_max_blob_bytes(self.max_blob_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loctrail.toml");
        fs::write(
            &path,
            "max_blob_bytes = 1024\n[retry]\ncool_down = 60\n[policy]\nexclude_globs = [\"**/gen/**\"]\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.max_blob_bytes, 1024);
        assert_eq!(config.retry.cool_down, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.policy.exclude_globs, vec!["**/gen/**".to_string()]);
        assert!(config.policy.ignored_directories.contains(&"node_modules".to_string()));
        assert_eq!(config.workspace_root, PathBuf::from("repos"));
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "max_blob_bytes = \"lots\"").unwrap();

        let err = EngineConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, LoctrailError::Config { ref path, .. } if path.ends_with("broken.toml")));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zero.toml");
        fs::write(&path, "[retry]\npoll_interval = 0\n").unwrap();
        assert!(EngineConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = EngineConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, LoctrailError::Config { .. }));
    }

    #[test]
    fn test_workspace_root_resolution() {
        let config = EngineConfig::default();
        assert_eq!(
            config.workspace_root_in(Path::new("/data")),
            PathBuf::from("/data/repos")
        );

        let absolute = EngineConfig {
            workspace_root: PathBuf::from("/srv/repos"),
            ..Default::default()
        };
        assert_eq!(absolute.workspace_root_in(Path::new("/data")), PathBuf::from("/srv/repos"));
    }

    #[test]
    fn test_bad_glob_fails_analyzer() {
        let config = EngineConfig {
            policy: ClassificationPolicy::default().exclude("[unclosed"),
            ..Default::default()
        };
        assert!(matches!(
            config.analyzer(),
            Err(LoctrailError::InvalidGlob { .. })
        ));
    }
}
