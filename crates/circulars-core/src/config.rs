use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CircularsError, Result};

/// Top-level configuration for the circulars front end.
///
/// Loaded from `~/.circulars/config.toml` by default. Every section falls
/// back to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircularsConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl CircularsConfig {
    /// Read and parse `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CircularsConfig = toml::from_str(&content)?;
        debug!(path = %path.display(), base_url = %config.backend.base_url, "Circulars config read");
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file quietly yields the
    /// defaults and an unreadable or malformed one yields them with a warning.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "No circulars config file, using defaults");
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring circulars config");
            Self::default()
        })
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Circulars config written");
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Where the circular/conversation backend lives and how long to wait on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend, without a trailing slash.
    pub base_url: String,
    /// Database name the conversation endpoints are scoped to.
    pub db_name: String,
    /// Budget for every call except question answering.
    pub request_timeout_secs: u64,
    /// Budget for a single question/answer round trip.
    pub answer_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            db_name: "easy_circulars".to_string(),
            request_timeout_secs: 30,
            answer_timeout_secs: 120,
        }
    }
}

impl BackendConfig {
    /// Reject settings that would make every request fail.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(CircularsError::Config("backend.base_url is empty".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(CircularsError::Config(format!(
                "backend.base_url must be http(s), got: {}",
                self.base_url
            )));
        }
        if self.db_name.trim().is_empty() {
            return Err(CircularsError::Config("backend.db_name is empty".to_string()));
        }
        if self.request_timeout_secs == 0 || self.answer_timeout_secs == 0 {
            return Err(CircularsError::Config(
                "backend timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// `base_url` with any trailing slashes removed.
    pub fn trimmed_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn answer_timeout(&self) -> Duration {
        Duration::from_secs(self.answer_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = CircularsConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert_eq!(config.backend.db_name, "easy_circulars");
        assert_eq!(config.backend.request_timeout_secs, 30);
        assert_eq!(config.backend.answer_timeout_secs, 120);
        assert!(config.backend.validate().is_ok());
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"

[backend]
base_url = "https://circulars.example.org/"
db_name = "staging_circulars"
request_timeout_secs = 5
answer_timeout_secs = 60
"#;
        let file = create_temp_config(content);
        let config = CircularsConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.backend.db_name, "staging_circulars");
        assert_eq!(
            config.backend.trimmed_base_url(),
            "https://circulars.example.org"
        );
        assert_eq!(config.backend.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.backend.answer_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let file = create_temp_config("[backend]\ndb_name = \"other\"\n");
        let config = CircularsConfig::load(file.path()).unwrap();
        assert_eq!(config.backend.db_name, "other");
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_config_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = CircularsConfig::load(file.path()).unwrap();
        assert_eq!(config.backend.answer_timeout_secs, 120);
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let file = create_temp_config("[backend\nbase_url = ");
        let result = CircularsConfig::load(file.path());
        assert!(matches!(result, Err(CircularsError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = CircularsConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.backend.db_name, "easy_circulars");
    }

    #[test]
    fn test_load_or_default_malformed_file() {
        let file = create_temp_config("[backend]\nrequest_timeout_secs = \"soon\"\n");
        let config = CircularsConfig::load_or_default(file.path());
        assert_eq!(config.backend.request_timeout_secs, 30);
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = CircularsConfig::default();
        config.backend.base_url = "http://10.0.0.5:8000".to_string();
        config.save(&path).unwrap();

        let loaded = CircularsConfig::load(&path).unwrap();
        assert_eq!(loaded.backend.base_url, "http://10.0.0.5:8000");
    }

    #[test]
    fn test_validate_rejects_bad_backend() {
        let empty_url = BackendConfig {
            base_url: "  ".to_string(),
            ..BackendConfig::default()
        };
        assert!(empty_url.validate().is_err());

        let wrong_scheme = BackendConfig {
            base_url: "ftp://host".to_string(),
            ..BackendConfig::default()
        };
        assert!(wrong_scheme.validate().is_err());

        let empty_db = BackendConfig {
            db_name: String::new(),
            ..BackendConfig::default()
        };
        assert!(empty_db.validate().is_err());

        let zero_timeout = BackendConfig {
            answer_timeout_secs: 0,
            ..BackendConfig::default()
        };
        assert!(matches!(
            zero_timeout.validate(),
            Err(CircularsError::Config(_))
        ));
    }
}
