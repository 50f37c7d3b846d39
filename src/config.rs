use crate::http::{ClientConfig, DEFAULT_SWAGGER_PATH, DEFAULT_USER_AGENT};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_data_dir() -> PathBuf {
    PathBuf::from(".autoadmin")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_swagger_path() -> String {
    DEFAULT_SWAGGER_PATH.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Where connectors and the session are persisted.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_swagger_path")]
    pub swagger_path: String,
    /// Tag -> display name overrides for the resource catalog.
    #[serde(default)]
    pub display_names: HashMap<String, String>,
    /// Resource -> explicit table columns.
    #[serde(default)]
    pub columns: HashMap<String, Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: default_data_dir(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            swagger_path: default_swagger_path(),
            display_names: HashMap::new(),
            columns: HashMap::new(),
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> crate::error::AppResult<Self> {
        let file = std::fs::File::open(path).map_err(crate::error::AppError::Io)?;
        let settings = serde_yaml::from_reader(file)?;
        Ok(settings)
    }

    /// Like [`Settings::from_file`], but a missing file means defaults.
    pub fn load(path: &Path) -> crate::error::AppResult<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Settings::default());
        }
        Self::from_file(path)
    }

    /// Client configuration for `base_url`, carrying the configured agent and timeout.
    pub fn client_config(&self, base_url: &str) -> ClientConfig {
        let mut config = ClientConfig::new(base_url);
        config.user_agent = self.user_agent.clone();
        config.timeout = Duration::from_secs(self.timeout_secs);
        config
    }

    pub fn columns_for(&self, resource: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(resource))
            .map(|(_, columns)| columns.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "base_url: http://library.local\ndisplay_names:\n  books: Library Books\ncolumns:\n  Books: [id, title]"
        )
        .unwrap();
        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.base_url.as_deref(), Some("http://library.local"));
        assert_eq!(settings.timeout_secs, 30);
        assert_eq!(settings.swagger_path, DEFAULT_SWAGGER_PATH);
        assert_eq!(settings.display_names["books"], "Library Books");
        assert_eq!(
            settings.columns_for("books"),
            Some(&["id".to_string(), "title".to_string()][..])
        );
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn client_config_carries_agent_and_timeout() {
        let settings = Settings {
            timeout_secs: 5,
            user_agent: "autoadmin-test".to_string(),
            ..Settings::default()
        };
        let config = settings.client_config("http://h/");
        assert_eq!(config.base_url(), "http://h");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.user_agent, "autoadmin-test");
    }
}
