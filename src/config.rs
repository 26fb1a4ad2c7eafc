use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "campus";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub sync: SyncConfig,
    pub token: TokenConfig,
    pub storage: StorageConfig,
}

/// University API endpoints and OAuth2 client registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every resource path is joined onto
    pub base_url: String,
    /// OAuth2 token endpoint
    pub token_url: String,
    /// OAuth2 authorization endpoint (where the user obtains a code)
    pub authorize_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Sent as Accept-Language on resource requests
    pub language: String,
    /// Per-request read/write timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.campus.example.edu/v2".to_string(),
            token_url: "https://api.campus.example.edu/v2/o/token".to_string(),
            authorize_url: "https://api.campus.example.edu/v2/o/authorize".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "campus://oauth".to_string(),
            language: "en".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// URL the user opens in a browser to authorize this client.
    pub fn authorization_url(&self) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
        )
    }
}

/// Background sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between periodic syncs in daemon mode
    pub interval_secs: u64,
    /// Only events of this category are kept locally
    pub event_category: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            event_category: "HOLIDAY".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Access token refresh policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Refresh this many seconds before the token expires
    pub refresh_margin_secs: u64,
    /// Delay before retrying a refresh that failed in transit
    pub retry_delay_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_margin_secs: 100,
            retry_delay_secs: 10,
        }
    }
}

/// Local storage location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory (empty = platform data dir)
    pub data_dir: Option<String>,
}

impl StorageConfig {
    pub fn data_dir(&self) -> Result<PathBuf> {
        let dir = match self.data_dir {
            Some(ref custom) => PathBuf::from(custom),
            None => dirs::data_dir()
                .context("Failed to get data directory")?
                .join(CONFIG_DIR_NAME),
        };
        fs::create_dir_all(&dir).context("Failed to create data directory")?;
        Ok(dir)
    }
}

impl Config {
    /// Directory holding config.toml and the saved credentials
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(CONFIG_DIR_NAME);

        fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from the default path, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from file, or create default if not exists
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path).context("Failed to read config file")?;

            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;

            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Generate example config content for documentation
    pub fn example_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.language, "en");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.sync.interval_secs, 3600);
        assert_eq!(config.token.refresh_margin_secs, 100);
        assert_eq!(config.token.retry_delay_secs, 10);
        assert!(config.storage.data_dir.is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial_toml = r#"
[api]
client_id = "abc"

[token]
retry_delay_secs = 30
"#;

        let config: Config = toml::from_str(partial_toml).unwrap();

        assert_eq!(config.api.client_id, "abc");
        assert_eq!(config.token.retry_delay_secs, 30);
        // Defaults
        assert_eq!(config.token.refresh_margin_secs, 100);
        assert_eq!(config.api.language, "en");
        assert_eq!(config.sync.event_category, "HOLIDAY");
    }

    #[test]
    fn test_full_config_parsing() {
        let full_toml = r#"
[api]
base_url = "https://api.uni.test/v2"
token_url = "https://api.uni.test/v2/o/token"
authorize_url = "https://api.uni.test/v2/o/authorize"
client_id = "client"
client_secret = "secret"
redirect_uri = "app://callback"
language = "ca"
timeout_secs = 5

[sync]
interval_secs = 900
event_category = "EXAMS"

[token]
refresh_margin_secs = 60
retry_delay_secs = 15

[storage]
data_dir = "/custom/path"
"#;

        let config: Config = toml::from_str(full_toml).unwrap();

        assert_eq!(config.api.base_url, "https://api.uni.test/v2");
        assert_eq!(config.api.client_secret, "secret");
        assert_eq!(config.api.language, "ca");
        assert_eq!(config.api.timeout(), Duration::from_secs(5));
        assert_eq!(config.sync.interval(), Duration::from_secs(900));
        assert_eq!(config.sync.event_category, "EXAMS");
        assert_eq!(config.token.refresh_margin_secs, 60);
        assert_eq!(config.storage.data_dir, Some("/custom/path".to_string()));
    }

    #[test]
    fn test_authorization_url_is_encoded() {
        let api = ApiConfig {
            client_id: "my client".to_string(),
            redirect_uri: "app://cb".to_string(),
            ..ApiConfig::default()
        };

        let url = api.authorization_url();
        assert!(url.starts_with(&api.authorize_url));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=my%20client"));
        assert!(url.contains("redirect_uri=app%3A%2F%2Fcb"));
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.token.refresh_margin_secs, 100);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.api.base_url, config.api.base_url);
    }

    #[test]
    fn test_example_config_is_valid() {
        let example = Config::example_config();
        let parsed: Result<Config, _> = toml::from_str(&example);
        assert!(parsed.is_ok(), "Example config should be valid TOML");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = "this is not valid [[ toml";
        let result: Result<Config, _> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }
}
