use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served for every path that is not an API route.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Player executable.  A bare name is searched beside the binary, then on PATH.
    #[serde(default = "default_player_binary")]
    pub binary: String,
    /// Arguments placed before the stream URL.
    #[serde(default = "default_player_args")]
    pub args: Vec<String>,
    /// Listen key appended to every playlist URL as the query string.
    #[serde(default)]
    pub listen_key: String,
}

/// Where the channel catalog comes from: an http(s) URL or a local TOML path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_source")]
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directives, used when RUST_LOG is not set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Also append logs to `file`.
    #[serde(default)]
    pub to_file: bool,
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            public_dir: default_public_dir(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            binary: default_player_binary(),
            args: default_player_args(),
            listen_key: String::new(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            source: default_catalog_source(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            to_file: false,
            file: default_log_file(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    platform::DEFAULT_HTTP_PORT
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_player_binary() -> String {
    platform::mpv_binary_name().to_string()
}

fn default_player_args() -> Vec<String> {
    vec!["--no-video".to_string()]
}

fn default_catalog_source() -> String {
    platform::config_dir()
        .join("stations.toml")
        .to_string_lossy()
        .into_owned()
}

fn default_log_filter() -> String {
    "info,tune_daemon=debug".to_string()
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("tune.log")
}

impl Config {
    /// Load from the default location, writing the defaults there on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn http_address(&self) -> String {
        format!("{}:{}", self.http.bind_address, self.http.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.http_address(), "127.0.0.1:8080");
        assert_eq!(config.player.args, vec!["--no-video"]);
        assert!(config.player.listen_key.is_empty());
        assert!(config.catalog.source.ends_with("stations.toml"));
        assert!(!config.log.to_file);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[player]
listen_key = "abc123"

[http]
port = 9000
"#,
        )
        .unwrap();
        assert_eq!(config.player.listen_key, "abc123");
        assert_eq!(config.player.args, vec!["--no-video"]);
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.http.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_load_writes_defaults_on_first_run() {
        let dir = std::env::temp_dir().join(format!("tune-config-test-{}", std::process::id()));
        let path = dir.join("config.toml");
        let _ = std::fs::remove_file(&path);

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.http.port, 8080);
        assert!(path.exists());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.player.binary, config.player.binary);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
