//! Client configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/cloudport/config.toml`
//! - Windows: `%APPDATA%/cloudport/config.toml`
//!
//! `CLOUDPORT_TOKEN` and `CLOUDPORT_API_URL` override the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const ENV_TOKEN: &str = "CLOUDPORT_TOKEN";
pub const ENV_API_URL: &str = "CLOUDPORT_API_URL";

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the store API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Bearer token. The file is kept private because of it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Where downloads are written.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Identifies this machine to the store.
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Use SHA-256 fingerprints. When off, a rolling hash is used and
    /// server-side dedup is skipped.
    #[serde(default = "default_true")]
    pub strong_fingerprint: bool,
}

fn default_api_base_url() -> String {
    "http://localhost:8089".into()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_max_concurrent_downloads() -> usize {
    3
}

fn default_device_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "cloudport".into());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            access_token: None,
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            device_id: default_device_id(),
            strong_fingerprint: default_true(),
        }
    }
}

impl Config {
    /// Loads configuration from the platform path, creating a default file
    /// on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    /// Loads configuration from `path`, creating a default file if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Writes the configuration to `path` with owner-only permissions.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Applies environment overrides read through `lookup`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = lookup(ENV_TOKEN).filter(|t| !t.is_empty()) {
            self.access_token = Some(token);
        }
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.is_empty()) {
            self.api_base_url = url;
        }
        self
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("cloudport").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("cloudport")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.api_base_url, "http://localhost:8089");
        assert!(config.access_token.is_none());
        assert_eq!(config.max_concurrent_downloads, 3);
        assert!(config.strong_fingerprint);
        assert!(!config.device_id.is_empty());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: Config = toml::from_str(r#"api_base_url = "https://files.example""#).unwrap();
        assert_eq!(config.api_base_url, "https://files.example");
        assert_eq!(config.download_dir, PathBuf::from("downloads"));
        assert!(config.strong_fingerprint);
    }

    #[test]
    fn first_load_creates_private_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.device_id, created.device_id);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn token_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        let config = Config {
            access_token: Some("secret".into()),
            max_concurrent_downloads: 5,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("secret"));
        assert_eq!(loaded.max_concurrent_downloads, 5);
    }

    #[test]
    fn environment_overrides_file() {
        let config = Config::default().with_env_overrides(|key| match key {
            ENV_TOKEN => Some("from-env".into()),
            ENV_API_URL => Some("https://env.example".into()),
            _ => None,
        });
        assert_eq!(config.access_token.as_deref(), Some("from-env"));
        assert_eq!(config.api_base_url, "https://env.example");
    }

    #[test]
    fn empty_environment_values_are_ignored() {
        let config = Config {
            access_token: Some("file".into()),
            ..Config::default()
        }
        .with_env_overrides(|_| Some(String::new()));
        assert_eq!(config.access_token.as_deref(), Some("file"));
        assert_eq!(config.api_base_url, "http://localhost:8089");
    }

    #[test]
    fn config_path_names_the_app() {
        assert!(config_path().to_string_lossy().contains("cloudport"));
    }
}
