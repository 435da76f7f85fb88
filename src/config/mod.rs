//! Configuration loading for qmd.

use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;

use crate::rank::fingerprint::{DEFAULT_DIMENSIONS, DEFAULT_POOL_FACTOR};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "QMD_CONFIG";

/// Environment variable naming the workspace relative paths resolve against.
pub const WORKSPACE_ENV: &str = "QMD_WORKSPACE";

/// Default store location, relative to the workspace.
pub const DEFAULT_STORE_PATH: &str = "memory/qmd.db";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 18790;

/// Top-level configuration loaded from config.toml.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ranker: RankerConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Settings for the fingerprint re-ranker used by semantic search.
#[derive(Debug, Clone, Deserialize)]
pub struct RankerConfig {
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Candidates fetched from the index per requested result.
    #[serde(default = "default_pool_factor")]
    pub pool_factor: usize,
    /// Cache a fingerprint alongside every write.
    #[serde(default = "default_true")]
    pub embed_on_write: bool,
    /// Seconds between background re-embedding passes while serving. 0 disables.
    #[serde(default)]
    pub reembed_interval_secs: u64,
}

/// Settings for bulk import of text files.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_bootstrap_dir")]
    pub dir: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_store_path() -> String {
    DEFAULT_STORE_PATH.to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}

fn default_pool_factor() -> usize {
    DEFAULT_POOL_FACTOR
}

fn default_true() -> bool {
    true
}

fn default_bootstrap_dir() -> String {
    "memory".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "txt".to_string()]
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
            pool_factor: default_pool_factor(),
            embed_on_write: true,
            reembed_interval_secs: 0,
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            dir: default_bootstrap_dir(),
            extensions: default_extensions(),
        }
    }
}

impl Config {
    /// Load config from `$QMD_CONFIG`, then ~/.config/qmd/config.toml, or
    /// return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        if let Some(path) = Self::config_path()
            && path.exists()
        {
            return Self::from_file(&path);
        }

        Ok(Self::default())
    }

    /// Parse a specific config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        ProjectDirs::from("", "", "qmd").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Store file location resolved against `workspace`.
    #[must_use]
    pub fn store_path(&self, workspace: &Path) -> PathBuf {
        resolve(workspace, &self.store.path)
    }
}

/// Workspace root from `$QMD_WORKSPACE`, defaulting to the current directory.
#[must_use]
pub fn workspace() -> PathBuf {
    std::env::var_os(WORKSPACE_ENV)
        .map(|raw| expand_tilde(&raw.to_string_lossy()))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve a configured path: `~/` expands to home, relative paths join the
/// workspace.
#[must_use]
pub fn resolve(workspace: &Path, raw: &str) -> PathBuf {
    let path = expand_tilde(raw);
    if path.is_absolute() {
        path
    } else {
        workspace.join(path)
    }
}

/// Expand ~ to the user's home directory.
#[must_use]
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(base_dirs) = BaseDirs::new()
    {
        return base_dirs.home_dir().join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.store.path, "memory/qmd.db");
        assert_eq!(config.server.port, 18790);
        assert_eq!(config.ranker.dimensions, 256);
        assert_eq!(config.ranker.pool_factor, 3);
        assert!(config.ranker.embed_on_write);
        assert_eq!(config.ranker.reembed_interval_secs, 0);
        assert_eq!(config.bootstrap.extensions, vec!["md", "txt"]);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str("[server]\nport = 9000\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.store.path, DEFAULT_STORE_PATH);
    }

    #[test]
    fn from_file_reports_invalid_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store\npath = 1").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config"));
    }

    #[test]
    fn relative_paths_join_workspace() {
        let workspace = Path::new("/srv/notes");
        let config = Config::default();
        assert_eq!(
            config.store_path(workspace),
            PathBuf::from("/srv/notes/memory/qmd.db")
        );
        assert_eq!(resolve(workspace, "/abs/qmd.db"), PathBuf::from("/abs/qmd.db"));
    }

    #[test]
    fn expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("memory/qmd.db"), PathBuf::from("memory/qmd.db"));
        assert_eq!(expand_tilde("~user"), PathBuf::from("~user"));
    }
}
