//! Configuration loading and root folder resolution
//!
//! Startup never fails because configuration is absent: a missing config
//! file means every field takes its compiled default. A config file that
//! exists but does not parse is an error.

use crate::api::auth::AuthWindow;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "TREED_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "treed.db";

/// Service config file name inside the root folder
pub const CONFIG_FILE: &str = "treed.toml";

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    default_root_folder()
}

/// OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/treed (or /var/lib/treed for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("treed"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/treed"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("treed"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/treed"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("treed"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\treed"))
    } else {
        PathBuf::from("./treed_data")
    }
}

/// Resolved root folder with derived file locations
#[derive(Debug, Clone)]
pub struct RootFolder {
    path: PathBuf,
}

impl RootFolder {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Create the folder if it does not exist yet
    pub fn ensure_exists(&self) -> Result<()> {
        if !self.path.exists() {
            std::fs::create_dir_all(&self.path)?;
            info!("Created root folder: {}", self.path.display());
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn database_path(&self) -> PathBuf {
        self.path.join(DATABASE_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join(CONFIG_FILE)
    }
}

/// Scan analytics service configuration (`treed.toml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address to bind the HTTP listener to
    pub bind: String,
    pub port: u16,
    /// Default tracing filter when RUST_LOG is not set
    pub log_level: String,
    /// Catalog TOML file; the built-in catalog is used when unset
    pub catalog_path: Option<PathBuf>,
    /// Administrator shared secret; read from (or generated into) the
    /// settings table when unset. 0 disables administrator checks.
    pub admin_secret: Option<i64>,
    /// How old a signed administrator request may be
    pub auth_max_age_ms: i64,
    /// How far in the future a signed request timestamp may be
    pub auth_max_skew_ms: i64,
    /// Origins allowed to call the API from a browser
    pub allowed_origins: Vec<String>,
    /// Fraction of a track a session must cover to count as completed
    pub completion_threshold: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            catalog_path: None,
            admin_secret: None,
            auth_max_age_ms: 30_000,
            auth_max_skew_ms: 1_000,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "https://tree-d-dashboard.vercel.app".to_string(),
            ],
            completion_threshold: 0.9,
        }
    }
}

impl ServiceConfig {
    /// Read configuration; `Ok(None)` when the file does not exist
    ///
    /// Does not log, so it can run before tracing is initialised. Callers
    /// fall back to `ServiceConfig::default()` on `None`.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Some(config))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn auth_window(&self) -> AuthWindow {
        AuthWindow {
            max_age_ms: self.auth_max_age_ms,
            max_skew_ms: self.auth_max_skew_ms,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.auth_max_age_ms < 0 || self.auth_max_skew_ms < 0 {
            return Err(Error::Config(
                "auth_max_age_ms and auth_max_skew_ms must not be negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.completion_threshold) {
            return Err(Error::Config(format!(
                "completion_threshold must be between 0 and 1, got {}",
                self.completion_threshold
            )));
        }
        Ok(())
    }
}
