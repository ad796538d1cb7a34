//! Pipeline configuration: storage locations and provider settings

use crate::types::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Copernicus Data Space Ecosystem endpoints and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CopernicusConfig {
    pub catalogue_url: String,
    pub download_url: String,
    pub token_url: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout in seconds; downloads of large products need a generous value
    pub timeout_secs: u64,
}

impl Default for CopernicusConfig {
    fn default() -> Self {
        Self {
            catalogue_url: "https://catalogue.dataspace.copernicus.eu/odata/v1".to_string(),
            download_url: "https://zipper.dataspace.copernicus.eu/odata/v1".to_string(),
            token_url: "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token"
                .to_string(),
            client_id: "cdse-public".to_string(),
            username: None,
            password: None,
            timeout_secs: 3600,
        }
    }
}

/// Top-level configuration for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw-download area: provider archives and extracted product folders
    pub download_dir: PathBuf,
    /// Root of the cropped-output tree
    pub output_dir: PathBuf,
    /// SQLite database holding tile and POI progress
    pub database_path: PathBuf,
    pub copernicus: CopernicusConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("satcrop");

        Self {
            download_dir: base.join("downloads"),
            output_dir: base.join("cropped"),
            database_path: base.join("tiles.db"),
            copernicus: CopernicusConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file; absent keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        log::info!("Reading configuration from: {}", path.as_ref().display());
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> PipelineResult<Self> {
        toml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Override settings from `SATCROP_*` environment variables
    pub fn apply_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("SATCROP_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SATCROP_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(db) = lookup("SATCROP_DATABASE") {
            self.database_path = PathBuf::from(db);
        }
        if let Some(user) = lookup("SATCROP_COPERNICUS_USERNAME") {
            self.copernicus.username = Some(user);
        }
        if let Some(password) = lookup("SATCROP_COPERNICUS_PASSWORD") {
            self.copernicus.password = Some(password);
        }
    }

    /// Create the download, output and database directories if missing
    pub fn ensure_directories(&self) -> PipelineResult<()> {
        std::fs::create_dir_all(&self.download_dir)?;
        std::fs::create_dir_all(&self.output_dir)?;
        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
