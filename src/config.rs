use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::model::Parameters;
use crate::sources::bltc::SearchFilter;

pub const CONFIG_FILE: &str = "config.json";
pub const API_KEY_ENV: &str = "GW2_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_key: String,
    pub output_dir: PathBuf,

    pub historical: bool,
    pub history_days: u32,
    pub max_pages: u32,  // 0 = until the search runs out
    /// Feed the engine from the history summary instead of the scraped row.
    pub use_history_counts: bool,

    pub transaction_days: u32,

    pub parameters: Parameters,
    pub search: SearchFilter,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            api_key: String::new(),
            output_dir: PathBuf::from("."),
            historical: false,
            history_days: 7,
            max_pages: 0,
            use_history_counts: false,
            transaction_days: 30,
            parameters: Parameters::default(),
            search: SearchFilter::default(),
        }
    }
}

impl AppConfig {
    /// Reads `path`. A missing file gives defaults; so does an unreadable one,
    /// after a warning.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut cfg = match Self::read(path) {
            Ok(Some(cfg)) => cfg,
            Ok(None) => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring config file");
                Self::default()
            }
        };

        if cfg.api_key.is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                cfg.api_key = key;
            }
        }
        cfg
    }

    fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let cfg = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(Some(cfg))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(dir.path().join("nope.json"));
        assert_eq!(cfg.history_days, 7);
        assert_eq!(cfg.transaction_days, 30);
        assert_eq!(cfg.max_pages, 0);
        assert_eq!(cfg.parameters, Parameters::default());
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();
        let cfg = AppConfig::load(&path);
        assert_eq!(cfg.history_days, 7);
        assert!(!cfg.historical);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"{"api_key": "ABC-123", "historical": true, "parameters": {"overcut_pct": 1.02, "undercut_pct": 0.98, "target_roi": 0.15}}"#,
        )
        .unwrap();

        let cfg = AppConfig::load(&path);
        assert_eq!(cfg.api_key, "ABC-123");
        assert!(cfg.historical);
        assert_eq!(cfg.parameters.overcut_pct, 1.02);
        assert_eq!(cfg.parameters.trading_post_fee, crate::model::TRADING_POST_FEE);
        assert_eq!(cfg.search, SearchFilter::default());
    }

    #[test]
    fn partial_parameters_keep_the_rest_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"api_key": "XYZ", "max_pages": 4, "parameters": {"overcut_pct": 1.03}}"#).unwrap();

        let cfg = AppConfig::load(&path);
        assert_eq!(cfg.api_key, "XYZ");
        assert_eq!(cfg.max_pages, 4);
        assert_eq!(cfg.parameters.overcut_pct, 1.03);
        assert_eq!(cfg.parameters.undercut_pct, Parameters::default().undercut_pct);
        assert_eq!(cfg.parameters.target_roi, Parameters::default().target_roi);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let cfg = AppConfig {
            api_key: "KEY".into(),
            output_dir: dir.path().to_path_buf(),
            max_pages: 3,
            ..Default::default()
        };
        cfg.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path), cfg);
    }
}
