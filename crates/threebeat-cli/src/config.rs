use std::path::PathBuf;

use threebeat_core::midi_export::DEFAULT_FILE_NAME;
use threebeat_services::JsonFileStore;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Snapshot file; the platform data dir when unset
    pub state_path: Option<PathBuf>,
    /// Where `export` writes when no path is given
    pub export_dir: Option<PathBuf>,
    pub sample_rate: u32,
    pub render_seconds: f64,
    /// Fixed seed for exports and renders; random when unset
    pub seed: Option<u64>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self { state_path: None, export_dir: None, sample_rate: 44100, render_seconds: 8.0, seed: None }
    }
}

impl CliConfig {
    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .or_else(JsonFileStore::default_path)
            .unwrap_or_else(|| PathBuf::from("threebeat-state.json"))
    }

    pub fn export_path(&self) -> PathBuf {
        self.export_dir.clone().unwrap_or_else(|| PathBuf::from(".")).join(DEFAULT_FILE_NAME)
    }

    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| fastrand::u64(..))
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("threebeat")
        .join("config.toml")
}

/// Missing or unreadable config falls back to defaults
pub fn load_config() -> CliConfig {
    let path = config_path();
    let Ok(text) = std::fs::read_to_string(&path) else {
        return CliConfig::default();
    };
    match toml::from_str(&text) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Ignoring invalid config: {}", e);
            CliConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: CliConfig = toml::from_str("sample_rate = 22050\nseed = 7\n").unwrap();
        assert_eq!(config.sample_rate, 22050);
        assert_eq!(config.seed(), 7);
        assert_eq!(config.render_seconds, 8.0);
        assert!(config.state_path.is_none());
    }

    #[test]
    fn test_export_path_uses_default_file_name() {
        let config = CliConfig { export_dir: Some(PathBuf::from("/tmp/out")), ..CliConfig::default() };
        assert_eq!(config.export_path(), PathBuf::from("/tmp/out/3beat-pattern.mid"));
    }
}
