pub mod config;
pub mod demo;
pub mod uri;

use anyhow::{Context, Result};
use signkit_engine::EngineConfig;
use std::path::Path;

/// Load an engine configuration from a JSON file.
///
/// Missing fields take their defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid engine config in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"metadata": {{"name": "Demo", "description": "", "url": "https://demo.example"}}, "request_timeout_ms": 1500}}"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.metadata.name, "Demo");
        assert_eq!(config.request_timeout_ms, 1500);
        assert_eq!(
            config.pending_proposal_capacity,
            EngineConfig::default().pending_proposal_capacity
        );
    }

    #[test]
    fn test_invalid_config_names_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid engine config"));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("absent.json")).is_err());
    }
}
