//! Config command - show the effective engine configuration

use anyhow::Result;
use signkit_engine::EngineConfig;
use std::path::Path;

use crate::ui;

pub fn run(path: Option<&str>) -> Result<()> {
    let config = match path {
        Some(path) => super::load_config(Path::new(path))?,
        None => EngineConfig::default(),
    };

    ui::heading("Engine configuration");
    ui::json(&serde_json::to_value(&config)?);
    Ok(())
}
