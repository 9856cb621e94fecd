//! Control-side config loader (strict parsing).

pub mod schema;

use std::fs;

use snapline_core::error::{Result, SnapError};

pub use schema::{ControlConfig, ControlSection};

pub fn load_from_file(path: &str) -> Result<ControlConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| SnapError::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ControlConfig> {
    let cfg: ControlConfig = serde_yaml::from_str(s)
        .map_err(|e| SnapError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
