//! CLI configuration discovery.

use anyhow::{Context, Result};
use fractal_core::ClientConfig;
use std::path::{Path, PathBuf};

/// Load the client configuration.
///
/// Configuration precedence:
/// 1. `--config` (must exist)
/// 2. Local config file (./fractal.toml)
/// 3. Global config file (~/.fractal/config.toml)
/// 4. Defaults
pub fn discover(explicit: Option<&Path>) -> Result<(ClientConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let config = ClientConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        return Ok((config, Some(path.to_path_buf())));
    }

    let global = dirs::home_dir().map(|home| home.join(".fractal").join("config.toml"));
    for candidate in std::iter::once(PathBuf::from("fractal.toml")).chain(global) {
        if candidate.is_file() {
            let config = ClientConfig::load_from_file(&candidate)
                .with_context(|| format!("Failed to load configuration from {}", candidate.display()))?;
            return Ok((config, Some(candidate)));
        }
    }

    Ok((ClientConfig::default(), None))
}
