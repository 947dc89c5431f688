use super::ui;
use crate::core::config::{API_KEY_ENV, AppConfig};
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

const EXAMPLE_CONFIG: &str = include_str!("../../docs/example_config.yaml");

/// Writes the example configuration to the platform config directory.
pub fn setup() -> Result<()> {
    let path = AppConfig::default_config_path()?;
    setup_at_path(&path)?;

    println!(
        "{}",
        ui::style_text(
            &format!("Created default configuration at {}", path.display()),
            ui::StyleType::Title
        )
    );
    println!(
        "Set {} for fiat rates beyond the demo key, then run `valuta update-rates`.",
        API_KEY_ENV
    );
    Ok(())
}

/// Writes the example configuration to `path`. An existing file is never
/// overwritten.
pub fn setup_at_path<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            anyhow::bail!("Configuration file already exists at {}", path.display())
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to create {}", path.display()));
        }
    };
    file.write_all(EXAMPLE_CONFIG.as_bytes())
        .with_context(|| format!("Failed to write config file to {}", path.display()))?;

    tracing::info!("Wrote example configuration to {}", path.display());
    Ok(())
}
