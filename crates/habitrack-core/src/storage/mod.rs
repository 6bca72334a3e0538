mod config;
pub mod database;
pub mod migrations;

pub use config::{Config, StorageConfig, SweeperConfig};
pub use database::HabitDb;

use std::path::PathBuf;

/// Returns the habitrack data directory, creating it if needed.
///
/// `HABITRACK_DATA_DIR` overrides the location outright. Otherwise this is
/// `~/.config/habitrack[-dev]/`, with the `-dev` suffix when
/// `HABITRACK_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let dir = match std::env::var_os("HABITRACK_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("HABITRACK_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("habitrack-dev")
            } else {
                base_dir.join("habitrack")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
