pub mod catalog;
pub mod config;
pub mod habit;
pub mod sweep;

use std::sync::Arc;

use habitrack_core::error::Result;
use habitrack_core::{Config, HabitDb, LifecycleEngine};
use serde::Serialize;

/// Open the database named in the config.
pub fn open_db() -> Result<Arc<HabitDb>> {
    let config = Config::load()?;
    let db = HabitDb::open_at(&config.database_path()?)?;
    Ok(Arc::new(db))
}

pub fn open_engine() -> Result<Arc<LifecycleEngine>> {
    Ok(Arc::new(LifecycleEngine::with_backend(open_db()?)))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
