pub mod profiles;
pub mod settings;
pub mod storage;

pub use profiles::*;
pub use settings::*;
pub use storage::*;

use crate::error::AppResult;
use std::path::PathBuf;

/// Get the ftpdock config directory
pub fn get_config_dir() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .ok_or_else(|| {
            crate::error::AppError::Persistence("Could not find config directory".into())
        })?
        .join("ftpdock");

    Ok(config_dir)
}
