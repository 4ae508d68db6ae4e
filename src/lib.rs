pub mod config;
pub mod connection;
pub mod error;
pub mod format;
pub mod listing;
pub mod logging;
pub mod state;
pub mod transfer;
pub mod transport;

pub use error::{AppError, AppResult};
pub use state::AppState;
