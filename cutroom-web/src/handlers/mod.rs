//! HTTP request handlers organized by functionality

pub mod error;
pub mod export;
pub mod health;

pub use error::ApiError;
pub use export::{cancel_export, download_export, export_status, start_export};
pub use health::health;
