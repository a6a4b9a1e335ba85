//! Cutroom Web - JSON control plane
//!
//! Exposes export job submission, status polling, cancellation and artifact
//! download over HTTP. All pipeline work is delegated to
//! [`cutroom_core::ExportOrchestrator`].

pub mod handlers;
pub mod server;

pub use handlers::ApiError;
pub use server::{AppState, ServerError, build_router, run_server};
