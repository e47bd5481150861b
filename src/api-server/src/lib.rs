// Admission API server for the VoltGate authorization pipeline

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiError, Result};
pub use server::{Server, ServerBuilder, ServerConfig};
pub use state::AppState;

/// API version
pub const API_VERSION: &str = "v1";
