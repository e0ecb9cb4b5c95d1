//! Server module
//!
//! HTTP API, request gates and startup.

pub mod error;
pub mod http;
pub mod middleware;
pub mod startup;

pub use error::ApiError;
pub use http::{create_router, AppState};
pub use startup::{run_server_with_config, ServerConfig, ServerHandle};
