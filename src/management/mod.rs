//! Management API Module
//! 
//! REST API for triggering refreshes and inspecting the live environment
//! and the named contexts.

pub mod api;
pub mod auth;
pub mod handlers;
pub mod server;
pub mod types;

pub use api::ManagementApi;
pub use auth::{ApiAuth, AuthMethod};
pub use handlers::AppState;
pub use server::ManagementServer;
pub use types::*;
