//! ctxhub Library
//!
//! Named child contexts with isolated configuration, plus live refresh of a
//! layered configuration environment: flatten, diff, reconcile the layer
//! stack, publish the changed keys and invalidate refresh-scoped instances.

pub mod config;
pub mod context;
pub mod environment;
pub mod error;
pub mod management;
pub mod metrics;
pub mod refresh;
pub mod shutdown;

pub use config::Config;
pub use context::{Container, NamedContextFactory};
pub use environment::Environment;
pub use error::ContextError;
pub use refresh::{ContextRefresher, RefreshScope};
pub use shutdown::ShutdownCoordinator;

/// Common result type for the crate
pub type Result<T> = anyhow::Result<T>;
