//! Refresh Module
//!
//! Live configuration reload: the refresher, its scratch bootstrap run and
//! the refresh scope.

pub mod bootstrap;
pub mod engine;
pub mod scope;
pub mod types;

pub use bootstrap::{BootstrapRun, ConfigBootstrap, SharedLocator, REFRESH_ARGS_SOURCE};
pub use engine::{ContextRefresher, STANDARD_SOURCES};
pub use scope::RefreshScope;
pub use types::{ChangeListener, EnvironmentChangeEvent, RefreshPhase};
