//! Environment Module
//!
//! Layered configuration: property sources, the ordered source stack, the
//! live environment, flattening/diffing and source discovery.

pub mod loader;
pub mod resolver;
pub mod snapshot;
pub mod sources;
pub mod types;

pub use loader::{command_line_source, FilePropertySourceLocator, PropertySourceLocator};
pub use resolver::Environment;
pub use snapshot::{diff, flatten, ChangeSet, FlatView, PropertyChange};
pub use sources::PropertySources;
pub use types::*;
