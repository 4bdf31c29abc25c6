//! Error Types
//!
//! Typed failures raised by the context and refresh machinery. They travel
//! inside `anyhow::Error`, so callers use `downcast_ref::<ContextError>()` to
//! tell them apart.

use thiserror::Error;

/// Failures that callers are expected to distinguish
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to build context '{name}'")]
    BuildFailed { name: String },

    #[error("context '{context}' has {} components of type {type_name}: {}", candidates.len(), candidates.join(", "))]
    AmbiguousComponent {
        context: String,
        type_name: &'static str,
        candidates: Vec<String>,
    },

    #[error("context '{context}' already has a component named '{name}'")]
    DuplicateComponent { context: String, name: String },

    #[error("property source '{0}' does not exist")]
    UnknownPropertySource(String),

    #[error("property source '{0}' cannot be positioned relative to itself")]
    SelfRelativeSource(String),

    #[error("context '{0}' is closed")]
    ContextClosed(String),

    #[error("context '{context}' closed with {failures} failing close hook(s)")]
    CloseFailed { context: String, failures: usize },

    #[error("refresh failed while {phase}")]
    RefreshFailed { phase: String },

    #[error("refresh scope entry '{name}' is not a {expected}")]
    ScopeTypeMismatch { name: String, expected: &'static str },

    #[error("could not resolve placeholder '{0}'")]
    UnresolvablePlaceholder(String),

    #[error("unknown configuration unit '{0}'")]
    UnknownUnit(String),
}

impl ContextError {
    /// Find a `ContextError` anywhere in an error chain
    pub fn find(error: &anyhow::Error) -> Option<&ContextError> {
        error
            .downcast_ref::<ContextError>()
            .or_else(|| error.chain().find_map(|cause| cause.downcast_ref::<ContextError>()))
    }
}
