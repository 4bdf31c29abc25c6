//! Refresh Types

use crate::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Published after the live environment was reloaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentChangeEvent {
    /// Id of the refresher that produced the event
    pub source: String,
    pub keys: BTreeSet<String>,
}

/// Step of a refresh run, used in logs and failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    SnapshottingBefore,
    RebuildingScratch,
    Reconciling,
    Diffing,
    Publishing,
    InvalidatingScope,
}

impl fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            RefreshPhase::SnapshottingBefore => "snapshotting the current environment",
            RefreshPhase::RebuildingScratch => "rebuilding configuration sources",
            RefreshPhase::Reconciling => "reconciling property sources",
            RefreshPhase::Diffing => "diffing the environment",
            RefreshPhase::Publishing => "publishing the change event",
            RefreshPhase::InvalidatingScope => "invalidating the refresh scope",
        };
        f.write_str(phase)
    }
}

/// Receives change events synchronously, in registration order
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, event: &EnvironmentChangeEvent) -> Result<()>;
}

impl<F> ChangeListener for F
where
    F: Fn(&EnvironmentChangeEvent) -> Result<()> + Send + Sync,
{
    fn on_change(&self, event: &EnvironmentChangeEvent) -> Result<()> {
        self(event)
    }
}
