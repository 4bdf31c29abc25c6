//! Context Refresher
//!
//! Reloads configuration into a live environment:
//!
//! 1. flatten the live environment
//! 2. rediscover sources into a scratch environment
//! 3. reconcile scratch layers into the live stack
//! 4. flatten again and diff
//! 5. publish an [`EnvironmentChangeEvent`]
//! 6. invalidate the refresh scope (`refresh` only)
//!
//! Runs are serialized by a per-refresher lock. The lock is reentrant, so a
//! listener may start a nested refresh on its own thread. Reconciliation is
//! not transactional: layers replaced before a failure stay in place.

use super::bootstrap::{ConfigBootstrap, REFRESH_ARGS_SOURCE};
use super::scope::RefreshScope;
use super::types::{ChangeListener, EnvironmentChangeEvent, RefreshPhase};
use crate::environment::{
    diff, flatten, Environment, FlatView, MapPropertySource, PropertySource, SharedSource,
    COMMAND_LINE_SOURCE, CONFIGURATION_PROPERTIES_SOURCE, DEFAULT_PROPERTIES_SOURCE,
    JNDI_SOURCE, SERVLET_CONFIG_SOURCE, SERVLET_CONTEXT_SOURCE, SYSTEM_ENVIRONMENT_SOURCE,
    SYSTEM_PROPERTIES_SOURCE,
};
use crate::error::ContextError;
use crate::metrics::Metrics;
use crate::Result;
use anyhow::Context;
use parking_lot::{ReentrantMutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Platform layers that are never reported as changed nor reconciled
pub const STANDARD_SOURCES: &[&str] = &[
    SYSTEM_PROPERTIES_SOURCE,
    SYSTEM_ENVIRONMENT_SOURCE,
    JNDI_SOURCE,
    SERVLET_CONFIG_SOURCE,
    SERVLET_CONTEXT_SOURCE,
    CONFIGURATION_PROPERTIES_SOURCE,
];

/// Layers copied from the live environment into the scratch environment
pub const COPIED_SOURCES: &[&str] = &[COMMAND_LINE_SOURCE, DEFAULT_PROPERTIES_SOURCE];

pub const DEFAULT_REFRESHER_ID: &str = "application";

/// Reloads configuration into a live environment
pub struct ContextRefresher {
    id: String,
    environment: Arc<Environment>,
    scope: Arc<RefreshScope>,
    bootstrap: ConfigBootstrap,
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
    standard_sources: HashSet<String>,
    lock: ReentrantMutex<()>,
    metrics: Option<Arc<Metrics>>,
}

impl ContextRefresher {
    pub fn new(
        environment: Arc<Environment>,
        scope: Arc<RefreshScope>,
        bootstrap: ConfigBootstrap,
    ) -> Self {
        Self {
            id: DEFAULT_REFRESHER_ID.to_string(),
            environment,
            scope,
            bootstrap,
            listeners: RwLock::new(Vec::new()),
            standard_sources: STANDARD_SOURCES.iter().map(|s| s.to_string()).collect(),
            lock: ReentrantMutex::new(()),
            metrics: None,
        }
    }

    /// Identifier carried as the `source` of published events
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.write().push(listener);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn scope(&self) -> &Arc<RefreshScope> {
        &self.scope
    }

    /// Reload the environment, publish the change and invalidate the scope
    pub fn refresh(&self) -> Result<BTreeSet<String>> {
        let _guard = self.lock.lock();
        self.instrumented(|| {
            let keys = self.refresh_environment_locked()?;
            debug!(phase = %RefreshPhase::InvalidatingScope, "Refresh phase");
            self.scope.refresh_all();
            Ok(keys)
        })
    }

    /// Reload the environment and publish the change, keeping scoped instances
    pub fn refresh_environment(&self) -> Result<BTreeSet<String>> {
        let _guard = self.lock.lock();
        self.instrumented(|| self.refresh_environment_locked())
    }

    fn instrumented(
        &self,
        run: impl FnOnce() -> Result<BTreeSet<String>>,
    ) -> Result<BTreeSet<String>> {
        let started = Instant::now();
        let result = run();
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(keys) => metrics.record_refresh(keys.len(), started.elapsed()),
                Err(_) => metrics.record_refresh_failure(),
            }
        }
        result
    }

    fn refresh_environment_locked(&self) -> Result<BTreeSet<String>> {
        debug!(phase = %RefreshPhase::SnapshottingBefore, "Refresh phase");
        let before = self.extract();

        self.add_config_files_to_environment()?;

        debug!(phase = %RefreshPhase::Diffing, "Refresh phase");
        let changes = diff(&before, &self.extract());
        let keys = changes.keys();

        debug!(phase = %RefreshPhase::Publishing, "Refresh phase");
        let event = EnvironmentChangeEvent {
            source: self.id.clone(),
            keys: keys.clone(),
        };
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.on_change(&event)?;
        }

        info!(refresher = %self.id, keys = ?keys, "Environment refreshed");
        Ok(keys)
    }

    /// Flattened live environment without the standard layers
    pub fn extract(&self) -> FlatView {
        flatten(&self.environment.property_sources(), &self.standard_sources)
    }

    fn add_config_files_to_environment(&self) -> Result<()> {
        debug!(phase = %RefreshPhase::RebuildingScratch, "Refresh phase");
        let scratch = Arc::new(self.copy_environment());
        let run = self
            .bootstrap
            .run(scratch)
            .context(ContextError::RefreshFailed {
                phase: RefreshPhase::RebuildingScratch.to_string(),
            })?;

        debug!(phase = %RefreshPhase::Reconciling, "Refresh phase");
        let mut discovered = run.environment().property_sources();
        discovered.remove(REFRESH_ARGS_SOURCE);
        self.reconcile(discovered.iter().cloned().collect())
            .context(ContextError::RefreshFailed {
                phase: RefreshPhase::Reconciling.to_string(),
            })
    }

    /// Seed a scratch environment with the copied layers and profile selectors
    fn copy_environment(&self) -> Environment {
        let live = self.environment.property_sources();
        let scratch = Environment::standard();

        scratch.with_sources_mut(|sources| {
            for name in COPIED_SOURCES {
                if let Some(source) = live.get(name) {
                    if *name == COMMAND_LINE_SOURCE {
                        sources.add_first(source);
                    } else {
                        sources.add_last(source);
                    }
                }
            }
            sources.add_first(
                MapPropertySource::from_pairs(
                    REFRESH_ARGS_SOURCE,
                    [
                        ("management.endpoints.enabled", Value::Bool(false)),
                        ("main.sources", Value::String(String::new())),
                    ],
                )
                .into_shared(),
            );
        });

        let active = self.environment.active_profiles();
        if !active.is_empty() {
            scratch.set_active_profiles(active);
        }
        scratch.set_default_profiles(self.environment.default_profiles());
        scratch
    }

    /// Merge scratch layers into the live stack
    ///
    /// Walks `discovered` from highest priority down. A layer already in the
    /// live stack is replaced in place and becomes the insertion cursor; a
    /// new layer goes right after the cursor (or first, with no cursor) and
    /// then becomes the cursor. Standard and non-enumerable layers only move
    /// the cursor.
    fn reconcile(&self, discovered: Vec<SharedSource>) -> Result<()> {
        self.environment.with_sources_mut(|target| {
            let mut cursor: Option<String> = None;
            for source in discovered {
                let name = source.name().to_string();
                let present = target.contains(&name);
                if present {
                    cursor = Some(name.clone());
                }
                if self.standard_sources.contains(&name) || !is_enumerable(source.as_ref()) {
                    continue;
                }

                if present {
                    debug!(source = %name, "Replacing property source");
                    target.replace(&name, source)?;
                } else {
                    debug!(source = %name, after = ?cursor, "Adding property source");
                    match &cursor {
                        Some(after) => target.add_after(after, source)?,
                        None => target.add_first(source),
                    }
                    cursor = Some(name);
                }
            }
            Ok(())
        })
    }
}

fn is_enumerable(source: &dyn PropertySource) -> bool {
    source.nested().is_some() || source.property_names().is_some()
}
