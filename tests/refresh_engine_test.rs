//! Refresh Engine Integration Tests

use anyhow::{anyhow, Result};
use ctxhub::environment::{
    Environment, FilePropertySourceLocator, MapPropertySource, PropertySourceLocator,
    SharedSource, DEFAULT_PROPERTIES_SOURCE,
};
use ctxhub::refresh::{
    ConfigBootstrap, ContextRefresher, EnvironmentChangeEvent, RefreshScope, REFRESH_ARGS_SOURCE,
};
use ctxhub::ContextError;
use serde_json::json;
use std::collections::BTreeSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Locator whose layers can be swapped between refreshes
#[derive(Debug, Default)]
struct SwappableLocator {
    layers: Mutex<Vec<SharedSource>>,
}

impl SwappableLocator {
    fn set(&self, layers: Vec<SharedSource>) {
        *self.layers.lock().unwrap() = layers;
    }
}

impl PropertySourceLocator for SwappableLocator {
    fn locate(&self, _environment: &Environment) -> Result<Vec<SharedSource>> {
        Ok(self.layers.lock().unwrap().clone())
    }
}

/// Locator that records how many runs are inside `locate` at once
#[derive(Debug, Default)]
struct OverlapLocator {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl PropertySourceLocator for OverlapLocator {
    fn locate(&self, _environment: &Environment) -> Result<Vec<SharedSource>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as i64;
        let inside = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(inside, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![app_layer(&[("call", call)])])
    }
}

fn app_layer(pairs: &[(&str, i64)]) -> SharedSource {
    MapPropertySource::from_pairs("app", pairs.iter().map(|(k, v)| (k.to_string(), json!(v))))
        .into_shared()
}

fn keys(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|k| k.to_string()).collect()
}

fn setup(live: Vec<SharedSource>) -> (Arc<ContextRefresher>, Arc<SwappableLocator>) {
    let environment = Arc::new(Environment::new());
    for source in live {
        environment.add_last(source);
    }
    let locator = Arc::new(SwappableLocator::default());
    let refresher = Arc::new(ContextRefresher::new(
        environment,
        Arc::new(RefreshScope::new()),
        ConfigBootstrap::new().with_locator(locator.clone()),
    ));
    (refresher, locator)
}

#[test]
fn test_refresh_reports_added_changed_and_removed_keys() -> Result<()> {
    let (refresher, locator) = setup(vec![app_layer(&[("a", 1), ("b", 2)])]);
    locator.set(vec![app_layer(&[("b", 3), ("c", 4)])]);

    let changed = refresher.refresh()?;
    assert_eq!(changed, keys(&["a", "b", "c"]));

    let environment = refresher.environment();
    assert_eq!(environment.get_property("a"), None);
    assert_eq!(environment.get_property("b"), Some(json!(3)));
    assert_eq!(environment.get_property("c"), Some(json!(4)));

    // Nothing changed since the last run
    assert!(refresher.refresh()?.is_empty());
    Ok(())
}

#[test]
fn test_changed_and_added_keys_carry_new_values() -> Result<()> {
    let (refresher, locator) = setup(vec![app_layer(&[("a", 1), ("b", 2)])]);
    let before = refresher.extract();
    locator.set(vec![app_layer(&[("a", 1), ("b", 3), ("c", 4)])]);

    assert_eq!(refresher.refresh_environment()?, keys(&["b", "c"]));

    let changes = ctxhub::environment::diff(&before, &refresher.extract());
    assert_eq!(changes.len(), 2);
    assert_eq!(
        changes.get("b"),
        Some(&ctxhub::environment::PropertyChange::Updated(json!(3)))
    );
    assert_eq!(
        changes.get("c"),
        Some(&ctxhub::environment::PropertyChange::Updated(json!(4)))
    );
    Ok(())
}

#[test]
fn test_unrelated_layers_survive_refresh() -> Result<()> {
    let manual = MapPropertySource::from_pairs("manual", [("feature.flag", json!(true))]).into_shared();
    let defaults =
        MapPropertySource::from_pairs(DEFAULT_PROPERTIES_SOURCE, [("port", json!(80))]).into_shared();
    let (refresher, locator) = setup(vec![manual, app_layer(&[("a", 1)]), defaults]);
    locator.set(vec![app_layer(&[("a", 2)])]);

    assert_eq!(refresher.refresh_environment()?, keys(&["a"]));
    assert_eq!(
        refresher.environment().property_sources().names(),
        vec!["manual", "app", DEFAULT_PROPERTIES_SOURCE]
    );
    assert_eq!(refresher.environment().get_property("feature.flag"), Some(json!(true)));
    assert_eq!(refresher.environment().get_property("port"), Some(json!(80)));
    assert!(!refresher
        .environment()
        .property_sources()
        .contains(REFRESH_ARGS_SOURCE));
    Ok(())
}

#[test]
fn test_listeners_receive_event_and_failures_propagate() -> Result<()> {
    let (refresher, locator) = setup(vec![]);
    let seen: Arc<Mutex<Vec<EnvironmentChangeEvent>>> = Arc::default();

    let sink = seen.clone();
    refresher.add_listener(Arc::new(move |event: &EnvironmentChangeEvent| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    }));

    locator.set(vec![app_layer(&[("x", 1)])]);
    refresher.refresh_environment()?;
    {
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "application");
        assert_eq!(events[0].keys, keys(&["x"]));
    }

    refresher.add_listener(Arc::new(|_: &EnvironmentChangeEvent| -> Result<()> {
        Err(anyhow!("listener rejected change"))
    }));
    locator.set(vec![app_layer(&[("x", 2)])]);

    let err = refresher.refresh_environment().unwrap_err();
    assert_eq!(err.to_string(), "listener rejected change");
    // Reconciliation already happened
    assert_eq!(refresher.environment().get_property("x"), Some(json!(2)));
    Ok(())
}

#[test]
fn test_scope_is_only_invalidated_by_full_refresh() -> Result<()> {
    let (refresher, locator) = setup(vec![app_layer(&[("pool.size", 4)])]);
    let scope = refresher.scope().clone();

    let build = |refresher: &ContextRefresher| -> Result<Arc<i64>> {
        let environment = refresher.environment().clone();
        scope.get_or_create("pool", move || {
            Ok(environment.get_as::<i64>("pool.size")?.unwrap_or_default())
        })
    };

    assert_eq!(*build(&refresher)?, 4);

    locator.set(vec![app_layer(&[("pool.size", 8)])]);
    assert_eq!(refresher.refresh_environment()?, keys(&["pool.size"]));
    assert_eq!(*build(&refresher)?, 4);

    locator.set(vec![app_layer(&[("pool.size", 16)])]);
    refresher.refresh()?;
    assert!(!scope.contains("pool"));
    assert_eq!(*build(&refresher)?, 16);
    Ok(())
}

#[test]
fn test_file_documents_with_profiles() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(
        dir.path().join("application.toml"),
        "[server]\nport = 8080\nhost = \"localhost\"\n",
    )?;
    fs::write(
        dir.path().join("application-prod.yaml"),
        "server:\n  host: prod.example.org\nreplicas:\n  - eu\n  - us\n",
    )?;

    let environment = Arc::new(Environment::new());
    environment.set_active_profiles(["prod"]);
    let refresher = ContextRefresher::new(
        environment.clone(),
        Arc::new(RefreshScope::new()),
        ConfigBootstrap::new().with_locator(Arc::new(FilePropertySourceLocator::new(
            vec![dir.path().to_path_buf()],
            "application",
        ))),
    );

    let changed = refresher.refresh_environment()?;
    assert_eq!(
        changed,
        keys(&["replicas[0]", "replicas[1]", "server.host", "server.port"])
    );
    assert_eq!(environment.get_property("server.port"), Some(json!(8080)));
    assert_eq!(environment.get_property("server.host"), Some(json!("prod.example.org")));

    // A broken document aborts the refresh and keeps the current values
    fs::write(dir.path().join("application.toml"), "[server\nport = ")?;
    let err = refresher.refresh_environment().unwrap_err();
    assert!(matches!(
        ContextError::find(&err),
        Some(ContextError::RefreshFailed { .. })
    ));
    assert_eq!(environment.get_property("server.port"), Some(json!(8080)));
    Ok(())
}

#[test]
fn test_concurrent_refreshes_are_serialized() -> Result<()> {
    let locator = Arc::new(OverlapLocator::default());
    let refresher = Arc::new(ContextRefresher::new(
        Arc::new(Environment::new()),
        Arc::new(RefreshScope::new()),
        ConfigBootstrap::new().with_locator(locator.clone()),
    ));

    let threads = 6;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let refresher = refresher.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                if i % 2 == 0 {
                    refresher.refresh()
                } else {
                    refresher.refresh_environment()
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().map_err(|_| anyhow!("refresh thread panicked"))??;
    }

    assert_eq!(locator.calls.load(Ordering::SeqCst), threads);
    assert_eq!(locator.peak.load(Ordering::SeqCst), 1);
    Ok(())
}
