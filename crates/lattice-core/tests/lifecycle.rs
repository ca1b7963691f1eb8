mod common;

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use lattice_core::bundle::AbortCause;
use lattice_core::{BundleError, BundleEventKind, BundleState, FrameworkConfig, MemoryArchive};
use parking_lot::Mutex;
use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::json;

use common::{ScriptedActivator, TestRuntime, eventually};

/// An activator whose start signals `entered` and then blocks until
/// released (or five seconds pass).
fn blocking_start() -> (ScriptedActivator, mpsc::Receiver<()>, mpsc::Sender<()>) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    let activator = ScriptedActivator::new().on_start(move |_| {
        let _ = entered_tx.lock().send(());
        let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
        Ok(())
    });
    (activator, entered_rx, release_tx)
}

#[test]
fn start_and_stop_emit_paired_events() {
    let runtime = TestRuntime::start();
    let bundle = runtime.install_plain("org.example.paired");
    // Resolve once so the recorded start shows only the activation.
    bundle.start().unwrap();
    bundle.stop().unwrap();

    let events = runtime.record_bundle_events(&bundle);
    bundle.start().unwrap();
    assert_eq!(*events.lock(), vec![BundleEventKind::Starting, BundleEventKind::Started]);

    events.lock().clear();
    bundle.stop().unwrap();
    assert_eq!(*events.lock(), vec![BundleEventKind::Stopping, BundleEventKind::Stopped]);
}

#[test]
fn repeated_start_and_stop_are_silent() {
    let runtime = TestRuntime::start();
    let activator = ScriptedActivator::new();
    let calls = activator.calls.clone();
    let bundle = runtime.install_with("org.example.idempotent", activator);
    bundle.start().unwrap();

    let events = runtime.record_bundle_events(&bundle);
    bundle.start().unwrap();
    assert!(events.lock().is_empty());
    assert_eq!(bundle.state(), BundleState::Active);

    bundle.stop().unwrap();
    events.lock().clear();
    bundle.stop().unwrap();
    assert!(events.lock().is_empty());
    assert_eq!(bundle.state(), BundleState::Resolved);
    assert_eq!(*calls.lock(), vec!["start", "stop"]);
}

#[test]
fn duplicate_identity_at_another_location_is_rejected() {
    let runtime = TestRuntime::start();
    let first = runtime.install("A", "1.0.0", false);
    first.start().unwrap();

    let archive = MemoryArchive::from_json(&json!({ "bundle.symbolic_name": "A", "bundle.version": "1.0.0" })).unwrap();
    let err = runtime.framework.install_bundle("elsewhere:A", Arc::new(archive)).unwrap_err();
    assert!(matches!(
        err.as_bundle_error(),
        Some(BundleError::DuplicateBundle { existing_id, .. }) if *existing_id == first.id()
    ));
    assert_eq!(first.state(), BundleState::Active);
    assert!(runtime.framework.core().bundles().by_location("elsewhere:A").is_none());
}

#[test]
fn blocked_start_times_out_without_deadlock() {
    let config = FrameworkConfig::new().with_start_stop_timeout(Duration::from_millis(50));
    let runtime = TestRuntime::start_with(config);
    let (activator, _entered, release) = blocking_start();
    let bundle = runtime.install_with("org.example.stuck", activator);

    let started = Instant::now();
    let err = bundle.start().unwrap_err();
    let waited = started.elapsed();
    assert_eq!(err.abort_cause(), Some(AbortCause::Timeout));
    assert!(waited >= Duration::from_millis(50));
    assert!(waited < Duration::from_secs(2), "start waited {waited:?}");
    assert_eq!(bundle.state(), BundleState::Resolved);

    // The stuck worker does not hold up the rest of the framework.
    let other = runtime.install_plain("org.example.unaffected");
    other.start().unwrap();
    runtime.framework.stop().unwrap();
    assert_eq!(runtime.framework.state(), BundleState::Resolved);
    let _ = release.send(());
}

#[test]
fn uninstall_from_another_thread_cuts_start_short() {
    let runtime = TestRuntime::start();
    let (activator, entered, release) = blocking_start();
    let bundle = runtime.install_with("org.example.interrupted", activator);
    let events = runtime.record_bundle_events(&bundle);

    let starter = bundle.clone();
    let handle = thread::spawn(move || starter.start());
    entered.recv_timeout(Duration::from_secs(5)).unwrap();

    bundle.uninstall().unwrap();
    let err = handle.join().unwrap().unwrap_err();
    assert!(matches!(err, BundleError::Aborted { cause: AbortCause::Uninstalled, .. }));
    assert_eq!(bundle.state(), BundleState::Uninstalled);
    assert!(runtime.framework.bundle(bundle.id()).is_none());

    let seen = events.lock().clone();
    assert!(!seen.contains(&BundleEventKind::Started));
    assert!(seen.ends_with(&[BundleEventKind::Unresolved, BundleEventKind::Uninstalled]), "events: {seen:?}");

    // The released activator finishing late changes nothing.
    release.send(()).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(bundle.state(), BundleState::Uninstalled);
}

#[test]
fn uninstall_from_own_activator_is_deferred() {
    let runtime = TestRuntime::start();
    let outcome = Arc::new(Mutex::new(None));
    let recorder = outcome.clone();
    let activator = ScriptedActivator::new().on_start(move |ctx| {
        *recorder.lock() = Some(ctx.bundle()?.uninstall().is_ok());
        Ok(())
    });
    let bundle = runtime.install_with("org.example.selfdestruct", activator);

    match bundle.start() {
        Ok(()) => {}
        Err(err) => assert_eq!(err.abort_cause(), Some(AbortCause::Uninstalled)),
    }
    // The abandoned activator may still be returning from uninstall().
    assert!(eventually(Duration::from_secs(2), || outcome.lock().is_some()));
    assert_eq!(*outcome.lock(), Some(true));
    assert_eq!(bundle.state(), BundleState::Uninstalled);
    assert!(runtime.framework.bundle(bundle.id()).is_none());
}

#[test]
fn uninstall_deletes_the_data_directory() {
    let storage = tempfile::tempdir().unwrap();
    let runtime = TestRuntime::start_with(FrameworkConfig::new().with_storage_location(storage.path()));
    let bundle = runtime.install_plain("org.example.persistent");
    bundle.start().unwrap();

    let file = bundle.bundle_context().unwrap().data_file("state.json").unwrap();
    std::fs::write(&file, b"{}").unwrap();
    let data_dir = file.parent().unwrap().to_path_buf();
    assert!(data_dir.starts_with(storage.path()));
    assert!(file.exists());

    bundle.uninstall().unwrap();
    assert!(!data_dir.exists());
    assert!(storage.path().exists());
}

#[test]
fn stopping_a_library_unresolves_nothing_until_uninstall() {
    let runtime = TestRuntime::start();
    let library = runtime.install_plain("org.example.lib");
    let archive = MemoryArchive::from_json(&json!({
        "bundle.symbolic_name": "org.example.app",
        "bundle.requires": ["org.example.lib"]
    }))
    .unwrap();
    let app = runtime.framework.install_bundle("static:org.example.app", Arc::new(archive)).unwrap();
    app.start().unwrap();
    library.start().unwrap();
    library.stop().unwrap();
    assert_eq!(app.state(), BundleState::Active);

    app.stop().unwrap();
    library.uninstall().unwrap();
    assert_eq!(app.state(), BundleState::Installed);
    assert!(matches!(app.start().unwrap_err(), BundleError::Resolve { .. }));
}

#[test]
fn shuffled_concurrent_start_stop_settles() {
    let runtime = TestRuntime::start();
    let bundles: Vec<_> = (0..8).map(|i| runtime.install_plain(&format!("org.example.churn{i}"))).collect();
    let failures = Arc::new(Mutex::new(Vec::new()));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let mut order = bundles.clone();
            let failures = failures.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..20 {
                    order.shuffle(&mut rng);
                    for bundle in &order {
                        let result = if rng.gen_bool(0.5) { bundle.start() } else { bundle.stop() };
                        if let Err(err) = result {
                            failures.lock().push(err.to_string());
                        }
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(failures.lock().is_empty(), "failures: {:?}", failures.lock());
    assert!(
        bundles
            .iter()
            .all(|b| matches!(b.state(), BundleState::Active | BundleState::Resolved))
    );

    runtime.framework.stop().unwrap();
    assert!(bundles.iter().all(|b| b.state() == BundleState::Resolved));
}

#[test]
fn framework_stop_races_bundle_starts() {
    let runtime = TestRuntime::start();
    let bundles: Vec<_> = (0..6).map(|i| runtime.install_plain(&format!("org.example.race{i}"))).collect();
    let unexpected = Arc::new(Mutex::new(Vec::new()));

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let mut order = bundles.clone();
            let unexpected = unexpected.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..30 {
                    order.shuffle(&mut rng);
                    for bundle in &order {
                        match bundle.start() {
                            Ok(()) | Err(BundleError::FrameworkStopping { .. }) => {}
                            Err(err) => unexpected.lock().push(err.to_string()),
                        }
                    }
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(10));
    runtime.framework.stop().unwrap();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(unexpected.lock().is_empty(), "unexpected: {:?}", unexpected.lock());
    assert!(bundles.iter().all(|b| b.state() != BundleState::Active));
    assert_eq!(runtime.framework.state(), BundleState::Resolved);
}
