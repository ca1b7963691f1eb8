use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use crate::bundle::{
    AbortCause, ActivatorPhase, Bundle, BundleActivator, BundleContext, BundleError, BundleState, MemoryArchive,
    StartOptions, StaticModuleLoader, StopOptions,
};
use crate::kernel::guard::BoxError;
use crate::kernel::{Framework, FrameworkBuilder};
use crate::properties::Properties;

type Hook = Arc<dyn Fn(&BundleContext) -> Result<(), BoxError> + Send + Sync>;

fn noop() -> Hook {
    Arc::new(|_| Ok(()))
}

/// Activator whose callbacks are supplied by the test.
#[derive(Clone)]
struct Scripted {
    calls: Arc<Mutex<Vec<&'static str>>>,
    on_start: Hook,
    on_stop: Hook,
}

impl Scripted {
    fn new() -> Self {
        Self { calls: Arc::new(Mutex::new(Vec::new())), on_start: noop(), on_stop: noop() }
    }

    fn on_start(mut self, hook: impl Fn(&BundleContext) -> Result<(), BoxError> + Send + Sync + 'static) -> Self {
        self.on_start = Arc::new(hook);
        self
    }

    fn on_stop(mut self, hook: impl Fn(&BundleContext) -> Result<(), BoxError> + Send + Sync + 'static) -> Self {
        self.on_stop = Arc::new(hook);
        self
    }
}

impl BundleActivator for Scripted {
    fn start(&mut self, context: &BundleContext) -> Result<(), BoxError> {
        self.calls.lock().push("start");
        (self.on_start)(context)
    }

    fn stop(&mut self, context: &BundleContext) -> Result<(), BoxError> {
        self.calls.lock().push("stop");
        (self.on_stop)(context)
    }
}

struct Harness {
    framework: Framework,
    loader: Arc<StaticModuleLoader>,
}

impl Harness {
    fn new() -> Self {
        Self::with(Framework::builder())
    }

    fn with(builder: FrameworkBuilder) -> Self {
        let loader = Arc::new(StaticModuleLoader::new());
        let framework = builder.loader(loader.clone()).build().unwrap();
        framework.start().unwrap();
        Self { framework, loader }
    }

    fn install(&self, headers: serde_json::Value) -> Bundle {
        let name = headers["bundle.symbolic_name"].as_str().unwrap().to_string();
        let archive = MemoryArchive::from_json(&headers).unwrap();
        self.framework.install_bundle(&format!("static:{name}"), Arc::new(archive)).unwrap()
    }

    fn install_plain(&self, name: &str) -> Bundle {
        self.install(json!({ "bundle.symbolic_name": name }))
    }

    fn install_active(&self, name: &str, activator: Scripted) -> Bundle {
        self.loader.register(format!("static:{name}"), move || activator.clone());
        self.install(json!({ "bundle.symbolic_name": name, "bundle.activator": true }))
    }
}

#[test]
fn test_activator_start_and_stop() {
    let harness = Harness::new();
    let activator = Scripted::new();
    let calls = activator.calls.clone();
    let bundle = harness.install_active("org.example.simple", activator);
    assert_eq!(bundle.state(), BundleState::Installed);
    assert!(bundle.bundle_context().is_none());

    bundle.start().unwrap();
    assert_eq!(bundle.state(), BundleState::Active);
    assert!(bundle.bundle_context().is_some_and(|ctx| ctx.is_valid()));
    assert_eq!(bundle.autostart_setting(), 0);

    // Starting an active bundle does nothing.
    bundle.start().unwrap();
    assert_eq!(*calls.lock(), vec!["start"]);

    let context = bundle.bundle_context().unwrap();
    bundle.stop().unwrap();
    assert_eq!(bundle.state(), BundleState::Resolved);
    assert!(!context.is_valid());
    assert!(bundle.bundle_context().is_none());
    assert_eq!(bundle.autostart_setting(), -1);
    assert_eq!(*calls.lock(), vec!["start", "stop"]);

    // Stopping a resolved bundle does nothing.
    bundle.stop().unwrap();
    assert_eq!(*calls.lock(), vec!["start", "stop"]);
}

#[test]
fn test_transient_options_keep_autostart() {
    let harness = Harness::new();
    let bundle = harness.install_plain("org.example.transient");
    bundle.start_with(StartOptions::transient()).unwrap();
    assert_eq!(bundle.autostart_setting(), -1);
    bundle.stop().unwrap();

    bundle.start().unwrap();
    bundle.stop_with(StopOptions::transient()).unwrap();
    assert_eq!(bundle.autostart_setting(), 0);
}

#[test]
fn test_failed_start_rolls_back() {
    let harness = Harness::new();
    let activator = Scripted::new().on_start(|ctx| {
        ctx.register(Arc::new(7u32), Properties::new())?;
        ctx.add_bundle_listener(|_| Ok(()))?;
        Err("refusing to start".into())
    });
    let bundle = harness.install_active("org.example.failing", activator);

    let err = bundle.start().unwrap_err();
    match &err {
        BundleError::ActivatorFailed { phase: ActivatorPhase::Start, source, .. } => {
            assert_eq!(source.to_string(), "refusing to start");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(bundle.state(), BundleState::Resolved);
    assert!(bundle.bundle_context().is_none());
    assert!(harness.framework.core().services().is_empty());
    assert_eq!(harness.framework.core().listeners().bundle_listener_count(), 0);
}

#[test]
fn test_panicking_activator_is_contained() {
    let harness = Harness::new();
    let activator = Scripted::new().on_start(|_| panic!("activator blew up"));
    let bundle = harness.install_active("org.example.panicking", activator);

    let err = bundle.start().unwrap_err();
    assert!(matches!(err, BundleError::ActivatorFailed { phase: ActivatorPhase::Start, .. }));
    assert!(err.to_string().contains("activator blew up"), "unexpected message: {err}");
    assert_eq!(bundle.state(), BundleState::Resolved);
}

#[test]
fn test_failed_stop_still_releases_resources() {
    let harness = Harness::new();
    let activator = Scripted::new()
        .on_start(|ctx| {
            ctx.register(Arc::new("svc".to_string()), Properties::new())?;
            Ok(())
        })
        .on_stop(|_| Err("stop failed".into()));
    let bundle = harness.install_active("org.example.badstop", activator);
    bundle.start().unwrap();
    assert_eq!(harness.framework.core().services().len(), 1);

    let err = bundle.stop().unwrap_err();
    assert!(matches!(err, BundleError::ActivatorFailed { phase: ActivatorPhase::Stop, .. }));
    assert_eq!(bundle.state(), BundleState::Resolved);
    assert!(harness.framework.core().services().is_empty());
}

#[test]
fn test_missing_module_fails_start() {
    let harness = Harness::new();
    let bundle = harness.install(json!({ "bundle.symbolic_name": "org.example.nomodule", "bundle.activator": true }));
    let err = bundle.start().unwrap_err();
    assert!(matches!(err, BundleError::Load { .. }));
    assert_eq!(bundle.state(), BundleState::Resolved);
}

#[test]
fn test_system_bundle_cannot_be_uninstalled() {
    let harness = Harness::new();
    let err = harness.framework.system_bundle().uninstall().unwrap_err();
    assert!(matches!(err, BundleError::IllegalState { bundle_id: 0, .. }));
    assert_eq!(harness.framework.state(), BundleState::Active);
}

#[test]
fn test_uninstalled_bundle_rejects_operations() {
    let harness = Harness::new();
    let archive = Arc::new(MemoryArchive::from_json(&json!({ "bundle.symbolic_name": "org.example.gone" })).unwrap());
    let bundle = harness.framework.install_bundle("memory:gone", archive.clone()).unwrap();
    bundle.start().unwrap();

    bundle.uninstall().unwrap();
    assert_eq!(bundle.state(), BundleState::Uninstalled);
    assert!(archive.is_purged());
    assert!(harness.framework.bundle(bundle.id()).is_none());
    assert!(harness.framework.core().bundles().by_location("memory:gone").is_none());

    assert!(matches!(bundle.start().unwrap_err(), BundleError::IllegalState { .. }));
    assert!(matches!(bundle.stop().unwrap_err(), BundleError::IllegalState { .. }));
    assert!(matches!(bundle.uninstall().unwrap_err(), BundleError::IllegalState { .. }));
}

#[test]
fn test_start_from_activator_stop_is_a_logic_error() {
    let harness = Harness::new();
    let seen = Arc::new(Mutex::new(None));
    let recorder = seen.clone();
    let activator = Scripted::new().on_stop(move |ctx| {
        let bundle = ctx.bundle()?;
        *recorder.lock() = bundle.start().err();
        Ok(())
    });
    let bundle = harness.install_active("org.example.restart", activator);
    bundle.start().unwrap();
    bundle.stop().unwrap();

    assert!(matches!(seen.lock().take(), Some(BundleError::Logic { .. })));
    assert_eq!(bundle.state(), BundleState::Resolved);
}

#[test]
fn test_reentrant_calls_from_activator_start() {
    let harness = Harness::new();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let recorder = outcomes.clone();
    let activator = Scripted::new().on_start(move |ctx| {
        let bundle = ctx.bundle()?;
        recorder.lock().push(bundle.start().is_ok());
        recorder.lock().push(matches!(bundle.stop(), Err(BundleError::IllegalState { .. })));
        Ok(())
    });
    let bundle = harness.install_active("org.example.reentrant", activator);

    bundle.start().unwrap();
    assert_eq!(*outcomes.lock(), vec![true, true]);
    assert_eq!(bundle.state(), BundleState::Active);
}

#[test]
fn test_validator_rejects_start() {
    let harness = Harness::with(Framework::builder().validator(|bundle| Ok(bundle.symbolic_name() != "org.example.blocked")));
    let allowed = harness.install_plain("org.example.allowed");
    let blocked = harness.install_plain("org.example.blocked");

    allowed.start().unwrap();
    let err = blocked.start().unwrap_err();
    assert!(matches!(err, BundleError::Security { source: None, .. }));
    assert_eq!(blocked.state(), BundleState::Resolved);
}

#[test]
fn test_failing_validator_carries_its_error() {
    let harness = Harness::with(Framework::builder().validator(|_| Err("no verdict".into())));
    let bundle = harness.install_plain("org.example.unverified");
    let err = bundle.start().unwrap_err();
    assert!(matches!(err, BundleError::Security { source: Some(_), .. }));
}

#[test]
fn test_required_bundles_gate_resolution() {
    let harness = Harness::new();
    let dependent = harness.install(json!({
        "bundle.symbolic_name": "org.example.app",
        "bundle.requires": "org.example.lib"
    }));

    let err = dependent.start().unwrap_err();
    assert!(matches!(err, BundleError::Resolve { .. }));
    assert_eq!(dependent.state(), BundleState::Installed);

    let library = harness.install_plain("org.example.lib");
    dependent.start().unwrap();
    dependent.stop().unwrap();
    assert_eq!(dependent.state(), BundleState::Resolved);

    library.uninstall().unwrap();
    assert_eq!(dependent.state(), BundleState::Installed);
}

#[test]
fn test_start_timeout_rolls_back() {
    let harness = Harness::new();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));
    let activator = Scripted::new().on_start(move |_| {
        let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
        Ok(())
    });
    let bundle = harness.install_active("org.example.slow", activator);

    let err = bundle.start_with(StartOptions::default().with_timeout(Duration::from_millis(50))).unwrap_err();
    assert!(matches!(err, BundleError::Aborted { phase: ActivatorPhase::Start, cause: AbortCause::Timeout, .. }));
    assert_eq!(err.abort_cause(), Some(AbortCause::Timeout));
    assert_eq!(bundle.state(), BundleState::Resolved);
    assert!(bundle.bundle_context().is_none());

    // The abandoned activator finishing late does not revive the bundle.
    release_tx.send(()).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(bundle.state(), BundleState::Resolved);
}

/// Activator that logs under its construction number. Instance #1 blocks
/// in the callback named by `blocking` until instance #2 releases it.
struct Numbered {
    number: usize,
    blocking: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    release: Arc<(Mutex<bool>, parking_lot::Condvar)>,
}

impl Numbered {
    fn record(&self, what: &str) {
        self.log.lock().push(format!("{what}#{}", self.number));
    }

    fn block_until_released(&self) {
        let (released, cond) = &*self.release;
        let mut released = released.lock();
        if !*released {
            cond.wait_for(&mut released, Duration::from_secs(5));
        }
    }

    fn release_first(&self) {
        let (released, cond) = &*self.release;
        *released.lock() = true;
        cond.notify_all();
    }

    fn wait_for_first(&self, entry: &str) {
        for _ in 0..400 {
            if self.log.lock().iter().any(|e| e == entry) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl BundleActivator for Numbered {
    fn start(&mut self, context: &BundleContext) -> Result<(), BoxError> {
        self.record("start");
        if self.number == 1 && self.blocking == "start" {
            self.block_until_released();
            self.record("start done");
        } else if self.number == 2 && self.blocking == "start" {
            self.release_first();
            self.wait_for_first("start done#1");
            context.register(Arc::new(self.number), Properties::new())?;
            self.record("start done");
        } else if self.number == 2 {
            context.register(Arc::new(self.number), Properties::new())?;
            self.record("start done");
            self.release_first();
        }
        Ok(())
    }

    fn stop(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
        self.record("stop");
        if self.number == 1 && self.blocking == "stop" {
            self.block_until_released();
            self.record("stop done");
        }
        Ok(())
    }
}

fn install_numbered(harness: &Harness, name: &str, blocking: &'static str) -> (Bundle, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let release = Arc::new((Mutex::new(false), parking_lot::Condvar::new()));
    let built = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let shared_log = log.clone();
    harness.loader.register(format!("static:{name}"), move || Numbered {
        number: built.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1,
        blocking,
        log: shared_log.clone(),
        release: release.clone(),
    });
    let bundle = harness.install(json!({ "bundle.symbolic_name": name, "bundle.activator": true }));
    (bundle, log)
}

#[test]
fn test_restart_after_start_timeout_keeps_new_activator() {
    let harness = Harness::new();
    let (bundle, log) = install_numbered(&harness, "org.example.retried", "start");

    let err = bundle.start_with(StartOptions::default().with_timeout(Duration::from_millis(50))).unwrap_err();
    assert_eq!(err.abort_cause(), Some(AbortCause::Timeout));

    bundle.start().unwrap();
    assert_eq!(bundle.state(), BundleState::Active);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(bundle.state(), BundleState::Active);
    assert_eq!(bundle.registered_services().len(), 1);

    bundle.stop().unwrap();
    assert_eq!(bundle.state(), BundleState::Resolved);
    assert_eq!(*log.lock(), vec!["start#1", "start#2", "start done#1", "start done#2", "stop#2"]);
}

#[test]
fn test_restart_after_stop_timeout_survives_late_stop() {
    let harness = Harness::new();
    let (bundle, log) = install_numbered(&harness, "org.example.lingering", "stop");
    bundle.start().unwrap();

    let err = bundle.stop_with(StopOptions::default().with_timeout(Duration::from_millis(50))).unwrap_err();
    assert_eq!(err.abort_cause(), Some(AbortCause::Timeout));
    assert_eq!(bundle.state(), BundleState::Resolved);

    bundle.start().unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !log.lock().iter().any(|e| e == "stop done#1") && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(bundle.state(), BundleState::Active);
    assert!(bundle.bundle_context().is_some_and(|ctx| ctx.is_valid()));
    assert_eq!(bundle.registered_services().len(), 1);
    assert_eq!(*log.lock(), vec!["start#1", "stop#1", "start#2", "start done#2", "stop done#1"]);
}

#[test]
fn test_duplicate_identity_is_rejected() {
    let harness = Harness::new();
    let first = harness.install(json!({ "bundle.symbolic_name": "org.example.dup", "bundle.version": "1.0" }));
    let again = harness.install(json!({ "bundle.symbolic_name": "org.example.dup", "bundle.version": "1.0" }));
    assert_eq!(first, again);

    let archive = MemoryArchive::from_json(&json!({ "bundle.symbolic_name": "org.example.dup", "bundle.version": "1" }));
    let err = harness.framework.install_bundle("other:dup", Arc::new(archive.unwrap())).unwrap_err();
    match err.as_bundle_error() {
        Some(BundleError::DuplicateBundle { existing_id, .. }) => assert_eq!(*existing_id, first.id()),
        other => panic!("unexpected error: {other:?}"),
    }

    let newer = MemoryArchive::from_json(&json!({ "bundle.symbolic_name": "org.example.dup", "bundle.version": "2" }));
    let second = harness.framework.install_bundle("other:dup2", Arc::new(newer.unwrap())).unwrap();
    assert_eq!(harness.framework.core().bundles().by_symbolic_name("org.example.dup"), vec![first, second]);
}

#[test]
fn test_bundle_property_falls_back_to_framework() {
    let harness = Harness::new();
    let bundle = harness.install(json!({ "bundle.symbolic_name": "org.example.props", "bundle.name": "Props" }));
    assert_eq!(bundle.property("bundle.name"), Some(json!("Props")));
    assert!(bundle.property("org.lattice.framework.version").is_some());
    assert_eq!(bundle.property("no.such.key"), None);
    assert_eq!(bundle.to_string(), format!("org.example.props [{}]", bundle.id()));
}
