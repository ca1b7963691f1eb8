use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use crate::bundle::archive::BundleArchive;
use crate::bundle::{Bundle, BundleActivator, BundleContext, BundleError, BundleState, MemoryArchive, StaticModuleLoader};
use crate::event::FrameworkEventKind;
use crate::kernel::constants::PROP_FRAMEWORK_VERSION;
use crate::kernel::guard::BoxError;
use crate::kernel::{DiagnosticLog, Framework, FrameworkConfig};

struct OrderRecorder {
    name: &'static str,
    stops: Arc<Mutex<Vec<&'static str>>>,
}

impl BundleActivator for OrderRecorder {
    fn start(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
        Ok(())
    }

    fn stop(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
        self.stops.lock().push(self.name);
        Ok(())
    }
}

struct Refuser;

impl BundleActivator for Refuser {
    fn start(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
        Err("not today".into())
    }

    fn stop(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
        Ok(())
    }
}

fn framework_with(loader: Arc<StaticModuleLoader>) -> Framework {
    Framework::builder().loader(loader).build().unwrap()
}

fn install(framework: &Framework, name: &str, activator: bool) -> Bundle {
    let archive = MemoryArchive::from_json(&json!({ "bundle.symbolic_name": name, "bundle.activator": activator }));
    framework.install_bundle(&format!("static:{name}"), Arc::new(archive.unwrap())).unwrap()
}

#[test]
fn test_init_start_stop_states() {
    let framework = framework_with(Arc::new(StaticModuleLoader::new()));
    assert_eq!(framework.state(), BundleState::Installed);
    assert!(framework.bundle_context().is_none());
    assert_eq!(framework.system_bundle().id(), 0);
    assert_eq!(framework.system_bundle().symbolic_name(), "system_bundle");

    framework.init().unwrap();
    assert_eq!(framework.state(), BundleState::Resolved);
    let init_context = framework.bundle_context().unwrap();

    framework.start().unwrap();
    assert_eq!(framework.state(), BundleState::Active);
    assert_eq!(framework.bundle_context(), Some(init_context.clone()));

    // A second start does nothing.
    framework.start().unwrap();

    framework.stop().unwrap();
    assert_eq!(framework.state(), BundleState::Resolved);
    assert!(framework.bundle_context().is_none());
    assert!(!init_context.is_valid());

    // Stopping a stopped framework does nothing.
    framework.stop().unwrap();
}

#[test]
fn test_restart_creates_fresh_system_context() {
    let framework = framework_with(Arc::new(StaticModuleLoader::new()));
    framework.start().unwrap();
    let first = framework.bundle_context().unwrap();
    framework.stop().unwrap();
    framework.start().unwrap();
    let second = framework.bundle_context().unwrap();
    assert_ne!(first.id(), second.id());

    let bundle = install(&framework, "after.restart", false);
    bundle.start().unwrap();
    assert_eq!(bundle.state(), BundleState::Active);
}

#[test]
fn test_system_bundle_handle_drives_framework() {
    let framework = framework_with(Arc::new(StaticModuleLoader::new()));
    framework.system_bundle().start().unwrap();
    assert_eq!(framework.state(), BundleState::Active);
    framework.system_bundle().stop().unwrap();
    assert_eq!(framework.state(), BundleState::Resolved);
}

#[test]
fn test_bundles_cannot_start_while_framework_down() {
    let framework = framework_with(Arc::new(StaticModuleLoader::new()));
    let bundle = install(&framework, "too.early", false);
    assert!(matches!(bundle.start().unwrap_err(), BundleError::FrameworkStopping { .. }));

    framework.start().unwrap();
    framework.stop().unwrap();
    assert!(matches!(bundle.start().unwrap_err(), BundleError::FrameworkStopping { .. }));
    assert_eq!(bundle.state(), BundleState::Installed);
}

#[test]
fn test_stop_order_is_reverse_of_install() {
    let loader = Arc::new(StaticModuleLoader::new());
    let stops = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second", "third"] {
        let stops = stops.clone();
        loader.register(format!("static:{name}"), move || OrderRecorder { name, stops: stops.clone() });
    }
    let framework = framework_with(loader);
    framework.start().unwrap();
    for name in ["first", "second", "third"] {
        install(&framework, name, true).start().unwrap();
    }

    framework.stop().unwrap();
    assert_eq!(*stops.lock(), vec!["third", "second", "first"]);
    assert!(framework.bundles().iter().all(|b| b.state() == BundleState::Resolved));
}

#[test]
fn test_autostart_survives_framework_restart() {
    let framework = framework_with(Arc::new(StaticModuleLoader::new()));
    framework.start().unwrap();
    let persistent = install(&framework, "persistent", false);
    let stopped = install(&framework, "stopped", false);
    let transient = install(&framework, "transient", false);
    persistent.start().unwrap();
    stopped.start().unwrap();
    stopped.stop().unwrap();
    transient.start_with(crate::bundle::StartOptions::transient()).unwrap();

    framework.stop().unwrap();
    assert_eq!(persistent.autostart_setting(), 0);
    assert_eq!(persistent.state(), BundleState::Resolved);

    framework.start().unwrap();
    assert_eq!(persistent.state(), BundleState::Active);
    assert_eq!(stopped.state(), BundleState::Resolved);
    assert_eq!(transient.state(), BundleState::Resolved);
}

#[test]
fn test_autostart_failure_is_reported_not_fatal() {
    let loader = Arc::new(StaticModuleLoader::new());
    loader.register("static:refuser", || Refuser);
    let framework = framework_with(loader);
    let archive = MemoryArchive::from_json(&json!({ "bundle.symbolic_name": "refuser", "bundle.activator": true })).unwrap();
    archive.set_autostart_setting(0);
    let bundle = framework.install_bundle("static:refuser", Arc::new(archive)).unwrap();

    framework.init().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();
    framework
        .bundle_context()
        .unwrap()
        .add_framework_listener(move |event| {
            recorder.lock().push((event.kind(), event.bundle().map(Bundle::id)));
            Ok(())
        })
        .unwrap();

    framework.start().unwrap();
    assert_eq!(framework.state(), BundleState::Active);
    assert_eq!(bundle.state(), BundleState::Resolved);
    assert_eq!(
        *events.lock(),
        vec![(FrameworkEventKind::Error, Some(bundle.id())), (FrameworkEventKind::Started, Some(0))]
    );
}

#[test]
fn test_stopped_event_reaches_listeners() {
    let framework = framework_with(Arc::new(StaticModuleLoader::new()));
    framework.start().unwrap();
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let recorder = kinds.clone();
    framework
        .bundle_context()
        .unwrap()
        .add_framework_listener(move |event| {
            recorder.lock().push(event.kind());
            Ok(())
        })
        .unwrap();

    framework.stop().unwrap();
    assert_eq!(*kinds.lock(), vec![FrameworkEventKind::Stopped]);
    assert_eq!(framework.core().listeners().framework_listener_count(), 0);
}

#[test]
fn test_wait_for_stop() {
    let framework = framework_with(Arc::new(StaticModuleLoader::new()));
    // Not running: returns at once
    assert_eq!(framework.wait_for_stop(None).kind(), FrameworkEventKind::Stopped);

    framework.start().unwrap();
    let timed_out = framework.wait_for_stop(Some(Duration::from_millis(30)));
    assert_eq!(timed_out.kind(), FrameworkEventKind::WaitTimedOut);

    let stopper = framework.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        stopper.stop().unwrap();
    });
    let event = framework.wait_for_stop(None);
    assert_eq!(event.kind(), FrameworkEventKind::Stopped);
    assert_eq!(event.bundle().map(Bundle::id), Some(0));
    handle.join().unwrap();

    // The stop event stays available until the next start.
    assert_eq!(framework.wait_for_stop(Some(Duration::from_millis(10))).kind(), FrameworkEventKind::Stopped);
}

#[test]
fn test_framework_properties_and_storage() {
    let storage = tempfile::tempdir().unwrap();
    let config = FrameworkConfig::new()
        .with_property("app.mode", json!("test"))
        .with_storage_location(storage.path());
    let framework = Framework::builder()
        .config(config)
        .loader(Arc::new(StaticModuleLoader::new()))
        .build()
        .unwrap();

    assert_eq!(framework.property("app.mode"), Some(json!("test")));
    assert!(framework.property(PROP_FRAMEWORK_VERSION).is_some());
    assert_eq!(framework.properties().get("APP.MODE"), Some(&json!("test")));
    assert_eq!(framework.core().bundle_data_dir(3), Some(storage.path().join("3").join("data")));

    framework.start().unwrap();
    let ctx = framework.bundle_context().unwrap();
    assert_eq!(ctx.property("app.mode").unwrap(), Some(json!("test")));
    let file = ctx.data_file("state.json").unwrap();
    assert!(file.parent().is_some_and(|dir| dir.is_dir()));
}

#[test]
fn test_data_file_without_storage() {
    let framework = framework_with(Arc::new(StaticModuleLoader::new()));
    framework.start().unwrap();
    let err = framework.bundle_context().unwrap().data_file("x").unwrap_err();
    assert!(matches!(err.as_bundle_error(), Some(BundleError::NoStorage)));
}

#[test]
fn test_install_bundle_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("manifest.json"), r#"{ "bundle.symbolic_name": "from.disk" }"#).unwrap();
    let framework = framework_with(Arc::new(StaticModuleLoader::new()));
    let bundle = framework.install_bundle_dir(dir.path()).unwrap();
    assert_eq!(bundle.symbolic_name(), "from.disk");
    assert_eq!(bundle.location(), dir.path().display().to_string());
    assert_eq!(framework.bundles().len(), 2);
}

#[test]
fn test_diagnostic_log_is_bounded() {
    let log = DiagnosticLog::new(2);
    log.record("one");
    log.record("two");
    log.record("three");
    assert_eq!(log.entries(), vec!["two".to_string(), "three".to_string()]);
    log.clear();
    assert!(log.is_empty());

    let silent = DiagnosticLog::new(0);
    silent.record("dropped");
    assert_eq!(silent.len(), 0);
}

#[test]
fn test_diagnostics_capacity_from_config() {
    let config = FrameworkConfig { diagnostics_capacity: 1, ..FrameworkConfig::default() };
    let framework = Framework::builder()
        .config(config)
        .loader(Arc::new(StaticModuleLoader::new()))
        .build()
        .unwrap();
    framework.start().unwrap();
    let ctx = framework.bundle_context().unwrap();
    ctx.add_framework_listener(|_| Err("first".into())).unwrap();
    ctx.add_framework_listener(|_| Err("second".into())).unwrap();

    framework.core().report(FrameworkEventKind::Info, None, "ping".to_string(), None);
    let entries = framework.diagnostics().entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains("second"));
}
