#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lattice_core::{
    BoxError, Bundle, BundleActivator, BundleContext, BundleEventKind, Framework, FrameworkConfig, FrameworkEventKind,
    MemoryArchive, StaticModuleLoader,
};
use parking_lot::Mutex;
use serde_json::json;

type Hook = Arc<dyn Fn(&BundleContext) -> Result<(), BoxError> + Send + Sync>;

/// Activator driven by closures supplied per test.
#[derive(Clone)]
pub struct ScriptedActivator {
    pub calls: Arc<Mutex<Vec<&'static str>>>,
    on_start: Option<Hook>,
    on_stop: Option<Hook>,
}

impl ScriptedActivator {
    pub fn new() -> Self {
        Self { calls: Arc::new(Mutex::new(Vec::new())), on_start: None, on_stop: None }
    }

    pub fn on_start(mut self, hook: impl Fn(&BundleContext) -> Result<(), BoxError> + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    pub fn on_stop(mut self, hook: impl Fn(&BundleContext) -> Result<(), BoxError> + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Arc::new(hook));
        self
    }
}

impl BundleActivator for ScriptedActivator {
    fn start(&mut self, context: &BundleContext) -> Result<(), BoxError> {
        self.calls.lock().push("start");
        match &self.on_start {
            Some(hook) => hook(context),
            None => Ok(()),
        }
    }

    fn stop(&mut self, context: &BundleContext) -> Result<(), BoxError> {
        self.calls.lock().push("stop");
        match &self.on_stop {
            Some(hook) => hook(context),
            None => Ok(()),
        }
    }
}

/// A started framework whose bundles come from a static loader.
pub struct TestRuntime {
    pub framework: Framework,
    pub loader: Arc<StaticModuleLoader>,
}

impl TestRuntime {
    pub fn start() -> Self {
        Self::start_with(FrameworkConfig::default())
    }

    pub fn start_with(config: FrameworkConfig) -> Self {
        let loader = Arc::new(StaticModuleLoader::new());
        let framework = Framework::builder()
            .config(config)
            .loader(loader.clone())
            .build()
            .expect("framework builds");
        framework.start().expect("framework starts");
        Self { framework, loader }
    }

    pub fn system_context(&self) -> BundleContext {
        self.framework.bundle_context().expect("system context while running")
    }

    pub fn install(&self, name: &str, version: &str, activator: bool) -> Bundle {
        let archive = MemoryArchive::from_json(&json!({
            "bundle.symbolic_name": name,
            "bundle.version": version,
            "bundle.activator": activator,
        }))
        .expect("valid manifest");
        self.framework
            .install_bundle(&format!("static:{name}"), Arc::new(archive))
            .expect("bundle installs")
    }

    pub fn install_plain(&self, name: &str) -> Bundle {
        self.install(name, "1.0.0", false)
    }

    pub fn install_with(&self, name: &str, activator: ScriptedActivator) -> Bundle {
        self.loader.register(format!("static:{name}"), move || activator.clone());
        self.install(name, "1.0.0", true)
    }

    /// Records the kinds of bundle events for `bundle`.
    pub fn record_bundle_events(&self, bundle: &Bundle) -> Arc<Mutex<Vec<BundleEventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let id = bundle.id();
        self.system_context()
            .add_bundle_listener(move |event| {
                if event.bundle().id() == id {
                    recorder.lock().push(event.kind());
                }
                Ok(())
            })
            .expect("listener added");
        seen
    }

    /// Records the kinds of framework events.
    pub fn record_framework_events(&self) -> Arc<Mutex<Vec<FrameworkEventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        self.system_context()
            .add_framework_listener(move |event| {
                recorder.lock().push(event.kind());
                Ok(())
            })
            .expect("listener added");
        seen
    }
}

/// Polls `condition` until it holds or `limit` elapses.
pub fn eventually(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
