use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::{Value, json};

use crate::bundle::archive::{BundleArchive, MemoryArchive};
use crate::bundle::thread::ThreadPool;
use crate::bundle::{Bundle, BundleContext, BundleError, BundleId, BundleManifest, BundleRegistry, ContextId, ModuleLoader};
use crate::event::{BundleEvent, BundleEventKind, FrameworkEvent, FrameworkEventKind, ListenerError, ListenerRegistry};
use crate::kernel::config::FrameworkConfig;
use crate::kernel::constants::{
    BUNDLE_DATA_DIR, BUNDLE_NAME, BUNDLE_SYMBOLIC_NAME, BUNDLE_VERSION, FRAMEWORK_NAME, FRAMEWORK_VERSION,
    SYSTEM_BUNDLE_ID, SYSTEM_BUNDLE_LOCATION, SYSTEM_BUNDLE_SYMBOLIC_NAME, THREAD_KEEP_ALIVE,
};
use crate::kernel::diagnostics::DiagnosticLog;
use crate::kernel::error::Result;
use crate::kernel::guard::{BoxError, SharedError};
use crate::properties::Properties;
use crate::service::{ServiceHooks, ServiceRegistry};

/// Decides whether a bundle may be started. Returning `Ok(false)` or an
/// error rejects the start with a security error.
pub type BundleValidator = Arc<dyn Fn(&Bundle) -> std::result::Result<bool, BoxError> + Send + Sync>;

/// Signal raised by framework stop for `wait_for_stop` callers.
#[derive(Default)]
struct StopSignal {
    event: Option<FrameworkEvent>,
}

/// Shared state of one framework instance.
///
/// Owns the framework properties, the bundle table, the service and
/// listener registries and the gate that keeps bundles from starting while
/// the framework is stopping.
pub struct CoreContext {
    self_ref: Weak<CoreContext>,
    config: FrameworkConfig,
    properties: Properties,
    bundles: BundleRegistry,
    services: ServiceRegistry,
    listeners: ListenerRegistry,
    hooks: ServiceHooks,
    diagnostics: DiagnosticLog,
    system_bundle: Bundle,
    loader: Arc<dyn ModuleLoader>,
    validator: Option<BundleValidator>,
    thread_pool: ThreadPool,
    /// `true` while bundles may be started.
    gate: RwLock<bool>,
    /// Serializes framework init, start and stop.
    framework_lock: Mutex<()>,
    next_context_id: AtomicU64,
    stop_signal: Mutex<StopSignal>,
    stop_cond: Condvar,
}

impl CoreContext {
    pub(crate) fn new(
        config: FrameworkConfig,
        loader: Arc<dyn ModuleLoader>,
        validator: Option<BundleValidator>,
    ) -> Result<Arc<Self>> {
        let properties = config.framework_properties()?;
        let headers = Properties::from_pairs([
            (BUNDLE_SYMBOLIC_NAME, json!(SYSTEM_BUNDLE_SYMBOLIC_NAME)),
            (BUNDLE_VERSION, json!(FRAMEWORK_VERSION)),
            (BUNDLE_NAME, json!(FRAMEWORK_NAME)),
        ])?;
        let manifest = BundleManifest::parse(SYSTEM_BUNDLE_LOCATION, headers.clone())?;
        let archive: Arc<dyn BundleArchive> = Arc::new(MemoryArchive::new(headers));
        let diagnostics = DiagnosticLog::new(config.diagnostics_capacity);

        let core = Arc::new_cyclic(|weak: &Weak<CoreContext>| {
            let system_bundle = Bundle::new(
                SYSTEM_BUNDLE_ID,
                SYSTEM_BUNDLE_LOCATION.to_string(),
                manifest,
                archive,
                weak.clone(),
            );
            CoreContext {
                self_ref: weak.clone(),
                config,
                properties,
                bundles: BundleRegistry::new(),
                services: ServiceRegistry::new(),
                listeners: ListenerRegistry::new(),
                hooks: ServiceHooks::new(),
                diagnostics,
                system_bundle,
                loader,
                validator,
                thread_pool: ThreadPool::new(THREAD_KEEP_ALIVE),
                gate: RwLock::new(false),
                framework_lock: Mutex::new(()),
                next_context_id: AtomicU64::new(1),
                stop_signal: Mutex::new(StopSignal::default()),
                stop_cond: Condvar::new(),
            }
        });
        core.bundles.insert_system(core.system_bundle.clone());
        log::debug!(target: "lattice::framework", "Created framework context {:#x}", core.key());
        Ok(core)
    }

    /// Weak self-reference, for handles that must not keep the framework alive.
    pub fn weak(&self) -> Weak<CoreContext> {
        self.self_ref.clone()
    }

    /// Identifies this framework instance within the process.
    pub(crate) fn key(&self) -> usize {
        self as *const Self as usize
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    pub fn bundles(&self) -> &BundleRegistry {
        &self.bundles
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn hooks(&self) -> &ServiceHooks {
        &self.hooks
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    pub fn system_bundle(&self) -> &Bundle {
        &self.system_bundle
    }

    pub(crate) fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    pub(crate) fn validator(&self) -> Option<&BundleValidator> {
        self.validator.as_ref()
    }

    pub(crate) fn thread_pool(&self) -> &ThreadPool {
        &self.thread_pool
    }

    pub(crate) fn gate(&self) -> &RwLock<bool> {
        &self.gate
    }

    pub(crate) fn framework_lock(&self) -> &Mutex<()> {
        &self.framework_lock
    }

    pub(crate) fn next_context_id(&self) -> ContextId {
        ContextId(self.next_context_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Bundle worker threads still running, abandoned ones included.
    pub fn live_worker_threads(&self) -> usize {
        self.thread_pool.live_threads()
    }

    pub fn idle_worker_threads(&self) -> usize {
        self.thread_pool.idle_threads()
    }

    // --- Properties ---

    pub fn framework_property(&self, key: &str) -> Option<Value> {
        self.properties.get(key).cloned()
    }

    pub fn framework_properties(&self) -> Properties {
        self.properties.clone()
    }

    /// `<storage>/<id>/data`, when a storage location is configured.
    pub fn bundle_data_dir(&self, id: BundleId) -> Option<PathBuf> {
        self.config.storage_location.as_ref().map(|root| root.join(id.to_string()).join(BUNDLE_DATA_DIR))
    }

    // --- Bundles ---

    /// Installs a bundle on behalf of `origin` and announces it with an
    /// INSTALLED event the first time `location` is seen.
    pub(crate) fn install_bundle(
        self: &Arc<Self>,
        location: &str,
        archive: Arc<dyn BundleArchive>,
        origin: &Bundle,
    ) -> std::result::Result<Bundle, BundleError> {
        let (bundle, newly_installed) = self.bundles.install(self, location, archive)?;
        if newly_installed {
            self.bundle_event_from(BundleEventKind::Installed, &bundle, origin);
        }
        Ok(bundle)
    }

    // --- Events ---

    pub(crate) fn bundle_event(&self, kind: BundleEventKind, bundle: &Bundle) {
        self.listeners.bundle_changed(self, &BundleEvent::new(kind, bundle.clone()));
    }

    pub(crate) fn bundle_event_from(&self, kind: BundleEventKind, bundle: &Bundle, origin: &Bundle) {
        self.listeners.bundle_changed(self, &BundleEvent::with_origin(kind, bundle.clone(), origin.clone()));
    }

    /// Logs and delivers a framework event.
    pub(crate) fn report(
        &self,
        kind: FrameworkEventKind,
        bundle: Option<Bundle>,
        message: String,
        error: Option<SharedError>,
    ) {
        let event = FrameworkEvent::new(kind, bundle, message, error);
        self.emit_framework_event(&event);
    }

    pub(crate) fn emit_framework_event(&self, event: &FrameworkEvent) {
        let detail = event.error().map(|e| format!(": {e}")).unwrap_or_default();
        match event.kind() {
            FrameworkEventKind::Error => {
                log::error!(target: "lattice::framework", "{}{}", event.message(), detail)
            }
            FrameworkEventKind::Warning => {
                log::warn!(target: "lattice::framework", "{}{}", event.message(), detail)
            }
            _ => log::info!(target: "lattice::framework", "{}{}", event.message(), detail),
        }
        self.listeners.framework_event(&self.diagnostics, event);
    }

    /// A bundle or service listener failed; turns it into an ERROR event
    /// naming the listener's bundle.
    pub(crate) fn listener_failed(&self, context: &BundleContext, error: ListenerError) {
        self.report(
            FrameworkEventKind::Error,
            context.weak_bundle().upgrade(),
            format!("Listener of bundle #{} failed", context.bundle_id()),
            Some(Arc::new(error)),
        );
    }

    // --- Stop signal ---

    pub(crate) fn reset_stop_signal(&self) {
        self.stop_signal.lock().event = None;
    }

    pub(crate) fn signal_stopped(&self, event: FrameworkEvent) {
        self.stop_signal.lock().event = Some(event);
        self.stop_cond.notify_all();
    }

    /// Blocks until the framework has stopped, or the timeout elapses.
    pub(crate) fn wait_for_stop(&self, timeout: Option<Duration>) -> FrameworkEvent {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut signal = self.stop_signal.lock();
        loop {
            if let Some(event) = &signal.event {
                return event.clone();
            }
            if !self.system_bundle.state().is_activated() {
                return FrameworkEvent::new(
                    FrameworkEventKind::Stopped,
                    Some(self.system_bundle.clone()),
                    "Framework is not running",
                    None,
                );
            }
            match deadline {
                Some(deadline) => {
                    if self.stop_cond.wait_until(&mut signal, deadline).timed_out() && signal.event.is_none() {
                        return FrameworkEvent::new(
                            FrameworkEventKind::WaitTimedOut,
                            Some(self.system_bundle.clone()),
                            "Timed out waiting for the framework to stop",
                            None,
                        );
                    }
                }
                None => self.stop_cond.wait(&mut signal),
            }
        }
    }
}

impl Drop for CoreContext {
    fn drop(&mut self) {
        self.listeners.clear();
        self.services.clear();
        self.thread_pool.shutdown();
    }
}

impl fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreContext")
            .field("key", &format_args!("{:#x}", self.key()))
            .field("bundles", &self.bundles)
            .field("services", &self.services)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}
