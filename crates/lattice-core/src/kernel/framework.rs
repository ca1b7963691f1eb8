use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::bundle::archive::{BundleArchive, DirectoryArchive};
use crate::bundle::{
    Bundle, BundleContext, BundleError, BundleId, BundleState, LibraryLoader, ModuleLoader, StartOptions, StopOptions,
};
use crate::event::{BundleEventKind, FrameworkEvent, FrameworkEventKind};
use crate::kernel::config::FrameworkConfig;
use crate::kernel::constants::{AUTOSTART_STOPPED, FRAMEWORK_NAME, FRAMEWORK_VERSION, SYSTEM_BUNDLE_ID};
use crate::kernel::context::{BundleValidator, CoreContext};
use crate::kernel::diagnostics::DiagnosticLog;
use crate::kernel::error::Result;
use crate::kernel::guard::BoxError;
use crate::properties::Properties;

/// Builder for a [`Framework`].
#[derive(Default)]
pub struct FrameworkBuilder {
    config: FrameworkConfig,
    loader: Option<Arc<dyn ModuleLoader>>,
    validator: Option<BundleValidator>,
}

impl FrameworkBuilder {
    pub fn config(mut self, config: FrameworkConfig) -> Self {
        self.config = config;
        self
    }

    /// Module loader for bundle activators; defaults to [`LibraryLoader`].
    pub fn loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Predicate consulted before every bundle start.
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Bundle) -> std::result::Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn build(self) -> Result<Framework> {
        log::info!(target: "lattice::framework", "Creating {} framework v{}", FRAMEWORK_NAME, FRAMEWORK_VERSION);
        let loader = self.loader.unwrap_or_else(|| Arc::new(LibraryLoader::new()));
        let core = CoreContext::new(self.config, loader, self.validator)?;
        Ok(Framework { core })
    }
}

impl fmt::Debug for FrameworkBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameworkBuilder")
            .field("config", &self.config)
            .field("loader", &self.loader)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// Handle to a framework instance, which is also its system bundle.
///
/// Handles are cheap to clone. Dropping the last handle does not stop
/// the framework; call [`Framework::stop`] first.
#[derive(Clone)]
pub struct Framework {
    core: Arc<CoreContext>,
}

impl Framework {
    pub fn builder() -> FrameworkBuilder {
        FrameworkBuilder::default()
    }

    /// Framework with the default configuration and the shared-library loader.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn with_config(config: FrameworkConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub(crate) fn from_core(core: Arc<CoreContext>) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &Arc<CoreContext> {
        &self.core
    }

    pub fn system_bundle(&self) -> &Bundle {
        self.core.system_bundle()
    }

    pub fn state(&self) -> BundleState {
        self.system_bundle().state()
    }

    /// The system bundle's context; present between `init` and `stop`.
    pub fn bundle_context(&self) -> Option<BundleContext> {
        self.system_bundle().bundle_context()
    }

    pub fn property(&self, key: &str) -> Option<serde_json::Value> {
        self.core.framework_property(key)
    }

    pub fn properties(&self) -> Properties {
        self.core.framework_properties()
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        self.core.diagnostics()
    }

    pub fn bundles(&self) -> Vec<Bundle> {
        self.core.bundles().all()
    }

    pub fn bundle(&self, id: BundleId) -> Option<Bundle> {
        self.core.bundles().get(id)
    }

    /// Installs a bundle on behalf of the system bundle.
    pub fn install_bundle(&self, location: &str, archive: Arc<dyn BundleArchive>) -> Result<Bundle> {
        Ok(self.core.install_bundle(location, archive, self.system_bundle())?)
    }

    pub fn install_bundle_dir(&self, dir: &Path) -> Result<Bundle> {
        let archive = DirectoryArchive::open(dir)?;
        self.install_bundle(&dir.display().to_string(), Arc::new(archive))
    }

    /// Moves the framework to RESOLVED, creates the system bundle context
    /// and lets bundles start. Does nothing once the framework is running.
    pub fn init(&self) -> std::result::Result<(), BundleError> {
        let _serial = self.core.framework_lock().lock();
        self.init_locked()
    }

    fn init_locked(&self) -> std::result::Result<(), BundleError> {
        let system = self.system_bundle();
        if system.state().is_activated() {
            return Ok(());
        }
        if system.bundle_context().is_none() {
            system.set_context(Some(BundleContext::new(&self.core, system)));
        }
        system.set_state(BundleState::Resolved);
        *self.core.gate().write() = true;
        log::debug!(target: "lattice::framework", "Framework initialized");
        Ok(())
    }

    /// Starts the framework, then every bundle whose autostart setting
    /// asks for it. Bundle start failures are reported as framework ERROR
    /// events and do not fail the framework start.
    pub fn start(&self) -> std::result::Result<(), BundleError> {
        let _serial = self.core.framework_lock().lock();
        let system = self.system_bundle();
        if system.state().is_activated() {
            return Ok(());
        }
        self.init_locked()?;
        self.core.reset_stop_signal();
        system.set_state(BundleState::Starting);
        self.core.bundle_event(BundleEventKind::Starting, system);

        for bundle in self.core.bundles().all() {
            if bundle.id() == SYSTEM_BUNDLE_ID || bundle.autostart_setting() == AUTOSTART_STOPPED {
                continue;
            }
            if let Err(err) = bundle.start_with(StartOptions::transient()) {
                self.core.report(
                    FrameworkEventKind::Error,
                    Some(bundle.clone()),
                    format!("Failed to start bundle #{} ({}) during framework launch", bundle.id(), bundle.symbolic_name()),
                    Some(Arc::new(err)),
                );
            }
        }

        system.set_state(BundleState::Active);
        self.core.bundle_event(BundleEventKind::Started, system);
        self.core.report(FrameworkEventKind::Started, Some(system.clone()), "Framework started".to_string(), None);
        Ok(())
    }

    /// Stops the framework: closes the start gate, stops active bundles
    /// newest first, announces FRAMEWORK STOPPED and tears down the system
    /// bundle context. Autostart settings are left as they were.
    ///
    /// Must not be called from inside an activator's `start` that is
    /// itself blocking a bundle start on another thread.
    pub fn stop(&self) -> std::result::Result<(), BundleError> {
        let _serial = self.core.framework_lock().lock();
        let system = self.system_bundle();
        if !system.state().is_activated() {
            return Ok(());
        }
        system.set_state(BundleState::Stopping);
        self.core.bundle_event(BundleEventKind::Stopping, system);
        // Waits for bundle starts in progress.
        *self.core.gate().write() = false;

        let mut active: Vec<Bundle> = self
            .core
            .bundles()
            .all()
            .into_iter()
            .filter(|b| b.id() != SYSTEM_BUNDLE_ID && b.state().is_activated())
            .collect();
        active.reverse();
        for bundle in active {
            if let Err(err) = bundle.stop_with(StopOptions::transient()) {
                self.core.report(
                    FrameworkEventKind::Error,
                    Some(bundle.clone()),
                    format!("Failed to stop bundle #{} ({}) during framework shutdown", bundle.id(), bundle.symbolic_name()),
                    Some(Arc::new(err)),
                );
            }
        }

        let stopped = FrameworkEvent::new(
            FrameworkEventKind::Stopped,
            Some(system.clone()),
            "Framework stopped",
            None,
        );
        self.core.emit_framework_event(&stopped);
        self.teardown_system_context();
        system.set_state(BundleState::Resolved);
        self.core.bundle_event(BundleEventKind::Stopped, system);
        self.core.thread_pool().shutdown();
        self.core.signal_stopped(stopped);
        Ok(())
    }

    fn teardown_system_context(&self) {
        let core = &self.core;
        core.listeners().remove_framework_listeners(SYSTEM_BUNDLE_ID);
        let Some(context) = self.system_bundle().set_context(None) else {
            return;
        };
        for registration in core.services().registered_by_bundle(core, SYSTEM_BUNDLE_ID) {
            if let Err(err) = core.services().unregister(core, &registration.core) {
                log::debug!(target: "lattice::framework", "System service #{} already gone: {}", registration.id(), err);
            }
        }
        for registration in core.services().used_by_bundle(core, SYSTEM_BUNDLE_ID) {
            core.services().unget_service(core, &registration.core, self.system_bundle(), false);
        }
        core.listeners().remove_all_listeners(&context);
        context.invalidate();
    }

    /// Waits until the framework has stopped. Returns the STOPPED event,
    /// or a WAIT_TIMEDOUT event if `timeout` elapses first. Returns at once
    /// when the framework is not running.
    pub fn wait_for_stop(&self, timeout: Option<Duration>) -> FrameworkEvent {
        self.core.wait_for_stop(timeout)
    }
}

impl fmt::Debug for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framework").field("state", &self.state()).field("core", &self.core).finish()
    }
}
