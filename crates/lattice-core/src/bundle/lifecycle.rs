use std::cell::Cell;
use std::fmt;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use semver::Version;
use serde_json::Value;

use crate::bundle::archive::BundleArchive;
use crate::bundle::state::{Aborted, AtomicState, Operation};
use crate::bundle::thread::{Job, OperationSlot, SlotWait};
use crate::bundle::{
    AbortCause, ActivatorInstance, ActivatorPhase, BundleContext, BundleError, BundleId, BundleManifest, BundleState,
    ModuleHandle, StartOptions, StopOptions,
};
use crate::event::{BundleEventKind, FrameworkEventKind};
use crate::kernel::constants::{
    ACTIVATOR_CONSTRUCTOR_SYMBOL, ACTIVATOR_DESTRUCTOR_SYMBOL, AUTOSTART_EAGER, AUTOSTART_STOPPED, SYSTEM_BUNDLE_ID,
};
use crate::kernel::context::CoreContext;
use crate::kernel::framework::Framework;
use crate::kernel::guard::{guarded, panic_message};
use crate::properties::Properties;
use crate::service::{ServiceError, ServiceReference};

thread_local! {
    /// The lifecycle transition this thread is running, as
    /// (framework, bundle, operation).
    static CURRENT_TRANSITION: Cell<Option<(usize, BundleId, Operation)>> = const { Cell::new(None) };
}

struct TransitionMark {
    previous: Option<(usize, BundleId, Operation)>,
}

impl TransitionMark {
    fn enter(mark: (usize, BundleId, Operation)) -> Self {
        Self { previous: CURRENT_TRANSITION.with(|current| current.replace(Some(mark))) }
    }
}

impl Drop for TransitionMark {
    fn drop(&mut self) {
        CURRENT_TRANSITION.with(|current| current.set(self.previous));
    }
}

fn current_transition(framework: usize, bundle_id: BundleId) -> Option<Operation> {
    CURRENT_TRANSITION
        .with(Cell::get)
        .filter(|(key, id, _)| *key == framework && *id == bundle_id)
        .map(|(_, _, operation)| operation)
}

#[derive(Default)]
struct BundleRuntime {
    context: Option<BundleContext>,
    module: Option<Arc<dyn ModuleHandle>>,
    activator: Option<ActivatorInstance>,
}

pub(crate) struct BundleInner {
    id: BundleId,
    location: String,
    manifest: BundleManifest,
    archive: Arc<dyn BundleArchive>,
    core: Weak<CoreContext>,
    state: AtomicState,
    was_started: AtomicBool,
    deferred_uninstall: AtomicBool,
    /// Serializes transitions of this bundle. A worker abandoned by its
    /// caller may outlive the lock; it can only commit through its own
    /// `OperationSlot`, which the caller has already settled.
    lifecycle: Mutex<()>,
    runtime: Mutex<BundleRuntime>,
    in_flight: Mutex<Option<Arc<OperationSlot>>>,
}

/// Handle to an installed bundle. Cloning is cheap; all clones refer to
/// the same bundle.
#[derive(Clone)]
pub struct Bundle {
    inner: Arc<BundleInner>,
}

/// Non-owning counterpart of [`Bundle`].
#[derive(Clone, Default)]
pub struct WeakBundle {
    inner: Weak<BundleInner>,
}

impl WeakBundle {
    pub fn upgrade(&self) -> Option<Bundle> {
        self.inner.upgrade().map(|inner| Bundle { inner })
    }
}

impl fmt::Debug for WeakBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.upgrade() {
            Some(inner) => write!(f, "WeakBundle(#{})", inner.id),
            None => f.write_str("WeakBundle(<dropped>)"),
        }
    }
}

enum Dispatch {
    Finished(Result<(), BundleError>),
    Aborted(AbortCause),
    NotRun(BundleError),
}

type Task = Box<dyn FnOnce(&Bundle, &Arc<CoreContext>, &OperationSlot) -> Result<(), BundleError> + Send>;

impl Bundle {
    pub(crate) fn new(
        id: BundleId,
        location: String,
        manifest: BundleManifest,
        archive: Arc<dyn BundleArchive>,
        core: Weak<CoreContext>,
    ) -> Self {
        Self {
            inner: Arc::new(BundleInner {
                id,
                location,
                manifest,
                archive,
                core,
                state: AtomicState::new(BundleState::Installed),
                was_started: AtomicBool::new(false),
                deferred_uninstall: AtomicBool::new(false),
                lifecycle: Mutex::new(()),
                runtime: Mutex::new(BundleRuntime::default()),
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> BundleId {
        self.inner.id
    }

    pub fn location(&self) -> &str {
        &self.inner.location
    }

    pub fn symbolic_name(&self) -> &str {
        &self.inner.manifest.symbolic_name
    }

    pub fn version(&self) -> &Version {
        &self.inner.manifest.version
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.inner.manifest
    }

    pub fn headers(&self) -> &Properties {
        &self.inner.manifest.headers
    }

    pub fn state(&self) -> BundleState {
        self.inner.state.get()
    }

    pub fn downgrade(&self) -> WeakBundle {
        WeakBundle { inner: Arc::downgrade(&self.inner) }
    }

    /// A manifest header, or the framework property of that name.
    pub fn property(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.headers().get(key) {
            return Some(value.clone());
        }
        self.inner.core.upgrade().and_then(|core| core.framework_property(key))
    }

    pub fn last_modified(&self) -> SystemTime {
        self.inner.archive.last_modified()
    }

    pub fn autostart_setting(&self) -> i32 {
        self.inner.archive.autostart_setting()
    }

    pub fn resource(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.archive.resource(path)
    }

    /// The context of the current activation, if the bundle is active.
    pub fn bundle_context(&self) -> Option<BundleContext> {
        self.inner.runtime.lock().context.clone()
    }

    pub fn registered_services(&self) -> Vec<ServiceReference> {
        let Some(core) = self.inner.core.upgrade() else {
            return Vec::new();
        };
        core.services().registered_by_bundle(&core, self.id()).iter().map(|reg| reg.reference()).collect()
    }

    pub fn services_in_use(&self) -> Vec<ServiceReference> {
        let Some(core) = self.inner.core.upgrade() else {
            return Vec::new();
        };
        core.services().used_by_bundle(&core, self.id()).iter().map(|reg| reg.reference()).collect()
    }

    pub(crate) fn set_state(&self, state: BundleState) {
        self.inner.state.set(state);
    }

    pub(crate) fn set_context(&self, context: Option<BundleContext>) -> Option<BundleContext> {
        std::mem::replace(&mut self.inner.runtime.lock().context, context)
    }

    fn core(&self, operation: &'static str) -> Result<Arc<CoreContext>, BundleError> {
        self.inner
            .core
            .upgrade()
            .ok_or_else(|| BundleError::illegal_state(self.id(), operation, "the framework has been dropped"))
    }

    fn default_timeout(core: &CoreContext, requested: Option<Duration>) -> Option<Duration> {
        requested.or_else(|| core.config().start_stop_timeout())
    }

    pub fn start(&self) -> Result<(), BundleError> {
        self.start_with(StartOptions::default())
    }

    /// Starts the bundle: resolves it if needed, runs its activator's
    /// `start` on a worker thread and waits for the outcome.
    ///
    /// Starting an ACTIVE bundle does nothing. If the activator fails, or
    /// the wait times out, the bundle is rolled back to RESOLVED before the
    /// error is returned.
    pub fn start_with(&self, options: StartOptions) -> Result<(), BundleError> {
        let core = self.core("start")?;
        if self.id() == SYSTEM_BUNDLE_ID {
            return Framework::from_core(core).start();
        }
        match current_transition(core.key(), self.id()) {
            Some(Operation::Deactivating) => {
                return Err(BundleError::Logic {
                    bundle_id: self.id(),
                    message: "start called from BundleActivator::stop".to_string(),
                });
            }
            Some(Operation::Uninstalling) => {
                return Err(BundleError::illegal_state(self.id(), "start", "bundle is being uninstalled"));
            }
            Some(Operation::Unresolving) => {
                return Err(BundleError::illegal_state(self.id(), "start", "bundle is being unresolved"));
            }
            Some(_) => return Ok(()),
            None => {}
        }

        let gate = core.gate().read_recursive();
        if !*gate {
            return Err(BundleError::FrameworkStopping { bundle_id: self.id() });
        }
        let guard = self.inner.lifecycle.lock();
        let result = {
            let _mark = TransitionMark::enter((core.key(), self.id(), Operation::Activating));
            self.start_locked(&core, options)
        };
        let uninstalled = self.run_deferred_uninstall(&core);
        drop(guard);
        drop(gate);
        if uninstalled {
            self.unresolve_dependents(&core);
        }
        result
    }

    fn start_locked(&self, core: &Arc<CoreContext>, options: StartOptions) -> Result<(), BundleError> {
        let state = self.state();
        if state == BundleState::Uninstalled {
            return Err(BundleError::illegal_state(self.id(), "start", "bundle is uninstalled"));
        }
        if !options.transient {
            self.inner.archive.set_autostart_setting(AUTOSTART_EAGER);
        }
        if state == BundleState::Active {
            return Ok(());
        }
        if state == BundleState::Installed {
            self.resolve_locked(core)?;
        }
        self.start0(core, Self::default_timeout(core, options.timeout))
    }

    fn resolve_locked(&self, core: &Arc<CoreContext>) -> Result<(), BundleError> {
        let missing: Vec<&str> = self
            .inner
            .manifest
            .requires
            .iter()
            .filter(|name| !core.bundles().is_installed(name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(BundleError::Resolve {
                bundle_id: self.id(),
                symbolic_name: self.symbolic_name().to_string(),
                reason: format!("required bundles are not installed: {}", missing.join(", ")),
            });
        }
        self.inner.state.set(BundleState::Resolved);
        log::debug!(target: "lattice::bundle", "Bundle #{} ({}) resolved", self.id(), self.symbolic_name());
        core.bundle_event(BundleEventKind::Resolved, self);
        Ok(())
    }

    fn start0(&self, core: &Arc<CoreContext>, timeout: Option<Duration>) -> Result<(), BundleError> {
        self.inner.state.set(BundleState::Starting);
        let context = BundleContext::new(core, self);
        self.set_context(Some(context.clone()));

        let task: Task = Box::new(move |bundle, core, slot| Bundle::run_start(bundle, core, slot, &context));
        match self.dispatch(core, Operation::Activating, timeout, task) {
            Dispatch::Finished(result) => result,
            Dispatch::NotRun(err) => {
                self.teardown(core);
                self.inner.state.set(BundleState::Resolved);
                Err(err)
            }
            Dispatch::Aborted(cause) => {
                self.start_failed(core);
                Err(BundleError::Aborted {
                    bundle_id: self.id(),
                    symbolic_name: self.symbolic_name().to_string(),
                    phase: ActivatorPhase::Start,
                    cause,
                })
            }
        }
    }

    /// Worker side of a start. `context` is the one created for this
    /// activation, even if the caller has since moved on to another.
    fn run_start(
        bundle: &Bundle,
        core: &Arc<CoreContext>,
        slot: &OperationSlot,
        context: &BundleContext,
    ) -> Result<(), BundleError> {
        core.bundle_event(BundleEventKind::Starting, bundle);
        let activated = bundle.activate(core, context);
        if !slot.settle(Aborted::No) {
            // The caller stopped waiting and has already rolled back.
            if let Ok(Some(_)) = &activated {
                log::debug!(
                    target: "lattice::bundle",
                    "Discarding the activator of abandoned start of bundle #{}",
                    bundle.id()
                );
            }
            return Ok(());
        }
        match activated {
            Ok(activator) => {
                bundle.inner.runtime.lock().activator = activator;
                bundle.inner.was_started.store(true, Ordering::Release);
                bundle.inner.state.set(BundleState::Active);
                log::info!(target: "lattice::bundle", "Bundle #{} ({}) started", bundle.id(), bundle.symbolic_name());
                core.bundle_event(BundleEventKind::Started, bundle);
                Ok(())
            }
            Err(err) => {
                log::warn!(target: "lattice::bundle", "Bundle #{} failed to start: {}", bundle.id(), err);
                bundle.start_failed(core);
                Err(err)
            }
        }
    }

    fn activate(&self, core: &Arc<CoreContext>, context: &BundleContext) -> Result<Option<ActivatorInstance>, BundleError> {
        if let Some(validator) = core.validator() {
            let security = |reason: &str, source| BundleError::Security {
                bundle_id: self.id(),
                symbolic_name: self.symbolic_name().to_string(),
                reason: reason.to_string(),
                source,
            };
            match guarded(|| validator(self)) {
                Ok(true) => {}
                Ok(false) => return Err(security("bundle validation failed", None)),
                Err(source) => return Err(security("bundle validation function failed", Some(source))),
            }
        }
        if !self.inner.manifest.activator {
            return Ok(None);
        }

        let loaded = self.inner.runtime.lock().module.clone();
        let module = match loaded {
            Some(module) => module,
            None => {
                let module = core.loader().load(self.location(), core.config().library_load_flags)?;
                self.inner.runtime.lock().module = Some(module.clone());
                module
            }
        };
        let mut activator = module.activator(ACTIVATOR_CONSTRUCTOR_SYMBOL, ACTIVATOR_DESTRUCTOR_SYMBOL)?;
        guarded(|| activator.activator_mut().start(context)).map_err(|source| BundleError::ActivatorFailed {
            bundle_id: self.id(),
            symbolic_name: self.symbolic_name().to_string(),
            phase: ActivatorPhase::Start,
            source,
        })?;
        Ok(Some(activator))
    }

    /// Rolls a failed or abandoned start back to RESOLVED.
    fn start_failed(&self, core: &Arc<CoreContext>) {
        self.inner.state.set(BundleState::Stopping);
        core.bundle_event(BundleEventKind::Stopping, self);
        self.teardown(core);
        self.inner.state.set(BundleState::Resolved);
        core.bundle_event(BundleEventKind::Stopped, self);
    }

    pub fn stop(&self) -> Result<(), BundleError> {
        self.stop_with(StopOptions::default())
    }

    /// Stops the bundle. Stopping a bundle that is not active does nothing.
    ///
    /// The bundle's services, the services it uses and its listeners are
    /// released even if the activator's `stop` fails; that failure is
    /// returned afterwards.
    pub fn stop_with(&self, options: StopOptions) -> Result<(), BundleError> {
        let core = self.core("stop")?;
        if self.id() == SYSTEM_BUNDLE_ID {
            return Framework::from_core(core).stop();
        }
        if current_transition(core.key(), self.id()).is_some() {
            return Err(BundleError::illegal_state(
                self.id(),
                "stop",
                "called from within the bundle's own lifecycle transition",
            ));
        }

        let guard = self.inner.lifecycle.lock();
        let result = {
            let _mark = TransitionMark::enter((core.key(), self.id(), Operation::Deactivating));
            self.stop_locked(&core, options)
        };
        let uninstalled = self.run_deferred_uninstall(&core);
        drop(guard);
        if uninstalled {
            self.unresolve_dependents(&core);
        }
        result
    }

    fn stop_locked(&self, core: &Arc<CoreContext>, options: StopOptions) -> Result<(), BundleError> {
        let state = self.state();
        if state == BundleState::Uninstalled {
            return Err(BundleError::illegal_state(self.id(), "stop", "bundle is uninstalled"));
        }
        if !options.transient {
            self.inner.archive.set_autostart_setting(AUTOSTART_STOPPED);
        }
        if state.is_activated() {
            self.stop0(core, Self::default_timeout(core, options.timeout))
        } else {
            Ok(())
        }
    }

    fn stop0(&self, core: &Arc<CoreContext>, timeout: Option<Duration>) -> Result<(), BundleError> {
        self.inner.state.set(BundleState::Stopping);

        let result = match self.dispatch(core, Operation::Deactivating, timeout, Box::new(Bundle::run_stop)) {
            Dispatch::Finished(result) => result,
            Dispatch::NotRun(err) => {
                self.teardown(core);
                Err(err)
            }
            Dispatch::Aborted(cause) => {
                self.teardown(core);
                Err(BundleError::Aborted {
                    bundle_id: self.id(),
                    symbolic_name: self.symbolic_name().to_string(),
                    phase: ActivatorPhase::Stop,
                    cause,
                })
            }
        };
        if self.state() != BundleState::Uninstalled {
            self.inner.state.set(BundleState::Resolved);
            log::info!(target: "lattice::bundle", "Bundle #{} ({}) stopped", self.id(), self.symbolic_name());
            core.bundle_event(BundleEventKind::Stopped, self);
        }
        result
    }

    /// Worker side of a stop.
    fn run_stop(bundle: &Bundle, core: &Arc<CoreContext>, slot: &OperationSlot) -> Result<(), BundleError> {
        core.bundle_event(BundleEventKind::Stopping, bundle);
        let (context, mut activator) = if bundle.inner.was_started.swap(false, Ordering::AcqRel) {
            let mut runtime = bundle.inner.runtime.lock();
            (runtime.context.clone(), runtime.activator.take())
        } else {
            (None, None)
        };

        let mut result = Ok(());
        if let (Some(activator), Some(context)) = (activator.as_mut(), context.as_ref()) {
            if let Err(source) = guarded(|| activator.activator_mut().stop(context)) {
                log::warn!(target: "lattice::bundle", "Bundle #{} activator stop() failed: {}", bundle.id(), source);
                result = Err(BundleError::ActivatorFailed {
                    bundle_id: bundle.id(),
                    symbolic_name: bundle.symbolic_name().to_string(),
                    phase: ActivatorPhase::Stop,
                    source,
                });
            }
        }
        if slot.settle(Aborted::No) {
            drop(activator);
            bundle.teardown(core);
        }
        result
    }

    /// Releases everything the current activation acquired: registered
    /// services, services in use, listeners, the context and the activator.
    fn teardown(&self, core: &Arc<CoreContext>) {
        let (context, activator) = {
            let mut runtime = self.inner.runtime.lock();
            (runtime.context.take(), runtime.activator.take())
        };
        if let Some(context) = &context {
            self.remove_bundle_resources(core, context);
            context.invalidate();
        }
        drop(activator);
        self.inner.was_started.store(false, Ordering::Release);
    }

    fn remove_bundle_resources(&self, core: &Arc<CoreContext>, context: &BundleContext) {
        for registration in core.services().registered_by_bundle(core, self.id()) {
            match core.services().unregister(core, &registration.core) {
                Ok(()) | Err(ServiceError::IllegalState { .. }) => {}
                Err(err) => log::warn!(
                    target: "lattice::bundle",
                    "Failed to unregister service #{} of bundle #{}: {}",
                    registration.id(),
                    self.id(),
                    err
                ),
            }
        }
        for registration in core.services().used_by_bundle(core, self.id()) {
            core.services().unget_service(core, &registration.core, self, false);
        }
        core.listeners().remove_all_listeners(context);
    }

    /// Hands `task` to a worker thread and waits for it.
    fn dispatch(&self, core: &Arc<CoreContext>, operation: Operation, timeout: Option<Duration>, task: Task) -> Dispatch {
        let slot = OperationSlot::new();
        *self.inner.in_flight.lock() = Some(slot.clone());

        let bundle = self.clone();
        let worker_core = core.clone();
        let worker_slot = slot.clone();
        let mark = (core.key(), self.id(), operation);
        let job: Job = Box::new(move || {
            let _mark = TransitionMark::enter(mark);
            let run = AssertUnwindSafe(|| task(&bundle, &worker_core, &worker_slot));
            let result = panic::catch_unwind(run).unwrap_or_else(|payload| {
                Err(BundleError::Logic {
                    bundle_id: bundle.id(),
                    message: format!("bundle worker panicked: {}", panic_message(payload.as_ref())),
                })
            });
            worker_slot.complete(result);
        });

        let outcome = match core.thread_pool().execute(job) {
            Err(err) => Dispatch::NotRun(err),
            Ok(worker) => match slot.wait(timeout) {
                SlotWait::Completed(result) => Dispatch::Finished(result),
                SlotWait::Aborted(cause) => {
                    if slot.settle(Aborted::Yes) {
                        worker.make_zombie();
                        log::warn!(
                            target: "lattice::bundle",
                            "Bundle #{} ({}) {:?} abandoned: {}",
                            self.id(),
                            self.symbolic_name(),
                            operation,
                            cause
                        );
                        Dispatch::Aborted(cause)
                    } else {
                        // The worker finished first; take its result.
                        Dispatch::Finished(slot.wait_result())
                    }
                }
            },
        };
        *self.inner.in_flight.lock() = None;
        outcome
    }

    /// Uninstalls the bundle, stopping it first if needed.
    ///
    /// Called from within the bundle's own start or stop, the uninstall is
    /// deferred until that transition has been rolled back. Called from
    /// another thread while a start or stop is waiting on its activator,
    /// that wait is cut short.
    pub fn uninstall(&self) -> Result<(), BundleError> {
        let core = self.core("uninstall")?;
        if self.id() == SYSTEM_BUNDLE_ID {
            return Err(BundleError::illegal_state(self.id(), "uninstall", "the system bundle cannot be uninstalled"));
        }
        match current_transition(core.key(), self.id()) {
            Some(Operation::Uninstalling) => {
                return Err(BundleError::illegal_state(self.id(), "uninstall", "bundle is already being uninstalled"));
            }
            Some(_) => {
                if self.state() == BundleState::Uninstalled {
                    return Err(BundleError::illegal_state(self.id(), "uninstall", "bundle is uninstalled"));
                }
                self.inner.deferred_uninstall.store(true, Ordering::Release);
                if let Some(slot) = self.inner.in_flight.lock().clone() {
                    slot.abort(AbortCause::Uninstalled);
                }
                return Ok(());
            }
            None => {}
        }

        if let Some(slot) = self.inner.in_flight.lock().clone() {
            slot.abort(AbortCause::Uninstalled);
        }
        {
            let _guard = self.inner.lifecycle.lock();
            let _mark = TransitionMark::enter((core.key(), self.id(), Operation::Uninstalling));
            self.uninstall0(&core)?;
        }
        self.unresolve_dependents(&core);
        Ok(())
    }

    fn run_deferred_uninstall(&self, core: &Arc<CoreContext>) -> bool {
        if !self.inner.deferred_uninstall.swap(false, Ordering::AcqRel) {
            return false;
        }
        let _mark = TransitionMark::enter((core.key(), self.id(), Operation::Uninstalling));
        match self.uninstall0(core) {
            Ok(()) => true,
            Err(err) => {
                core.report(
                    FrameworkEventKind::Error,
                    Some(self.clone()),
                    format!("Deferred uninstall of bundle #{} failed", self.id()),
                    Some(Arc::new(err)),
                );
                false
            }
        }
    }

    fn uninstall0(&self, core: &Arc<CoreContext>) -> Result<(), BundleError> {
        let id = self.id();
        if self.state() == BundleState::Uninstalled {
            return Err(BundleError::illegal_state(id, "uninstall", "bundle is already uninstalled"));
        }
        if self.state().is_activated() {
            if let Err(err) = self.stop0(core, core.config().start_stop_timeout()) {
                if err.abort_cause() != Some(AbortCause::Uninstalled) {
                    core.report(
                        FrameworkEventKind::Error,
                        Some(self.clone()),
                        format!("Bundle #{id} failed to stop while being uninstalled"),
                        Some(Arc::new(err)),
                    );
                }
            }
        }
        self.inner.deferred_uninstall.store(false, Ordering::Release);

        core.bundles().remove(self);
        if self.state() == BundleState::Resolved {
            self.inner.state.set(BundleState::Installed);
            core.bundle_event(BundleEventKind::Unresolved, self);
        }
        self.inner.state.set(BundleState::Uninstalled);
        self.inner.archive.purge();

        if let Some(dir) = core.bundle_data_dir(id) {
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => core.report(
                    FrameworkEventKind::Warning,
                    Some(self.clone()),
                    format!("Failed to delete the data directory of bundle #{id}"),
                    Some(Arc::new(BundleError::io("remove_data_dir", &dir, e))),
                ),
            }
        }

        let released = std::mem::take(&mut *self.inner.runtime.lock());
        drop(released);
        core.listeners().remove_framework_listeners(id);

        log::info!(target: "lattice::bundle", "Bundle #{} ({}) uninstalled", id, self.symbolic_name());
        core.bundle_event(BundleEventKind::Uninstalled, self);
        Ok(())
    }

    /// Moves RESOLVED bundles that required this one back to INSTALLED
    /// when no other installed bundle carries its symbolic name.
    fn unresolve_dependents(&self, core: &Arc<CoreContext>) {
        if core.bundles().is_installed(self.symbolic_name()) {
            return;
        }
        for dependent in core.bundles().all() {
            let requires_us = dependent.inner.manifest.requires.iter().any(|name| name == self.symbolic_name());
            if requires_us && dependent.state() == BundleState::Resolved {
                dependent.unresolve(core);
            }
        }
    }

    fn unresolve(&self, core: &Arc<CoreContext>) {
        let _guard = self.inner.lifecycle.lock();
        if self.state() != BundleState::Resolved {
            return;
        }
        let _mark = TransitionMark::enter((core.key(), self.id(), Operation::Unresolving));
        self.inner.state.set(BundleState::Installed);
        log::debug!(target: "lattice::bundle", "Bundle #{} ({}) unresolved", self.id(), self.symbolic_name());
        core.bundle_event(BundleEventKind::Unresolved, self);
    }
}

impl PartialEq for Bundle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Bundle {}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.inner.id)
            .field("symbolic_name", &self.inner.manifest.symbolic_name)
            .field("version", &self.inner.manifest.version.to_string())
            .field("location", &self.inner.location)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.inner.manifest.symbolic_name, self.inner.id)
    }
}
