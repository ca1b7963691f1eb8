use std::any::Any;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::bundle::{Bundle, BundleArchive, BundleError, BundleId, DirectoryArchive, WeakBundle};
use crate::event::{BundleEvent, FrameworkEvent, ListenerIdentity, ListenerToken, ServiceEvent};
use crate::filter::Filter;
use crate::kernel::context::CoreContext;
use crate::kernel::error::Result;
use crate::kernel::guard::BoxError;
use crate::properties::Properties;
use crate::service::{
    FindHook, HookId, InterfaceMapPtr, ServiceError, ServiceObject, ServiceObjects, ServiceReference,
    ServiceRegistration, extract, interface_map, service_interface,
};

/// Identifies one activation's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub(crate) u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

struct ContextInner {
    id: ContextId,
    bundle: WeakBundle,
    bundle_id: BundleId,
    core: Weak<CoreContext>,
    valid: AtomicBool,
}

/// A bundle's view of the framework, valid for one activation.
///
/// The context is created when the bundle starts and invalidated when it
/// stops; every operation on an invalidated context fails with
/// [`BundleError::ContextInvalid`].
#[derive(Clone)]
pub struct BundleContext {
    inner: Arc<ContextInner>,
}

impl BundleContext {
    pub(crate) fn new(core: &CoreContext, bundle: &Bundle) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: core.next_context_id(),
                bundle: bundle.downgrade(),
                bundle_id: bundle.id(),
                core: core.weak(),
                valid: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn bundle_id(&self) -> BundleId {
        self.inner.bundle_id
    }

    pub(crate) fn weak_bundle(&self) -> WeakBundle {
        self.inner.bundle.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::Release);
    }

    fn check(&self) -> std::result::Result<(Arc<CoreContext>, Bundle), BundleError> {
        if !self.is_valid() {
            return Err(BundleError::ContextInvalid);
        }
        let core = self.inner.core.upgrade().ok_or(BundleError::ContextInvalid)?;
        let bundle = self.inner.bundle.upgrade().ok_or(BundleError::ContextInvalid)?;
        Ok((core, bundle))
    }

    /// The bundle this context belongs to.
    pub fn bundle(&self) -> Result<Bundle> {
        Ok(self.check()?.1)
    }

    /// A manifest header of the owning bundle, falling back to the
    /// framework's launch properties.
    pub fn property(&self, key: &str) -> Result<Option<Value>> {
        let (core, bundle) = self.check()?;
        Ok(bundle.headers().get(key).cloned().or_else(|| core.framework_property(key)))
    }

    pub fn framework_properties(&self) -> Result<Properties> {
        Ok(self.check()?.0.framework_properties())
    }

    // --- Bundles ---

    /// Installs a bundle from `archive`. Installing a location twice
    /// returns the bundle installed first.
    pub fn install_bundle(&self, location: &str, archive: Arc<dyn BundleArchive>) -> Result<Bundle> {
        let (core, bundle) = self.check()?;
        Ok(core.install_bundle(location, archive, &bundle)?)
    }

    /// Installs the bundle stored in `dir` (see [`DirectoryArchive`]).
    pub fn install_bundle_dir(&self, dir: &Path) -> Result<Bundle> {
        let archive = DirectoryArchive::open(dir)?;
        self.install_bundle(&dir.display().to_string(), Arc::new(archive))
    }

    pub fn bundles(&self) -> Result<Vec<Bundle>> {
        Ok(self.check()?.0.bundles().all())
    }

    pub fn bundle_by_id(&self, id: BundleId) -> Result<Option<Bundle>> {
        Ok(self.check()?.0.bundles().get(id))
    }

    pub fn bundle_by_location(&self, location: &str) -> Result<Option<Bundle>> {
        Ok(self.check()?.0.bundles().by_location(location))
    }

    pub fn bundles_by_name(&self, symbolic_name: &str) -> Result<Vec<Bundle>> {
        Ok(self.check()?.0.bundles().by_symbolic_name(symbolic_name))
    }

    // --- Services ---

    pub fn register_service(&self, service: ServiceObject, properties: Properties) -> Result<ServiceRegistration> {
        let (core, bundle) = self.check()?;
        Ok(core.services().register_service(&core, &bundle, service, properties)?)
    }

    /// Registers `service` under the interface name of `T`.
    pub fn register<T: Any + Send + Sync>(&self, service: Arc<T>, properties: Properties) -> Result<ServiceRegistration> {
        self.register_service(ServiceObject::instance(interface_map(service)), properties)
    }

    /// References to services implementing `class` (all services when
    /// `None`) that match the LDAP `filter`, best first.
    pub fn service_references(&self, class: Option<&str>, filter: Option<&str>) -> Result<Vec<ServiceReference>> {
        let parsed = filter.map(crate::filter::ldap).transpose()?;
        self.service_references_with(class, parsed.as_ref())
    }

    pub fn service_references_with(&self, class: Option<&str>, filter: Option<&Filter>) -> Result<Vec<ServiceReference>> {
        let (core, bundle) = self.check()?;
        Ok(core.services().get(&core, class, filter, Some(&bundle)))
    }

    pub fn service_references_for<T: ?Sized + 'static>(&self, filter: Option<&str>) -> Result<Vec<ServiceReference>> {
        self.service_references(Some(&service_interface::<T>()), filter)
    }

    /// The best service implementing `class`.
    pub fn service_reference(&self, class: &str) -> Result<Option<ServiceReference>> {
        Ok(self.service_references(Some(class), None)?.into_iter().next())
    }

    pub fn service_reference_for<T: ?Sized + 'static>(&self) -> Result<Option<ServiceReference>> {
        self.service_reference(&service_interface::<T>())
    }

    /// Obtains the service's interface map, counting one use by this bundle.
    pub fn get_service_map(&self, reference: &ServiceReference) -> Result<InterfaceMapPtr> {
        let (core, bundle) = self.check()?;
        let core_ref = reference.resolve().ok_or(ServiceError::Unavailable { service_id: reference.id() })?;
        Ok(core.services().get_service(&core, &core_ref, &bundle)?)
    }

    /// Obtains the service object published as `T`. Returns `None` (after
    /// releasing the use again) if the service does not publish `T`.
    pub fn get_service<T: Any + Send + Sync>(&self, reference: &ServiceReference) -> Result<Option<Arc<T>>> {
        let map = self.get_service_map(reference)?;
        let object = match reference.interface() {
            Some(name) if name != service_interface::<T>() => None,
            _ => extract::<T>(&map),
        };
        if object.is_none() {
            self.unget_service(reference)?;
        }
        Ok(object)
    }

    /// Releases one use of the service. Returns false if this bundle was
    /// not using it.
    pub fn unget_service(&self, reference: &ServiceReference) -> Result<bool> {
        let (core, bundle) = self.check()?;
        let Some(core_ref) = reference.resolve() else {
            return Ok(false);
        };
        Ok(core.services().unget_service(&core, &core_ref, &bundle, true))
    }

    pub fn service_objects(&self, reference: &ServiceReference) -> Result<ServiceObjects> {
        let (_, bundle) = self.check()?;
        if !reference.is_valid() {
            return Err(ServiceError::Unavailable { service_id: reference.id() }.into());
        }
        Ok(ServiceObjects::new(reference.clone(), bundle))
    }

    pub fn add_find_hook(&self, hook: Arc<dyn FindHook>) -> Result<HookId> {
        Ok(self.check()?.0.hooks().add_find_hook(hook))
    }

    pub fn remove_find_hook(&self, id: HookId) -> Result<bool> {
        Ok(self.check()?.0.hooks().remove_find_hook(id))
    }

    // --- Listeners ---

    pub fn add_framework_listener<F>(&self, listener: F) -> Result<ListenerToken>
    where
        F: Fn(&FrameworkEvent) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let (core, _) = self.check()?;
        Ok(core.listeners().add_framework_listener(self, Arc::new(listener), None))
    }

    pub fn add_bundle_listener<F>(&self, listener: F) -> Result<ListenerToken>
    where
        F: Fn(&BundleEvent) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let (core, _) = self.check()?;
        Ok(core.listeners().add_bundle_listener(self, Arc::new(listener), None))
    }

    /// Adds a service listener, optionally restricted by an LDAP filter.
    pub fn add_service_listener<F>(&self, listener: F, filter: Option<&str>) -> Result<ListenerToken>
    where
        F: Fn(&ServiceEvent) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let parsed = filter.map(crate::filter::ldap).transpose()?;
        let (core, _) = self.check()?;
        Ok(core.listeners().add_service_listener(self, Arc::new(listener), None, parsed))
    }

    /// Adds a framework listener that can later be removed by `identity`.
    pub fn add_framework_listener_with_identity<F>(&self, listener: F, identity: ListenerIdentity) -> Result<ListenerToken>
    where
        F: Fn(&FrameworkEvent) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let (core, _) = self.check()?;
        Ok(core.listeners().add_framework_listener(self, Arc::new(listener), Some(identity)))
    }

    pub fn add_bundle_listener_with_identity<F>(&self, listener: F, identity: ListenerIdentity) -> Result<ListenerToken>
    where
        F: Fn(&BundleEvent) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let (core, _) = self.check()?;
        Ok(core.listeners().add_bundle_listener(self, Arc::new(listener), Some(identity)))
    }

    /// Adds a service listener keyed by `identity`; an earlier listener of
    /// this context with the same identity is replaced.
    pub fn add_service_listener_with_identity<F>(
        &self,
        listener: F,
        identity: ListenerIdentity,
        filter: Option<Filter>,
    ) -> Result<ListenerToken>
    where
        F: Fn(&ServiceEvent) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let (core, _) = self.check()?;
        Ok(core.listeners().add_service_listener(self, Arc::new(listener), Some(identity), filter))
    }

    /// Removes a listener added through this context (or, for framework
    /// listeners, through any context of the same bundle).
    pub fn remove_listener(&self, token: ListenerToken) -> Result<()> {
        let (core, _) = self.check()?;
        if core.listeners().remove_listener(self, token) {
            Ok(())
        } else {
            Err(crate::event::ListenerError::UnknownToken(token).into())
        }
    }

    pub fn remove_framework_listener(&self, identity: ListenerIdentity) -> Result<bool> {
        Ok(self.check()?.0.listeners().remove_framework_listener(self, identity))
    }

    pub fn remove_bundle_listener(&self, identity: ListenerIdentity) -> Result<bool> {
        Ok(self.check()?.0.listeners().remove_bundle_listener(self, identity))
    }

    pub fn remove_service_listener(&self, identity: ListenerIdentity) -> Result<bool> {
        Ok(self.check()?.0.listeners().remove_service_listener(self, identity))
    }

    // --- Storage ---

    /// Path of `name` inside the bundle's private data directory, which is
    /// created on demand and deleted when the bundle is uninstalled.
    pub fn data_file(&self, name: &str) -> Result<PathBuf> {
        let (core, _) = self.check()?;
        let dir = core.bundle_data_dir(self.bundle_id()).ok_or(BundleError::NoStorage)?;
        fs::create_dir_all(&dir).map_err(|e| BundleError::io("create_data_dir", &dir, e))?;
        Ok(dir.join(name))
    }
}

impl PartialEq for BundleContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for BundleContext {}

impl fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleContext")
            .field("id", &self.inner.id)
            .field("bundle_id", &self.inner.bundle_id)
            .field("valid", &self.is_valid())
            .finish()
    }
}
