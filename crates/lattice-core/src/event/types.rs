use std::any::Any;
use std::fmt;

use crate::bundle::Bundle;
use crate::event::Event;
use crate::kernel::guard::SharedError;
use crate::service::ServiceReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleEventKind {
    Installed,
    Started,
    Stopped,
    Updated,
    Uninstalled,
    Resolved,
    Unresolved,
    Starting,
    Stopping,
    LazyActivation,
}

/// A bundle changed lifecycle state.
#[derive(Debug, Clone)]
pub struct BundleEvent {
    kind: BundleEventKind,
    bundle: Bundle,
    origin: Bundle,
}

impl BundleEvent {
    pub fn new(kind: BundleEventKind, bundle: Bundle) -> Self {
        Self { kind, origin: bundle.clone(), bundle }
    }

    /// An event caused by an operation on behalf of another bundle
    /// (e.g. an install issued through that bundle's context).
    pub fn with_origin(kind: BundleEventKind, bundle: Bundle, origin: Bundle) -> Self {
        Self { kind, bundle, origin }
    }

    pub fn kind(&self) -> BundleEventKind {
        self.kind
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub fn origin(&self) -> &Bundle {
        &self.origin
    }
}

impl Event for BundleEvent {
    fn name(&self) -> &'static str {
        match self.kind {
            BundleEventKind::Installed => "bundle.installed",
            BundleEventKind::Started => "bundle.started",
            BundleEventKind::Stopped => "bundle.stopped",
            BundleEventKind::Updated => "bundle.updated",
            BundleEventKind::Uninstalled => "bundle.uninstalled",
            BundleEventKind::Resolved => "bundle.resolved",
            BundleEventKind::Unresolved => "bundle.unresolved",
            BundleEventKind::Starting => "bundle.starting",
            BundleEventKind::Stopping => "bundle.stopping",
            BundleEventKind::LazyActivation => "bundle.lazy_activation",
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameworkEventKind {
    Started,
    Error,
    Warning,
    Info,
    Stopped,
    StoppedUpdate,
    WaitTimedOut,
}

/// A framework-wide notification, often carrying a captured error.
#[derive(Clone)]
pub struct FrameworkEvent {
    kind: FrameworkEventKind,
    bundle: Option<Bundle>,
    message: String,
    error: Option<SharedError>,
}

impl FrameworkEvent {
    pub fn new(kind: FrameworkEventKind, bundle: Option<Bundle>, message: impl Into<String>, error: Option<SharedError>) -> Self {
        Self { kind, bundle, message: message.into(), error }
    }

    pub fn kind(&self) -> FrameworkEventKind {
        self.kind
    }

    pub fn bundle(&self) -> Option<&Bundle> {
        self.bundle.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error(&self) -> Option<&SharedError> {
        self.error.as_ref()
    }

    /// Looks for an error of type `E` in the captured error and its sources.
    pub fn find_error<E: std::error::Error + 'static>(&self) -> Option<&E> {
        let mut current = self.error.as_deref().map(|e| e as &(dyn std::error::Error + 'static));
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            current = err.source();
        }
        None
    }
}

impl fmt::Debug for FrameworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameworkEvent")
            .field("kind", &self.kind)
            .field("bundle", &self.bundle.as_ref().map(Bundle::id))
            .field("message", &self.message)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

impl Event for FrameworkEvent {
    fn name(&self) -> &'static str {
        match self.kind {
            FrameworkEventKind::Started => "framework.started",
            FrameworkEventKind::Error => "framework.error",
            FrameworkEventKind::Warning => "framework.warning",
            FrameworkEventKind::Info => "framework.info",
            FrameworkEventKind::Stopped => "framework.stopped",
            FrameworkEventKind::StoppedUpdate => "framework.stopped_update",
            FrameworkEventKind::WaitTimedOut => "framework.wait_timedout",
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceEventKind {
    Registered,
    Modified,
    Unregistering,
    /// Properties changed and the listener's filter no longer matches.
    ModifiedEndMatch,
}

#[derive(Debug, Clone)]
pub struct ServiceEvent {
    kind: ServiceEventKind,
    reference: ServiceReference,
}

impl ServiceEvent {
    pub fn new(kind: ServiceEventKind, reference: ServiceReference) -> Self {
        Self { kind, reference }
    }

    pub fn kind(&self) -> ServiceEventKind {
        self.kind
    }

    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }
}

impl Event for ServiceEvent {
    fn name(&self) -> &'static str {
        match self.kind {
            ServiceEventKind::Registered => "service.registered",
            ServiceEventKind::Modified => "service.modified",
            ServiceEventKind::Unregistering => "service.unregistering",
            ServiceEventKind::ModifiedEndMatch => "service.modified_endmatch",
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
