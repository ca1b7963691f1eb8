//! Bundle lifecycle, service registry and event runtime.
pub mod bundle;
pub mod event;
pub mod filter;
pub mod kernel;
pub mod properties;
pub mod service;

// Re-export key public types for bundle authors and hosts
pub use bundle::{
    Bundle, BundleActivator, BundleArchive, BundleContext, BundleError, BundleId, BundleState, DirectoryArchive,
    MemoryArchive, StartOptions, StaticModuleLoader, StopOptions,
};
pub use event::{
    BundleEvent, BundleEventKind, Event, FrameworkEvent, FrameworkEventKind, ListenerIdentity, ListenerToken,
    ServiceEvent, ServiceEventKind,
};
pub use filter::{Filter, LdapFilter};
pub use kernel::error::{Error, Result};
pub use kernel::{BoxError, Framework, FrameworkConfig};
pub use properties::Properties;
pub use service::{
    ServiceFactory, ServiceId, ServiceObject, ServiceObjects, ServiceReference, ServiceRegistration, ServiceScope,
};
