use std::time::Duration;

/// Framework name
pub const FRAMEWORK_NAME: &str = "Lattice";

/// Framework version, published as a framework property
pub const FRAMEWORK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Framework vendor, published as a framework property
pub const FRAMEWORK_VENDOR: &str = "Lattice Developers";

// --- Framework property keys ---

pub const PROP_FRAMEWORK_VERSION: &str = "org.lattice.framework.version";
pub const PROP_FRAMEWORK_VENDOR: &str = "org.lattice.framework.vendor";
pub const PROP_FRAMEWORK_STORAGE: &str = "org.lattice.framework.storage";

// --- Reserved service property keys ---

/// Interface names implemented by a service (array of strings)
pub const OBJECTCLASS: &str = "objectclass";
/// Numeric service id assigned at registration
pub const SERVICE_ID: &str = "service.id";
/// Integer service ranking; absent means 0
pub const SERVICE_RANKING: &str = "service.ranking";
/// One of [`SCOPE_SINGLETON`], [`SCOPE_BUNDLE`], [`SCOPE_PROTOTYPE`]
pub const SERVICE_SCOPE: &str = "service.scope";

pub const SCOPE_SINGLETON: &str = "singleton";
pub const SCOPE_BUNDLE: &str = "bundle";
pub const SCOPE_PROTOTYPE: &str = "prototype";

/// Property keys indexed by the service listener fast path
pub const HASHED_KEYS: [&str; 2] = [OBJECTCLASS, SERVICE_ID];

// --- Bundle manifest headers ---

pub const BUNDLE_SYMBOLIC_NAME: &str = "bundle.symbolic_name";
pub const BUNDLE_VERSION: &str = "bundle.version";
pub const BUNDLE_ACTIVATOR: &str = "bundle.activator";
pub const BUNDLE_NAME: &str = "bundle.name";
pub const BUNDLE_DESCRIPTION: &str = "bundle.description";
/// Symbolic names that must be installed before the bundle can resolve
pub const BUNDLE_REQUIRES: &str = "bundle.requires";

// --- System bundle ---

pub const SYSTEM_BUNDLE_ID: u64 = 0;
pub const SYSTEM_BUNDLE_SYMBOLIC_NAME: &str = "system_bundle";
pub const SYSTEM_BUNDLE_LOCATION: &str = "System Bundle";

// --- Activator symbols exported by shared-library bundles ---

pub const ACTIVATOR_CONSTRUCTOR_SYMBOL: &str = "_lattice_create_bundle_activator";
pub const ACTIVATOR_DESTRUCTOR_SYMBOL: &str = "_lattice_destroy_bundle_activator";

/// Autostart setting meaning "do not start on framework launch"
pub const AUTOSTART_STOPPED: i32 = -1;
/// Autostart setting for an eager, persistent start
pub const AUTOSTART_EAGER: i32 = 0;

/// How long an idle bundle worker thread waits for new work before exiting
pub const THREAD_KEEP_ALIVE: Duration = Duration::from_secs(1);

/// Default number of entries kept by the diagnostic log
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 256;

/// Sub-directory of the storage location holding per-bundle data
pub const BUNDLE_DATA_DIR: &str = "data";
