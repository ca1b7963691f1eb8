use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use libloading::{Library, Symbol};
use parking_lot::RwLock;

use crate::bundle::BundleError;
use crate::bundle::activator::{ActivatorConstructorFn, ActivatorDestructorFn, ActivatorInstance, BundleActivator};
use crate::kernel::guard::panic_message;

/// A loaded bundle module.
pub trait ModuleHandle: Send + Sync + Debug {
    fn location(&self) -> &str;

    fn is_loaded(&self) -> bool;

    /// Creates the module's activator through its exported constructor.
    fn activator(self: Arc<Self>, constructor: &str, destructor: &str) -> Result<ActivatorInstance, BundleError>;
}

/// Turns a bundle location into a loaded module.
pub trait ModuleLoader: Send + Sync + Debug {
    fn load(&self, location: &str, flags: i32) -> Result<Arc<dyn ModuleHandle>, BundleError>;
}

/// Loads shared libraries with `libloading`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibraryLoader;

impl LibraryLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for LibraryLoader {
    fn load(&self, location: &str, flags: i32) -> Result<Arc<dyn ModuleHandle>, BundleError> {
        let library = open_library(location, flags).map_err(|e| BundleError::Load {
            location: location.to_string(),
            message: format!("libloading error: {e}"),
        })?;
        log::debug!(target: "lattice::bundle", "Loaded shared library '{}'", location);
        Ok(Arc::new(LibraryModule { location: location.to_string(), library }))
    }
}

#[cfg(unix)]
fn open_library(location: &str, flags: i32) -> Result<Library, libloading::Error> {
    // SAFETY: running library initialisers is inherent to loading a bundle.
    unsafe {
        if flags != 0 {
            libloading::os::unix::Library::open(Some(location), flags).map(Library::from)
        } else {
            Library::new(location)
        }
    }
}

#[cfg(not(unix))]
fn open_library(location: &str, _flags: i32) -> Result<Library, libloading::Error> {
    // SAFETY: see the unix variant.
    unsafe { Library::new(location) }
}

struct LibraryModule {
    location: String,
    library: Library,
}

impl Debug for LibraryModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryModule").field("location", &self.location).finish_non_exhaustive()
    }
}

impl LibraryModule {
    fn symbol<T: Copy>(&self, name: &str) -> Result<T, BundleError> {
        let mut bytes = name.as_bytes().to_vec();
        bytes.push(0);
        // SAFETY: the symbol types are fixed by the export macro.
        let symbol: Symbol<T> = unsafe { self.library.get(&bytes) }.map_err(|_| BundleError::MissingSymbol {
            location: self.location.clone(),
            symbol: name.to_string(),
        })?;
        Ok(*symbol)
    }
}

impl ModuleHandle for LibraryModule {
    fn location(&self) -> &str {
        &self.location
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn activator(self: Arc<Self>, constructor: &str, destructor: &str) -> Result<ActivatorInstance, BundleError> {
        let create: ActivatorConstructorFn = self.symbol(constructor)?;
        let destroy: ActivatorDestructorFn = self.symbol(destructor)?;
        // SAFETY: `create` is the exported constructor.
        let raw = panic::catch_unwind(|| unsafe { create() }).map_err(|payload| BundleError::Load {
            location: self.location.clone(),
            message: format!("activator constructor panicked: {}", panic_message(payload.as_ref())),
        })?;
        if raw.is_null() {
            return Err(BundleError::Load {
                location: self.location.clone(),
                message: "activator constructor returned null".to_string(),
            });
        }
        // SAFETY: `raw` came from the paired constructor.
        Ok(unsafe { ActivatorInstance::from_raw(raw, destroy, self) })
    }
}

/// Builds the activator of a statically linked bundle.
pub type ActivatorConstructor = Arc<dyn Fn() -> Box<dyn BundleActivator> + Send + Sync>;

/// Resolves locations to activators compiled into the host binary, and
/// hands any other location to an optional fallback loader.
#[derive(Default)]
pub struct StaticModuleLoader {
    modules: RwLock<HashMap<String, ActivatorConstructor>>,
    fallback: Option<Arc<dyn ModuleLoader>>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: Arc<dyn ModuleLoader>) -> Self {
        Self { modules: RwLock::new(HashMap::new()), fallback: Some(fallback) }
    }

    pub fn register<F, A>(&self, location: impl Into<String>, constructor: F)
    where
        F: Fn() -> A + Send + Sync + 'static,
        A: BundleActivator + 'static,
    {
        let constructor: ActivatorConstructor = Arc::new(move || Box::new(constructor()) as Box<dyn BundleActivator>);
        self.modules.write().insert(location.into(), constructor);
    }

    pub fn unregister(&self, location: &str) -> bool {
        self.modules.write().remove(location).is_some()
    }

    pub fn contains(&self, location: &str) -> bool {
        self.modules.read().contains_key(location)
    }
}

impl Debug for StaticModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut locations: Vec<String> = self.modules.read().keys().cloned().collect();
        locations.sort();
        f.debug_struct("StaticModuleLoader")
            .field("modules", &locations)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load(&self, location: &str, flags: i32) -> Result<Arc<dyn ModuleHandle>, BundleError> {
        if let Some(constructor) = self.modules.read().get(location).cloned() {
            return Ok(Arc::new(StaticModule { location: location.to_string(), constructor }));
        }
        match &self.fallback {
            Some(fallback) => fallback.load(location, flags),
            None => Err(BundleError::Load {
                location: location.to_string(),
                message: "no statically linked module is registered for this location".to_string(),
            }),
        }
    }
}

struct StaticModule {
    location: String,
    constructor: ActivatorConstructor,
}

impl Debug for StaticModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticModule").field("location", &self.location).finish_non_exhaustive()
    }
}

impl ModuleHandle for StaticModule {
    fn location(&self) -> &str {
        &self.location
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn activator(self: Arc<Self>, _constructor: &str, _destructor: &str) -> Result<ActivatorInstance, BundleError> {
        panic::catch_unwind(AssertUnwindSafe(|| (self.constructor)()))
            .map(ActivatorInstance::Native)
            .map_err(|payload| BundleError::Load {
                location: self.location.clone(),
                message: format!("activator constructor panicked: {}", panic_message(payload.as_ref())),
            })
    }
}
