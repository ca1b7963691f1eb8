use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use crate::bundle::BundleContext;
use crate::bundle::loader::ModuleHandle;
use crate::kernel::guard::BoxError;

/// Entry points a bundle provides to be told when it starts and stops.
///
/// `start` runs on a bundle worker thread while the bundle is STARTING; an
/// error (or panic) rolls the start back. `stop` runs while the bundle is
/// STOPPING; the framework cleans up the bundle's services and listeners
/// afterwards whatever it returns.
pub trait BundleActivator: Send {
    fn start(&mut self, context: &BundleContext) -> Result<(), BoxError>;

    fn stop(&mut self, context: &BundleContext) -> Result<(), BoxError>;
}

/// Exported by shared-library bundles; returns a leaked
/// `Box<Box<dyn BundleActivator>>`.
pub type ActivatorConstructorFn = unsafe extern "C-unwind" fn() -> *mut c_void;
/// Frees what the matching constructor returned.
pub type ActivatorDestructorFn = unsafe extern "C-unwind" fn(*mut c_void);

/// A live activator, either created in-process or by a loaded library.
pub enum ActivatorInstance {
    Native(Box<dyn BundleActivator>),
    Foreign {
        raw: *mut c_void,
        destroy: ActivatorDestructorFn,
        /// Keeps the library mapped until the activator is destroyed.
        module: Arc<dyn ModuleHandle>,
    },
}

// SAFETY: a foreign activator is a `Box<dyn BundleActivator>` and
// `BundleActivator: Send`; the raw pointer is only touched by its owner.
unsafe impl Send for ActivatorInstance {}

impl ActivatorInstance {
    /// Takes ownership of a pointer produced by a library's constructor.
    ///
    /// # Safety
    /// `raw` must come from `Box::into_raw(Box::new(Box<dyn BundleActivator>))`
    /// built with the same compiler as this crate, and `destroy` must free it.
    pub unsafe fn from_raw(raw: *mut c_void, destroy: ActivatorDestructorFn, module: Arc<dyn ModuleHandle>) -> Self {
        ActivatorInstance::Foreign { raw, destroy, module }
    }

    pub fn activator_mut(&mut self) -> &mut dyn BundleActivator {
        match self {
            ActivatorInstance::Native(activator) => activator.as_mut(),
            ActivatorInstance::Foreign { raw, .. } => {
                // SAFETY: see `from_raw`.
                let boxed = unsafe { &mut *(*raw as *mut Box<dyn BundleActivator>) };
                boxed.as_mut()
            }
        }
    }
}

impl Drop for ActivatorInstance {
    fn drop(&mut self) {
        if let ActivatorInstance::Foreign { raw, destroy, .. } = self {
            if !raw.is_null() {
                // SAFETY: the library is still loaded, `module` is dropped after this.
                unsafe { (*destroy)(*raw) };
                *raw = std::ptr::null_mut();
            }
        }
    }
}

impl fmt::Debug for ActivatorInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivatorInstance::Native(_) => f.write_str("ActivatorInstance::Native"),
            ActivatorInstance::Foreign { module, .. } => {
                f.debug_struct("ActivatorInstance::Foreign").field("module", &module.location()).finish()
            }
        }
    }
}

/// Exports the activator constructor and destructor symbols from a
/// `cdylib` bundle.
///
/// ```ignore
/// struct Greeter;
/// impl lattice_core::bundle::BundleActivator for Greeter { /* ... */ }
/// lattice_core::export_bundle_activator!(Greeter);
/// ```
#[macro_export]
macro_rules! export_bundle_activator {
    ($ctor:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C-unwind" fn _lattice_create_bundle_activator() -> *mut ::std::ffi::c_void {
            let activator: ::std::boxed::Box<dyn $crate::bundle::BundleActivator> = ::std::boxed::Box::new($ctor);
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(activator)) as *mut ::std::ffi::c_void
        }

        /// # Safety
        /// `raw` must come from `_lattice_create_bundle_activator`.
        #[unsafe(no_mangle)]
        pub unsafe extern "C-unwind" fn _lattice_destroy_bundle_activator(raw: *mut ::std::ffi::c_void) {
            if !raw.is_null() {
                drop(unsafe {
                    ::std::boxed::Box::from_raw(raw as *mut ::std::boxed::Box<dyn $crate::bundle::BundleActivator>)
                });
            }
        }
    };
}
