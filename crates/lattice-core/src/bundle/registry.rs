use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use crate::bundle::archive::BundleArchive;
use crate::bundle::{Bundle, BundleError, BundleId, BundleManifest, BundleState};
use crate::kernel::context::CoreContext;

#[derive(Default)]
struct Tables {
    by_id: BTreeMap<BundleId, Bundle>,
    by_location: HashMap<String, BundleId>,
}

/// Table of installed bundles, indexed by id and by location.
pub struct BundleRegistry {
    tables: RwLock<Tables>,
    /// Serializes installs so the duplicate check and the insert are atomic.
    install_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl Default for BundleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleRegistry {
    pub fn new() -> Self {
        Self { tables: RwLock::new(Tables::default()), install_lock: Mutex::new(()), next_id: AtomicU64::new(1) }
    }

    pub(crate) fn insert_system(&self, bundle: Bundle) {
        let mut tables = self.tables.write();
        tables.by_location.insert(bundle.location().to_string(), bundle.id());
        tables.by_id.insert(bundle.id(), bundle);
    }

    /// Installs the bundle at `location`.
    ///
    /// Returns the already installed bundle, and `false`, when `location`
    /// is taken. Fails when another bundle has the same symbolic name and
    /// version.
    pub(crate) fn install(
        &self,
        core: &Arc<CoreContext>,
        location: &str,
        archive: Arc<dyn BundleArchive>,
    ) -> Result<(Bundle, bool), BundleError> {
        let _install = self.install_lock.lock();
        if let Some(existing) = self.by_location(location) {
            return Ok((existing, false));
        }

        let manifest = BundleManifest::parse(location, archive.manifest_headers())?;
        if let Some(existing) = self
            .by_symbolic_name(&manifest.symbolic_name)
            .into_iter()
            .find(|bundle| bundle.version() == &manifest.version)
        {
            return Err(BundleError::DuplicateBundle {
                symbolic_name: manifest.symbolic_name,
                version: manifest.version.to_string(),
                existing_id: existing.id(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        archive.set_last_modified(SystemTime::now());
        let bundle = Bundle::new(id, location.to_string(), manifest, archive, Arc::downgrade(core));
        {
            let mut tables = self.tables.write();
            tables.by_location.insert(location.to_string(), id);
            tables.by_id.insert(id, bundle.clone());
        }
        log::info!(
            target: "lattice::bundle",
            "Installed bundle #{} ({} {}) from '{}'",
            id,
            bundle.symbolic_name(),
            bundle.version(),
            location
        );
        Ok((bundle, true))
    }

    pub fn get(&self, id: BundleId) -> Option<Bundle> {
        self.tables.read().by_id.get(&id).cloned()
    }

    pub fn by_location(&self, location: &str) -> Option<Bundle> {
        let tables = self.tables.read();
        tables.by_location.get(location).and_then(|id| tables.by_id.get(id)).cloned()
    }

    /// Installed bundles with this symbolic name, lowest id first.
    pub fn by_symbolic_name(&self, name: &str) -> Vec<Bundle> {
        self.tables.read().by_id.values().filter(|b| b.symbolic_name() == name).cloned().collect()
    }

    /// All installed bundles, ordered by id.
    pub fn all(&self) -> Vec<Bundle> {
        self.tables.read().by_id.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().by_id.is_empty()
    }

    /// Whether a bundle with this symbolic name is installed.
    pub fn is_installed(&self, name: &str) -> bool {
        self.tables
            .read()
            .by_id
            .values()
            .any(|b| b.symbolic_name() == name && b.state() != BundleState::Uninstalled)
    }

    pub(crate) fn remove(&self, bundle: &Bundle) -> bool {
        let mut tables = self.tables.write();
        match tables.by_id.get(&bundle.id()) {
            Some(found) if found == bundle => {}
            _ => return false,
        }
        tables.by_id.remove(&bundle.id());
        tables.by_location.remove(bundle.location());
        true
    }
}

impl fmt::Debug for BundleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("BundleRegistry")
            .field("bundles", &tables.by_id.values().map(|b| b.to_string()).collect::<Vec<_>>())
            .finish()
    }
}
