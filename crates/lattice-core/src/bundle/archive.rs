use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde_json::Value;

use crate::bundle::BundleError;
use crate::kernel::constants::AUTOSTART_STOPPED;
use crate::properties::Properties;

/// Storage backing an installed bundle: its manifest, its resources and
/// the persisted autostart setting.
pub trait BundleArchive: Send + Sync + Debug {
    /// Bytes of the resource at `path`, if present.
    fn resource(&self, path: &str) -> Option<Vec<u8>>;

    fn manifest_headers(&self) -> Properties;

    /// Drops persisted state once the bundle is uninstalled.
    fn purge(&self);

    fn set_autostart_setting(&self, setting: i32);

    /// `-1` for stopped, `0` for eager start.
    fn autostart_setting(&self) -> i32;

    fn last_modified(&self) -> SystemTime;

    fn set_last_modified(&self, time: SystemTime);
}

/// An archive held entirely in memory.
#[derive(Debug)]
pub struct MemoryArchive {
    headers: Properties,
    resources: HashMap<String, Vec<u8>>,
    autostart: AtomicI32,
    last_modified: Mutex<SystemTime>,
    purged: AtomicBool,
}

impl MemoryArchive {
    pub fn new(headers: Properties) -> Self {
        Self {
            headers,
            resources: HashMap::new(),
            autostart: AtomicI32::new(AUTOSTART_STOPPED),
            last_modified: Mutex::new(SystemTime::now()),
            purged: AtomicBool::new(false),
        }
    }

    /// Builds an archive from a JSON object of headers.
    pub fn from_json(headers: &Value) -> Result<Self, BundleError> {
        let headers = Properties::from_json(headers).map_err(|e| BundleError::InvalidManifest {
            location: "<memory>".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(headers))
    }

    pub fn with_resource(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.resources.insert(path.into(), data.into());
        self
    }

    pub fn is_purged(&self) -> bool {
        self.purged.load(Ordering::Acquire)
    }
}

impl BundleArchive for MemoryArchive {
    fn resource(&self, path: &str) -> Option<Vec<u8>> {
        self.resources.get(path.trim_start_matches('/')).cloned()
    }

    fn manifest_headers(&self) -> Properties {
        self.headers.clone()
    }

    fn purge(&self) {
        self.purged.store(true, Ordering::Release);
        self.autostart.store(AUTOSTART_STOPPED, Ordering::Release);
    }

    fn set_autostart_setting(&self, setting: i32) {
        self.autostart.store(setting, Ordering::Release);
    }

    fn autostart_setting(&self) -> i32 {
        self.autostart.load(Ordering::Acquire)
    }

    fn last_modified(&self) -> SystemTime {
        *self.last_modified.lock()
    }

    fn set_last_modified(&self, time: SystemTime) {
        *self.last_modified.lock() = time;
    }
}

/// An archive read from a directory containing `manifest.json` and the
/// bundle's resources.
#[derive(Debug)]
pub struct DirectoryArchive {
    root: PathBuf,
    headers: Properties,
    autostart: AtomicI32,
    last_modified: Mutex<SystemTime>,
}

pub const MANIFEST_FILE: &str = "manifest.json";

impl DirectoryArchive {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BundleError> {
        let root = root.into();
        let manifest_path = root.join(MANIFEST_FILE);
        let content = fs::read_to_string(&manifest_path).map_err(|e| BundleError::io("read_manifest", &manifest_path, e))?;
        let invalid = |reason: String| BundleError::InvalidManifest { location: root.display().to_string(), reason };
        let value: Value = serde_json::from_str(&content).map_err(|e| invalid(format!("failed to parse {MANIFEST_FILE}: {e}")))?;
        if !value.is_object() {
            return Err(invalid(format!("{MANIFEST_FILE} must contain a JSON object")));
        }
        let headers = Properties::from_json(&value).map_err(|e| invalid(e.to_string()))?;
        let last_modified = fs::metadata(&manifest_path).and_then(|m| m.modified()).unwrap_or_else(|_| SystemTime::now());
        Ok(Self {
            root,
            headers,
            autostart: AtomicI32::new(AUTOSTART_STOPPED),
            last_modified: Mutex::new(last_modified),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        (!escapes).then(|| self.root.join(relative))
    }
}

impl BundleArchive for DirectoryArchive {
    fn resource(&self, path: &str) -> Option<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(full).ok()
    }

    fn manifest_headers(&self) -> Properties {
        self.headers.clone()
    }

    fn purge(&self) {
        self.autostart.store(AUTOSTART_STOPPED, Ordering::Release);
    }

    fn set_autostart_setting(&self, setting: i32) {
        self.autostart.store(setting, Ordering::Release);
    }

    fn autostart_setting(&self) -> i32 {
        self.autostart.load(Ordering::Acquire)
    }

    fn last_modified(&self) -> SystemTime {
        *self.last_modified.lock()
    }

    fn set_last_modified(&self, time: SystemTime) {
        *self.last_modified.lock() = time;
    }
}
