use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Lifecycle state of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BundleState {
    Installed = 0,
    Resolved = 1,
    Starting = 2,
    Active = 3,
    Stopping = 4,
    Uninstalled = 5,
}

impl BundleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BundleState::Installed,
            1 => BundleState::Resolved,
            2 => BundleState::Starting,
            3 => BundleState::Active,
            4 => BundleState::Stopping,
            _ => BundleState::Uninstalled,
        }
    }

    /// States in which the bundle's activator may be running.
    pub fn is_activated(self) -> bool {
        matches!(self, BundleState::Starting | BundleState::Active | BundleState::Stopping)
    }
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BundleState::Installed => "INSTALLED",
            BundleState::Resolved => "RESOLVED",
            BundleState::Starting => "STARTING",
            BundleState::Active => "ACTIVE",
            BundleState::Stopping => "STOPPING",
            BundleState::Uninstalled => "UNINSTALLED",
        };
        f.write_str(name)
    }
}

/// The transition a thread is running for a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Activating,
    Deactivating,
    Uninstalling,
    Unresolving,
}

/// Outcome of the race between a waiting caller and the worker running
/// the activator, kept per dispatched operation. Whoever moves it away
/// from `None` first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Aborted {
    None = 0,
    /// The caller gave up; the worker's result is discarded.
    Yes = 1,
    /// The worker finished in time.
    No = 2,
}

impl Aborted {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Aborted::Yes,
            2 => Aborted::No,
            _ => Aborted::None,
        }
    }
}

macro_rules! atomic_enum {
    ($name:ident, $ty:ty) => {
        #[derive(Debug)]
        pub(crate) struct $name(AtomicU8);

        impl $name {
            pub(crate) fn new(value: $ty) -> Self {
                Self(AtomicU8::new(value as u8))
            }

            pub(crate) fn get(&self) -> $ty {
                <$ty>::from_u8(self.0.load(Ordering::Acquire))
            }

            pub(crate) fn set(&self, value: $ty) {
                self.0.store(value as u8, Ordering::Release);
            }

            /// Stores `new` if the current value is `current`.
            pub(crate) fn transition(&self, current: $ty, new: $ty) -> bool {
                self.0
                    .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            }
        }
    };
}

atomic_enum!(AtomicState, BundleState);
atomic_enum!(AtomicAborted, Aborted);

impl Default for AtomicAborted {
    fn default() -> Self {
        Self::new(Aborted::None)
    }
}

/// Options for [`Bundle::start_with`](crate::bundle::Bundle::start_with).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Do not record the start in the persistent autostart setting.
    pub transient: bool,
    /// Overrides the framework's default start/stop timeout.
    pub timeout: Option<Duration>,
}

impl StartOptions {
    pub fn transient() -> Self {
        Self { transient: true, timeout: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for [`Bundle::stop_with`](crate::bundle::Bundle::stop_with).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Leave the persistent autostart setting untouched.
    pub transient: bool,
    pub timeout: Option<Duration>,
}

impl StopOptions {
    pub fn transient() -> Self {
        Self { transient: true, timeout: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
