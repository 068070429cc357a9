//! Numbered instrumentation points in the maintenance and creation paths
//!
//! A harness installs a [`MaintenanceHook`] to pause or observe a thread at a
//! given spot and force an interleaving with another thread. The installed
//! hook is read once per maintenance call ([`current`]) and passed down the
//! call chain as a [`HookHandle`]; nothing deeper reads the global slot.
//!
//! No hook is installed by default. Install before traffic starts and keep
//! the [`HookGuard`] alive for the duration of the test.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::Key;

/// Interception points, numbered in the order a thread reaches them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookSpot {
    /// Index registered for maintenance, region scan not started
    BeforeInitialScan = 1,
    /// Region scan finished, index not yet published
    AfterInitialScan = 2,
    /// Index visible through the manager
    AfterPublish = 3,
    /// Mutation holds the entry lock; maintenance targets not yet read
    MaintenanceStart = 4,
    /// Entry lock held, this index not yet touched
    AfterEntryLockBeforeIndexUpdate = 5,
    /// This index updated, entry lock still held
    AfterIndexUpdate = 6,
    /// Async worker dequeued an update, indexes not yet touched
    AsyncBeforeApply = 7,
    /// Index unregistered from maintenance, structure not yet discarded
    AfterUnregister = 8,
}

impl HookSpot {
    pub fn number(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for HookSpot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.number())
    }
}

/// Where a spot was reached
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// Full path of the region (`/portfolios`)
    pub region: &'a str,
    pub index: Option<&'a str>,
    pub key: Option<&'a Key>,
}

pub trait MaintenanceHook: Send + Sync {
    fn hook(&self, spot: HookSpot, ctx: &HookContext<'_>);
}

/// Closures are hooks
impl<F> MaintenanceHook for F
where
    F: Fn(HookSpot, &HookContext<'_>) + Send + Sync,
{
    fn hook(&self, spot: HookSpot, ctx: &HookContext<'_>) {
        self(spot, ctx)
    }
}

static HOOK: RwLock<Option<Arc<dyn MaintenanceHook>>> = parking_lot::const_rwlock(None);

/// Hook captured for one call chain
#[derive(Clone, Default)]
pub struct HookHandle(Option<Arc<dyn MaintenanceHook>>);

impl HookHandle {
    pub fn none() -> Self {
        Self(None)
    }

    #[inline]
    pub fn fire(&self, spot: HookSpot, ctx: &HookContext<'_>) {
        if let Some(hook) = &self.0 {
            hook.hook(spot, ctx);
        }
    }

    pub fn is_installed(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HookHandle").field(&self.is_installed()).finish()
    }
}

/// Capture the installed hook
pub fn current() -> HookHandle {
    HookHandle(HOOK.read().clone())
}

/// Replace the installed hook, returning the previous one
pub fn set_hook(hook: Option<Arc<dyn MaintenanceHook>>) -> Option<Arc<dyn MaintenanceHook>> {
    std::mem::replace(&mut *HOOK.write(), hook)
}

/// Install `hook` until the guard is dropped
pub fn install(hook: Arc<dyn MaintenanceHook>) -> HookGuard {
    HookGuard {
        previous: set_hook(Some(hook)),
    }
}

/// Restores the previously installed hook on drop
#[must_use = "the hook is uninstalled when the guard is dropped"]
pub struct HookGuard {
    previous: Option<Arc<dyn MaintenanceHook>>,
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        set_hook(self.previous.take());
    }
}
