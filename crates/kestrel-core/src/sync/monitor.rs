//! Waiter sets keyed by monitor identity

use crate::object::ObjectRef;
use crate::scheduler::ThreadId;
use rustc_hash::FxHashMap;

/// Opaque lock identity
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorId(u64);

impl MonitorId {
    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a MonitorId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        MonitorId(id)
    }
}

impl From<ObjectRef> for MonitorId {
    fn from(r: ObjectRef) -> Self {
        MonitorId(r.as_u64())
    }
}

/// Ordered waiter lists, one per monitor
#[derive(Debug, Default)]
pub struct WaitSets {
    sets: FxHashMap<MonitorId, Vec<ThreadId>>,
}

impl WaitSets {
    /// Create empty wait sets
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `thread` to the waiters of `monitor`
    pub fn add(&mut self, monitor: MonitorId, thread: ThreadId) {
        let waiters = self.sets.entry(monitor).or_default();
        if !waiters.contains(&thread) {
            waiters.push(thread);
        }
    }

    /// Waiters of `monitor` in arrival order
    pub fn waiters(&self, monitor: MonitorId) -> &[ThreadId] {
        self.sets.get(&monitor).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every waiting thread across all monitors
    pub fn all_waiters(&self) -> Vec<ThreadId> {
        self.sets.values().flatten().copied().collect()
    }

    /// Whether `thread` waits on any monitor
    pub fn is_waiting(&self, thread: ThreadId) -> bool {
        self.sets.values().any(|w| w.contains(&thread))
    }

    /// Remove and return the oldest waiter of `monitor`
    pub fn remove_first(&mut self, monitor: MonitorId) -> Option<ThreadId> {
        let waiters = self.sets.get_mut(&monitor)?;
        if waiters.is_empty() {
            return None;
        }
        let first = waiters.remove(0);
        if waiters.is_empty() {
            self.sets.remove(&monitor);
        }
        Some(first)
    }

    /// Remove and return every waiter of `monitor`
    pub fn remove_all(&mut self, monitor: MonitorId) -> Vec<ThreadId> {
        self.sets.remove(&monitor).unwrap_or_default()
    }

    /// Drop `thread` from every waiter set
    pub fn remove_thread(&mut self, thread: ThreadId) {
        self.sets.retain(|_, waiters| {
            waiters.retain(|t| *t != thread);
            !waiters.is_empty()
        });
    }
}
