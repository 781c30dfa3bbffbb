//! Logical guest threads

use crate::object::ObjectRef;
use crate::stack::CallStack;
use std::fmt;
use std::time::Instant;

/// Identity of a logical thread, unique within one runtime instance
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a ThreadId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        ThreadId(id)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable state of a logical thread
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ThreadState {
    /// Eligible for selection
    Runnable,
    /// Waiting on a monitor
    BlockedOnMonitor,
    /// Park count is positive
    Parked,
    /// Finished; no longer in the pool
    Dead,
}

/// A guest thread: identity, call stack and park/sleep bookkeeping
pub struct LogicalThread {
    pub(crate) id: ThreadId,
    pub(crate) name: String,
    pub(crate) object: Option<ObjectRef>,
    pub(crate) stack: CallStack,
    pub(crate) alive: bool,
    pub(crate) park_count: i32,
    pub(crate) park_deadline: Option<Instant>,
    pub(crate) wakeup_time: Option<Instant>,
}

impl LogicalThread {
    pub(crate) fn new(
        id: ThreadId,
        name: String,
        object: Option<ObjectRef>,
        stack: CallStack,
    ) -> Self {
        Self {
            id,
            name,
            object,
            stack,
            alive: true,
            park_count: 0,
            park_deadline: None,
            wakeup_time: None,
        }
    }

    /// Thread identity
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Guest `Thread` object bound to this thread
    pub fn object(&self) -> Option<ObjectRef> {
        self.object
    }

    /// Call stack
    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    /// Mutable call stack
    pub fn stack_mut(&mut self) -> &mut CallStack {
        &mut self.stack
    }

    /// Whether the thread has not finished
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Whether the park count is positive
    pub fn is_parked(&self) -> bool {
        self.park_count > 0
    }

    /// Current park count
    pub fn park_count(&self) -> i32 {
        self.park_count
    }

    /// Instant a timed park expires
    pub fn park_deadline(&self) -> Option<Instant> {
        self.park_deadline
    }

    /// Instant a sleeping thread becomes eligible again
    pub fn wakeup_time(&self) -> Option<Instant> {
        self.wakeup_time
    }
}

impl fmt::Debug for LogicalThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalThread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("alive", &self.alive)
            .field("park_count", &self.park_count)
            .field("depth", &self.stack.depth())
            .finish()
    }
}
