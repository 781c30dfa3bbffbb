//! Host task executor
//!
//! The execution loop never calls itself. Every re-entry (next slice,
//! resumption after an asynchronous operation, a timed thread selection)
//! is posted here as a [`HostTask`] and picked up by the driver.
//! [`HostHandle`] is cheap to clone and may be used from other OS threads.

use super::clock::Clock;
use crate::vm::{AsyncResult, RuntimeState};
use crate::VmResult;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Setup work run at the start of a slice
pub type SetupFn = Box<dyn FnOnce(&mut RuntimeState) -> VmResult<()> + Send>;

/// Unit of work for the driver
pub enum HostTask {
    /// Run the execution loop on the current frame
    Slice,
    /// Run setup work, then a slice
    Setup(SetupFn),
    /// Install the result of an asynchronous operation, then a slice
    Resume {
        /// Completion token
        token: u64,
        /// Outcome reported by the operation
        result: AsyncResult,
    },
    /// Retry thread selection after a timed deferral
    SelectThread,
}

impl fmt::Debug for HostTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostTask::Slice => write!(f, "Slice"),
            HostTask::Setup(_) => write!(f, "Setup"),
            HostTask::Resume { token, .. } => write!(f, "Resume({})", token),
            HostTask::SelectThread => write!(f, "SelectThread"),
        }
    }
}

struct Envelope {
    due: Option<Instant>,
    task: HostTask,
}

struct Timer {
    due: Instant,
    seq: u64,
    task: HostTask,
}

// BinaryHeap is a max-heap; invert so the earliest (then oldest) timer wins
impl Ord for Timer {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Timer {}

/// Posting side of the executor
#[derive(Clone)]
pub struct HostHandle {
    sender: Sender<Envelope>,
    outstanding: Arc<AtomicUsize>,
}

impl HostHandle {
    /// Queue a task to run as soon as possible
    pub fn post(&self, task: HostTask) {
        self.send(Envelope { due: None, task });
    }

    /// Queue a task to run once the clock reaches `due`
    pub fn post_at(&self, due: Instant, task: HostTask) {
        self.send(Envelope { due: Some(due), task });
    }

    fn send(&self, envelope: Envelope) {
        // The receiver lives as long as the executor; a failed send means
        // the VM is gone and the task has nowhere to run.
        if self.sender.send(envelope).is_err() {
            tracing::warn!("host task posted after the executor was dropped");
        }
    }

    /// Record an asynchronous operation in flight
    pub(crate) fn begin_async(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that an asynchronous operation reported back (or gave up)
    pub(crate) fn end_async(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHandle")
            .field("outstanding", &self.outstanding.load(Ordering::SeqCst))
            .finish()
    }
}

/// Single-queue executor with timers
pub struct Executor {
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
    ready: VecDeque<HostTask>,
    timers: BinaryHeap<Timer>,
    seq: u64,
    clock: Arc<dyn Clock>,
    outstanding: Arc<AtomicUsize>,
}

impl Executor {
    /// Create an executor reading time from `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            sender,
            receiver,
            ready: VecDeque::new(),
            timers: BinaryHeap::new(),
            seq: 0,
            clock,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// New posting handle
    pub fn handle(&self) -> HostHandle {
        HostHandle {
            sender: self.sender.clone(),
            outstanding: Arc::clone(&self.outstanding),
        }
    }

    fn accept(&mut self, envelope: Envelope) {
        match envelope.due {
            None => self.ready.push_back(envelope.task),
            Some(due) => {
                self.seq += 1;
                self.timers.push(Timer {
                    due,
                    seq: self.seq,
                    task: envelope.task,
                });
            }
        }
    }

    fn drain(&mut self) {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => self.accept(envelope),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Next task that is ready to run, without blocking
    pub fn next_task(&mut self) -> Option<HostTask> {
        self.drain();
        if let Some(task) = self.ready.pop_front() {
            return Some(task);
        }
        let now = self.clock.now();
        if self.timers.peek().map_or(false, |t| t.due <= now) {
            return self.timers.pop().map(|t| t.task);
        }
        None
    }

    /// Earliest pending timer
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|t| t.due)
    }

    /// Number of asynchronous operations that have not reported back
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Whether any task is queued, timed or still expected
    pub fn has_pending(&mut self) -> bool {
        let outstanding = self.outstanding();
        self.drain();
        !self.ready.is_empty() || !self.timers.is_empty() || outstanding > 0
    }

    /// Block until a task may be ready
    ///
    /// Returns false when nothing is queued and nothing is expected, i.e.
    /// waiting would never end.
    pub fn wait(&mut self) -> bool {
        let outstanding = self.outstanding();
        self.drain();
        if !self.ready.is_empty() {
            return true;
        }
        match (self.next_deadline(), outstanding > 0) {
            (Some(deadline), true) => {
                let wait = deadline.saturating_duration_since(self.clock.now());
                match self.receiver.recv_timeout(wait) {
                    Ok(envelope) => self.accept(envelope),
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                        self.clock.sleep_until(deadline)
                    }
                }
                true
            }
            (Some(deadline), false) => {
                self.clock.sleep_until(deadline);
                true
            }
            (None, true) => {
                if let Ok(envelope) = self.receiver.recv() {
                    self.accept(envelope);
                }
                true
            }
            (None, false) => false,
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("ready", &self.ready.len())
            .field("timers", &self.timers.len())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
