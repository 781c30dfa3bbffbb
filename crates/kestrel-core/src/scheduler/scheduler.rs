//! Thread pool, selection and voluntary switching

use super::thread::{LogicalThread, ThreadId, ThreadState};
use crate::object::ObjectRef;
use crate::stack::{CallStack, FrameRunner};
use crate::sync::{MonitorId, WaitSets};
use crate::vm::ContinuationId;
use crate::{VmError, VmResult};
use std::time::Instant;
use tracing::debug;

/// Result of thread selection
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Selection {
    /// An eligible thread was found
    Chosen(ThreadId),
    /// Nothing is eligible yet; try again at this instant
    RetryAt(Instant),
    /// Nothing is eligible and nothing will become so by itself; keep the
    /// current thread running
    Fallback(ThreadId),
}

/// Effect of a voluntary switch point on the calling thread
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The calling thread keeps running
    Stay,
    /// Control was handed to a thread (possibly the caller itself); both
    /// top frames carry a pop marker
    Switched,
    /// Selection must be retried at this instant
    Deferred(Instant),
}

/// Owner of every logical thread of one runtime instance
pub struct Scheduler {
    /// All threads ever created; `ThreadId(n)` lives at index `n - 1`
    threads: Vec<LogicalThread>,
    /// Live threads in selection order
    pool: Vec<ThreadId>,
    current: ThreadId,
    waiters: WaitSets,
    /// Continuations whose `Resume` runner a switch overwrote
    displaced: Vec<ContinuationId>,
}

impl Scheduler {
    /// Create a scheduler whose main thread owns `main_stack`
    pub fn new(main_stack: CallStack) -> Self {
        let main = ThreadId::from_u64(1);
        Self {
            threads: vec![LogicalThread::new(main, "main".to_string(), None, main_stack)],
            pool: vec![main],
            current: main,
            waiters: WaitSets::new(),
            displaced: Vec::new(),
        }
    }

    fn index(&self, id: ThreadId) -> VmResult<usize> {
        let idx = (id.as_u64() as usize).wrapping_sub(1);
        if idx < self.threads.len() {
            Ok(idx)
        } else {
            Err(VmError::UnknownThread(id))
        }
    }

    /// Look up a thread
    pub fn thread(&self, id: ThreadId) -> VmResult<&LogicalThread> {
        let idx = self.index(id)?;
        Ok(&self.threads[idx])
    }

    /// Look up a thread mutably
    pub fn thread_mut(&mut self, id: ThreadId) -> VmResult<&mut LogicalThread> {
        let idx = self.index(id)?;
        Ok(&mut self.threads[idx])
    }

    /// Current thread id
    pub fn current(&self) -> ThreadId {
        self.current
    }

    /// Current thread
    pub fn current_thread(&self) -> &LogicalThread {
        &self.threads[self.current.as_u64() as usize - 1]
    }

    /// Current thread, mutably
    pub fn current_thread_mut(&mut self) -> &mut LogicalThread {
        &mut self.threads[self.current.as_u64() as usize - 1]
    }

    /// Call stack of the current thread
    pub fn current_stack(&self) -> &CallStack {
        &self.current_thread().stack
    }

    /// Mutable call stack of the current thread
    pub fn current_stack_mut(&mut self) -> &mut CallStack {
        &mut self.current_thread_mut().stack
    }

    /// Live threads in selection order
    pub fn pool(&self) -> &[ThreadId] {
        &self.pool
    }

    /// Number of live threads
    pub fn live_count(&self) -> usize {
        self.pool.len()
    }

    /// Monitor waiter sets
    pub fn waiters(&self) -> &WaitSets {
        &self.waiters
    }

    /// Register a new live thread at the end of the pool
    pub fn spawn(&mut self, name: &str, object: Option<ObjectRef>, stack: CallStack) -> ThreadId {
        let id = ThreadId::from_u64(self.threads.len() as u64 + 1);
        self.threads.push(LogicalThread::new(id, name.to_string(), object, stack));
        self.pool.push(id);
        debug!(thread = %id, name, "TE(spawn): new thread");
        id
    }

    /// Bind a guest `Thread` object to a thread
    pub fn bind_object(&mut self, id: ThreadId, object: ObjectRef) -> VmResult<()> {
        self.thread_mut(id)?.object = Some(object);
        Ok(())
    }

    /// Mark a thread finished and drop it from the pool
    pub fn retire(&mut self, id: ThreadId) -> VmResult<()> {
        let thread = self.thread_mut(id)?;
        thread.alive = false;
        thread.wakeup_time = None;
        thread.park_deadline = None;
        self.pool.retain(|t| *t != id);
        self.waiters.remove_thread(id);
        debug!(thread = %id, "TE(retire): finished thread");
        Ok(())
    }

    /// Bring a retired thread back into the pool
    pub fn revive(&mut self, id: ThreadId) -> VmResult<()> {
        let thread = self.thread_mut(id)?;
        if thread.alive {
            return Ok(());
        }
        thread.alive = true;
        self.pool.push(id);
        Ok(())
    }

    /// Make `id` current without touching any frame
    pub fn set_current(&mut self, id: ThreadId) -> VmResult<()> {
        self.index(id)?;
        self.current = id;
        Ok(())
    }

    /// Observable state of a thread as of the last selection
    ///
    /// Expired park deadlines are only released by
    /// [`choose_next_thread`](Self::choose_next_thread); use
    /// [`thread_state_at`](Self::thread_state_at) to account for them.
    pub fn thread_state(&self, id: ThreadId) -> VmResult<ThreadState> {
        self.state_of(id, None)
    }

    /// Observable state of a thread at `now`
    ///
    /// A park whose deadline has passed reads as released.
    pub fn thread_state_at(&self, id: ThreadId, now: Instant) -> VmResult<ThreadState> {
        self.state_of(id, Some(now))
    }

    fn state_of(&self, id: ThreadId, now: Option<Instant>) -> VmResult<ThreadState> {
        let thread = self.thread(id)?;
        let park_expired = match (now, thread.park_deadline) {
            (Some(now), Some(deadline)) => deadline <= now,
            _ => false,
        };
        let parked = if park_expired {
            thread.park_count > 1
        } else {
            thread.is_parked()
        };
        Ok(if !thread.alive {
            ThreadState::Dead
        } else if parked {
            ThreadState::Parked
        } else if self.waiters.is_waiting(id) {
            ThreadState::BlockedOnMonitor
        } else {
            ThreadState::Runnable
        })
    }

    /// Pick the next thread to run
    ///
    /// Candidates are scanned in pool order. Without an explicit blacklist,
    /// every thread waiting on a monitor is excluded. Expired park deadlines
    /// are released along the way.
    pub fn choose_next_thread(
        &mut self,
        blacklist: Option<&[ThreadId]>,
        now: Instant,
    ) -> Selection {
        let default_blacklist;
        let blacklist = match blacklist {
            Some(b) => b,
            None => {
                default_blacklist = self.waiters.all_waiters();
                &default_blacklist
            }
        };

        let current = self.current;
        let mut wakeup = {
            let ct = self.current_thread_mut();
            release_expired_park(ct, now);
            let park_deadline = ct.park_deadline.filter(|_| ct.is_parked());
            earliest(ct.wakeup_time.filter(|w| *w > now), park_deadline)
        };

        for i in 0..self.pool.len() {
            let id = self.pool[i];
            if id == current {
                continue;
            }
            let t = &mut self.threads[id.as_u64() as usize - 1];
            if !t.alive {
                continue;
            }
            if t.is_parked() {
                release_expired_park(t, now);
                if t.is_parked() {
                    wakeup = earliest(wakeup, t.park_deadline);
                    continue;
                }
            }
            if blacklist.contains(&id) {
                continue;
            }
            if let Some(w) = t.wakeup_time {
                if w > now {
                    wakeup = earliest(wakeup, Some(w));
                    continue;
                }
                t.wakeup_time = None;
            }
            debug!(thread = %id, "TE(choose_next_thread): choosing thread");
            return Selection::Chosen(id);
        }

        match wakeup {
            Some(w) if w > now => {
                debug!(
                    wait_ms = w.duration_since(now).as_millis() as u64,
                    "TE(choose_next_thread): waiting and trying again"
                );
                Selection::RetryAt(w)
            }
            _ => {
                debug!(
                    thread = %current,
                    "TE(choose_next_thread): no thread found, sticking with current"
                );
                Selection::Fallback(current)
            }
        }
    }

    /// Hand control to `target`
    ///
    /// The departing and arriving top frames both get a pop marker: each
    /// side is suspended inside a native switch frame that must be popped
    /// when the thread next runs.
    pub fn yield_to(&mut self, target: ThreadId) -> VmResult<()> {
        let target_idx = self.index(target)?;
        debug!(from = %self.current, to = %target, "TE(yield): yielding");
        let departing = self.current.as_u64() as usize - 1;
        for idx in [departing, target_idx] {
            if let Some(frame) = self.threads[idx].stack.current_mut() {
                let previous = frame.runner.replace(FrameRunner::PopMarker);
                if let Some(FrameRunner::Resume(id)) = previous {
                    self.displaced.push(id);
                }
            }
        }
        self.current = target;
        Ok(())
    }

    /// Drain the continuations orphaned by switches since the last call
    pub(crate) fn take_displaced(&mut self) -> Vec<ContinuationId> {
        std::mem::take(&mut self.displaced)
    }

    fn act_on(&mut self, selection: Selection) -> VmResult<SwitchOutcome> {
        match selection {
            Selection::Chosen(t) | Selection::Fallback(t) => {
                self.yield_to(t)?;
                Ok(SwitchOutcome::Switched)
            }
            Selection::RetryAt(at) => Ok(SwitchOutcome::Deferred(at)),
        }
    }

    /// Block the current thread on `monitor`
    ///
    /// With a `yieldee` control goes straight to it; otherwise selection
    /// runs with the monitor's waiters as the blacklist.
    pub fn wait(
        &mut self,
        monitor: MonitorId,
        yieldee: Option<ThreadId>,
        now: Instant,
    ) -> VmResult<SwitchOutcome> {
        let current = self.current;
        debug!(thread = %current, monitor = monitor.as_u64(), "TE(wait): waiting on lock");
        self.waiters.add(monitor, current);
        if let Some(target) = yieldee {
            self.yield_to(target)?;
            return Ok(SwitchOutcome::Switched);
        }
        let blacklist = self.waiters.waiters(monitor).to_vec();
        let selection = self.choose_next_thread(Some(&blacklist), now);
        self.act_on(selection)
    }

    /// Release the oldest waiter of `monitor`
    pub fn notify(&mut self, monitor: MonitorId) -> Option<ThreadId> {
        self.waiters.remove_first(monitor)
    }

    /// Release every waiter of `monitor`
    pub fn notify_all(&mut self, monitor: MonitorId) -> Vec<ThreadId> {
        self.waiters.remove_all(monitor)
    }

    /// Take one park permit from `thread`
    ///
    /// Once the count turns positive the current thread selects a
    /// successor and yields.
    pub fn park(
        &mut self,
        thread: ThreadId,
        deadline: Option<Instant>,
        now: Instant,
    ) -> VmResult<SwitchOutcome> {
        let t = self.thread_mut(thread)?;
        t.park_count += 1;
        t.park_deadline = deadline;
        debug!(thread = %thread, count = t.park_count, "TE(park): parking");
        if !t.is_parked() {
            return Ok(SwitchOutcome::Stay);
        }
        let selection = self.choose_next_thread(None, now);
        self.act_on(selection)
    }

    /// Return one park permit to `thread`
    ///
    /// When the count drops to zero or below, `thread` is yielded to.
    pub fn unpark(&mut self, thread: ThreadId) -> VmResult<SwitchOutcome> {
        let t = self.thread_mut(thread)?;
        t.park_count -= 1;
        t.park_deadline = None;
        debug!(thread = %thread, count = t.park_count, "TE(unpark): unparking");
        if t.is_parked() {
            return Ok(SwitchOutcome::Stay);
        }
        self.yield_to(thread)?;
        Ok(SwitchOutcome::Switched)
    }

    /// Put the current thread to sleep until `deadline` and select
    pub fn sleep_until(&mut self, deadline: Instant, now: Instant) -> VmResult<SwitchOutcome> {
        self.current_thread_mut().wakeup_time = Some(deadline);
        let selection = self.choose_next_thread(None, now);
        self.act_on(selection)
    }
}

fn release_expired_park(thread: &mut LogicalThread, now: Instant) {
    if thread.is_parked() && thread.park_deadline.map_or(false, |d| d <= now) {
        thread.park_count -= 1;
        thread.park_deadline = None;
        debug!(thread = %thread.id, "TE(choose_next_thread): park timed out");
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}
