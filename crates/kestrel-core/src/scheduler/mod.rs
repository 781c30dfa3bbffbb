//! Cooperative scheduler for guest threads
//!
//! Many logical threads share one execution context. Exactly one thread is
//! current at a time; a thread only gives up control at a voluntary switch
//! point (wait, park, sleep, yield) or when it finishes.
//!
//! The host side is an explicit task queue ([`Executor`]) with immediate and
//! timed posting, driven by an injectable [`Clock`].

mod clock;
mod host;
#[allow(clippy::module_inception)]
mod scheduler;
mod thread;

pub use clock::{Clock, ManualClock, SystemClock};
pub use host::{Executor, HostHandle, HostTask, SetupFn};
pub use scheduler::{Scheduler, Selection, SwitchOutcome};
pub use thread::{LogicalThread, ThreadId, ThreadState};
