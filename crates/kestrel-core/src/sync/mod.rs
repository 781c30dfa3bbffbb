//! Monitor bookkeeping for guest threads
//!
//! Only the waiter sets live here. Lock ownership and reentrancy counts are
//! handled by the embedder's monitor natives; the scheduler needs the
//! waiter sets to keep blocked threads out of thread selection.

mod monitor;

pub use monitor::{MonitorId, WaitSets};
