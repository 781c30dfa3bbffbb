//! Call-stack snapshots and postmortem state dumps
//!
//! A snapshot is cheap to take at any suspension point: it records frame
//! names, program counters and the raw value slots. Rendering object graphs
//! and loader identity is deferred until the snapshot is serialized, which
//! only happens for state dumps.

mod dump;
mod format;

pub use dump::{dump_file_name, write_dump};
pub use format::{FrameSnapshot, SerializedFrame, StackSnapshot};
