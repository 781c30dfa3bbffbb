//! Kestrel VM Core Runtime
//!
//! This crate provides the execution core of the Kestrel virtual machine:
//! - Frames and per-thread call stacks
//! - Cooperative scheduler for guest threads (park/unpark, wait, yield)
//! - Execution loop with an adaptive step budget
//! - Exception unwinding driven by method catch tables
//! - Suspension protocol for asynchronous native operations
//!
//! Bytecode decoding, class loading and native method bodies are supplied
//! by the embedder through the traits in [`class`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod config;
pub mod exception;
pub mod memory;
pub mod object;
pub mod scheduler;
pub mod snapshot;
pub mod stack;
pub mod strings;
pub mod sync;
pub mod value;
pub mod vm;

pub use class::{ClassLoader, ClassRef, GuestClass, LoaderRef, Method, MethodRef};
pub use config::{ConfigError, VmOptions};
pub use exception::{CatchHandler, GuestException, MethodCatchTable, ToplevelHandler};
pub use memory::MemoryBlockTable;
pub use object::{Heap, HeapEntry, ObjectRef};
pub use scheduler::{
    Clock, ManualClock, Scheduler, Selection, SwitchOutcome, SystemClock, ThreadId, ThreadState,
};
pub use snapshot::{SerializedFrame, StackSnapshot};
pub use stack::{CallStack, Frame, FrameRunner, NativeStep};
pub use sync::{MonitorId, WaitSets};
pub use value::Value;
pub use vm::{
    AsyncCompletion, AsyncReturn, FailureAction, InputSource, RunStamps, RunStatus,
    RuntimeState, StepOutcome, Suspension, Vm, VmBuilder,
};

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// A guest exception is propagating; routed to the unwinder by the loop
    #[error("Uncaught guest exception: {0:?}")]
    Thrown(Box<GuestException>),

    /// Operand stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Call stack has no frame where one was required
    #[error("Call stack is empty")]
    EmptyCallStack,

    /// The root frame of a thread tried to return
    #[error("Bootstrap frame cannot return")]
    BootstrapReturn,

    /// Bytecode runner scheduled on a frame without a method
    #[error("Frame {0} has no method to execute")]
    MissingMethod(String),

    /// Instruction length unknown for the given pc
    #[error("No instruction at pc {pc} in {method}")]
    UnknownInstruction {
        /// Method signature
        method: String,
        /// Program counter
        pc: usize,
    },

    /// Unknown logical thread
    #[error("Unknown thread {0:?}")]
    UnknownThread(ThreadId),

    /// Continuation token not registered
    #[error("Unknown continuation {0}")]
    UnknownContinuation(u64),

    /// Raw address outside every allocated block
    #[error("Invalid memory access at {0:#x}")]
    InvalidMemoryAccess(u64),

    /// Class could not be resolved by the loader
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    /// Every remaining thread is blocked and nothing can wake them
    #[error("Deadlock: {0} live thread(s) blocked with no wakeup pending")]
    Deadlock(usize),

    /// Host I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal inconsistency
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<GuestException> for VmError {
    fn from(exception: GuestException) -> Self {
        VmError::Thrown(Box::new(exception))
    }
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
pub(crate) mod test_support;
