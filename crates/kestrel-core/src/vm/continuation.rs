//! Registered resumption work
//!
//! A frame whose runner is `Resume(id)` continues with the entry
//! registered under `id`. Entries are one-shot: taking one removes it.

use super::execution::StepOutcome;
use super::suspend::{AsyncReturn, FailureAction};
use super::RuntimeState;
use crate::exception::GuestException;
use crate::stack::FrameRunner;
use crate::{VmError, VmResult};
use rustc_hash::FxHashMap;

/// Token naming a registered continuation
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContinuationId(u64);

impl ContinuationId {
    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_u64(raw: u64) -> Self {
        ContinuationId(raw)
    }
}

/// Work to run when a `Resume` frame is stepped
pub(crate) enum Continuation {
    /// Pop the `async_op` frame (or the suspended native frame) and deliver
    /// the result values
    AsyncSuccess(AsyncReturn),
    /// Pop the `async_op` frame and run the failure action
    AsyncFailure(FailureAction),
    /// The exception constructor returned: restore the frame's runner, drop
    /// the exception object left on the operand stack and raise
    RaiseConstructed {
        restore: Option<FrameRunner>,
        exception: GuestException,
    },
}

impl Continuation {
    pub(crate) fn resume(self, rt: &mut RuntimeState) -> VmResult<StepOutcome> {
        match self {
            Continuation::AsyncSuccess(ret) => {
                rt.pop_frame()?;
                let frame = rt.current_frame_mut()?;
                if ret.from_bytecode && ret.advance_pc {
                    let method = frame
                        .method()
                        .cloned()
                        .ok_or_else(|| VmError::MissingMethod(frame.name().to_string()))?;
                    let operands = method.operand_len(frame.pc).ok_or_else(|| {
                        VmError::UnknownInstruction {
                            method: method.full_signature().to_string(),
                            pc: frame.pc,
                        }
                    })?;
                    frame.advance_pc(1 + operands);
                }
                if let Some(v) = ret.ret1 {
                    frame.push(v);
                }
                if let Some(v) = ret.ret2 {
                    frame.push(v);
                }
                Ok(StepOutcome::Continue)
            }
            Continuation::AsyncFailure(action) => {
                rt.pop_frame()?;
                action.run(rt)
            }
            Continuation::RaiseConstructed { restore, exception } => {
                let frame = rt.current_frame_mut()?;
                frame.runner = restore;
                frame.pop()?;
                Ok(StepOutcome::Raise(exception))
            }
        }
    }
}

/// One-shot continuations owned by a runtime instance
#[derive(Default)]
pub(crate) struct ContinuationTable {
    next: u64,
    entries: FxHashMap<ContinuationId, Continuation>,
}

impl ContinuationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, continuation: Continuation) -> ContinuationId {
        self.next += 1;
        let id = ContinuationId(self.next);
        self.entries.insert(id, continuation);
        id
    }

    pub(crate) fn take(&mut self, id: ContinuationId) -> Option<Continuation> {
        self.entries.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
