//! Step outcomes and runner dispatch

use super::suspend::Suspension;
use super::RuntimeState;
use crate::exception::GuestException;
use crate::scheduler::SwitchOutcome;
use crate::stack::FrameRunner;
use crate::value::Value;
use crate::{VmError, VmResult};
use std::fmt;

/// What a runner step asks the execution loop to do next
pub enum StepOutcome {
    /// Work was done; keep stepping the (possibly new) current frame
    Continue,
    /// The current frame finished: pop it and push these values on the caller
    Return(Vec<Value>),
    /// The current frame has nothing more to run; clear its runner
    Done,
    /// End this slice and reschedule the loop immediately
    ReturnControl,
    /// End this slice; an already posted timed task resumes the loop
    Deferred,
    /// Suspend for an asynchronous operation
    Suspend(Suspension),
    /// Raise a guest exception
    Raise(GuestException),
}

impl fmt::Debug for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Continue => write!(f, "Continue"),
            StepOutcome::Return(values) => f.debug_tuple("Return").field(values).finish(),
            StepOutcome::Done => write!(f, "Done"),
            StepOutcome::ReturnControl => write!(f, "ReturnControl"),
            StepOutcome::Deferred => write!(f, "Deferred"),
            StepOutcome::Suspend(_) => write!(f, "Suspend"),
            StepOutcome::Raise(e) => f.debug_tuple("Raise").field(e).finish(),
        }
    }
}

impl SwitchOutcome {
    /// Outcome for the native frame that hit this switch point
    ///
    /// Staying returns `values` to the caller. A switch leaves the frame
    /// with a pop marker, so the slice just ends.
    pub fn into_step(self, values: Vec<Value>) -> StepOutcome {
        match self {
            SwitchOutcome::Stay => StepOutcome::Return(values),
            SwitchOutcome::Switched => StepOutcome::ReturnControl,
            SwitchOutcome::Deferred(_) => StepOutcome::Deferred,
        }
    }
}

/// Run one step of the current frame with `runner`
pub(crate) fn execute_step(rt: &mut RuntimeState, runner: FrameRunner) -> VmResult<StepOutcome> {
    match runner {
        FrameRunner::Bytecode => {
            let frame = rt.current_frame()?;
            let method = frame
                .method()
                .cloned()
                .ok_or_else(|| VmError::MissingMethod(frame.name().to_string()))?;
            method.execute(rt)
        }
        FrameRunner::Native(handler) => handler.step(rt),
        FrameRunner::PopMarker => {
            if rt.current_stack().depth() > 1 {
                rt.pop_frame()?;
            } else {
                rt.current_frame_mut()?.runner = None;
            }
            Ok(StepOutcome::Continue)
        }
        FrameRunner::Resume(id) => {
            let continuation = rt
                .continuations
                .take(id)
                .ok_or(VmError::UnknownContinuation(id.as_u64()))?;
            continuation.resume(rt)
        }
    }
}
