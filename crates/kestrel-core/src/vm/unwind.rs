//! Exception unwinding across frames

use super::continuation::ContinuationId;
use super::RuntimeState;
use crate::exception::GuestException;
use crate::stack::{CallStack, Frame, FrameRunner};
use tracing::debug;

/// Where an exception ended up
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Unwound {
    /// A frame accepted it; frames above that frame were dropped
    Caught {
        /// Frames removed above the accepting frame
        popped: usize,
    },
    /// No frame accepted it; the stack is down to its root frame
    Uncaught,
}

fn resume_id(frame: &Frame) -> Option<ContinuationId> {
    match frame.runner {
        Some(FrameRunner::Resume(id)) => Some(id),
        _ => None,
    }
}

/// Continuations held by the top `count` frames
fn resumes_above(stack: &CallStack, count: usize) -> Vec<ContinuationId> {
    (0..count)
        .filter_map(|n| stack.caller_at_depth(n).and_then(resume_id))
        .collect()
}

/// Walk outward from the raising frame looking for a frame that accepts
/// `exception`
///
/// Without a catch handler, or with only the root frame on the stack, the
/// exception is uncaught immediately. An uncaught exception leaves a state
/// dump behind when dumps are enabled. Continuations owned by dropped
/// frames, or replaced by the accepting frame's handler, are released.
pub(crate) fn unwind(rt: &mut RuntimeState, exception: &GuestException) -> Unwound {
    let depth = rt.current_stack().depth();
    if let Some(handler) = exception.method_catch().cloned() {
        if depth > 1 {
            let stack = rt.current_stack_mut();
            for frames_to_pop in 0..depth {
                let (accepted, replaced) = match stack.caller_at_depth_mut(frames_to_pop) {
                    Some(frame) => {
                        let before = resume_id(frame);
                        let accepted = handler.try_catch(frame, frames_to_pop == 0, exception);
                        (accepted, before.filter(|_| resume_id(frame) != before))
                    }
                    None => (false, None),
                };
                if accepted {
                    let mut released = resumes_above(stack, frames_to_pop);
                    released.extend(replaced);
                    stack.pop_n(frames_to_pop);
                    rt.release_continuations(released);
                    debug!(
                        exception = %exception,
                        popped = frames_to_pop,
                        depth = depth - frames_to_pop,
                        "exception caught"
                    );
                    return Unwound::Caught {
                        popped: frames_to_pop,
                    };
                }
            }
        }
    }

    if rt.options().dump_state {
        rt.dump_state(None, None);
    }
    let stack = rt.current_stack_mut();
    let dropped = stack.depth().saturating_sub(1);
    let released = resumes_above(stack, dropped);
    stack.pop_n(dropped);
    rt.release_continuations(released);
    debug!(exception = %exception, "exception reached the root frame");
    Unwound::Uncaught
}
