//! Execution loop, unwinding and suspension

mod budget;
mod continuation;
mod execution;
mod input;
mod interpreter;
mod runtime;
mod suspend;
mod unwind;

pub use budget::StepBudget;
pub use continuation::ContinuationId;
pub use execution::StepOutcome;
pub use input::{Deliver, InputBuffer, InputSource, NoInput};
pub use interpreter::{RunStatus, Vm, VmBuilder};
pub use runtime::{RunStamps, RuntimeState};
pub use suspend::{AsyncCompletion, AsyncResult, AsyncReturn, FailureAction, Suspension};
