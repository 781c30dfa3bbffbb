//! Suspension protocol for asynchronous native operations
//!
//! A runner that must wait on the host returns
//! [`StepOutcome::Suspend`](super::StepOutcome::Suspend). The loop ends the
//! slice and hands the suspension's condition an [`AsyncCompletion`]. When
//! the operation finishes, from any OS thread, the completion posts a
//! resume task and the loop picks up where it left off.

use super::execution::StepOutcome;
use super::RuntimeState;
use crate::exception::GuestException;
use crate::scheduler::{HostHandle, HostTask};
use crate::value::Value;
use crate::VmResult;
use std::fmt;

type Condition = Box<dyn FnOnce(&mut RuntimeState, AsyncCompletion)>;

/// Request to suspend the current frame
pub struct Suspension {
    condition: Condition,
}

impl Suspension {
    /// Suspend until `condition` resolves the completion it is handed
    pub fn new<F>(condition: F) -> Self
    where
        F: FnOnce(&mut RuntimeState, AsyncCompletion) + 'static,
    {
        Self {
            condition: Box::new(condition),
        }
    }

    pub(crate) fn start(self, rt: &mut RuntimeState, completion: AsyncCompletion) {
        (self.condition)(rt, completion)
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Suspension")
    }
}

/// Values delivered by a successful asynchronous operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsyncReturn {
    /// First return value
    pub ret1: Option<Value>,
    /// Second return value (the high half of a wide result, or a pair)
    pub ret2: Option<Value>,
    /// The operation was started by a bytecode instruction
    pub from_bytecode: bool,
    /// Step the pc past the starting instruction (bytecode only)
    pub advance_pc: bool,
}

impl AsyncReturn {
    /// Result for a native frame; the frame is popped and values go to
    /// its caller
    pub fn native() -> Self {
        Self {
            ret1: None,
            ret2: None,
            from_bytecode: false,
            advance_pc: true,
        }
    }

    /// Result for a bytecode instruction; values go to the same frame
    pub fn bytecode() -> Self {
        Self {
            from_bytecode: true,
            ..Self::native()
        }
    }

    /// Append a return value (at most two are kept)
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        let value = value.into();
        if self.ret1.is_none() {
            self.ret1 = Some(value);
        } else {
            self.ret2 = Some(value);
        }
        self
    }

    /// Leave the pc on the starting instruction
    pub fn without_advance(mut self) -> Self {
        self.advance_pc = false;
        self
    }
}

/// Work run on the VM thread when an asynchronous operation fails
pub struct FailureAction(Box<dyn FnOnce(&mut RuntimeState) -> VmResult<StepOutcome> + Send>);

impl FailureAction {
    /// Arbitrary failure handling
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce(&mut RuntimeState) -> VmResult<StepOutcome> + Send + 'static,
    {
        Self(Box::new(action))
    }

    /// Raise an already built exception
    pub fn raise(exception: GuestException) -> Self {
        Self::new(move |_| Ok(StepOutcome::Raise(exception)))
    }

    /// Construct and throw a new exception of `class_name`
    pub fn throw_new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        let class_name = class_name.into();
        let message = message.into();
        Self::new(move |rt| rt.throw_new(&class_name, &message))
    }

    pub(crate) fn run(self, rt: &mut RuntimeState) -> VmResult<StepOutcome> {
        (self.0)(rt)
    }
}

impl fmt::Debug for FailureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FailureAction")
    }
}

/// Outcome of an asynchronous operation
#[derive(Debug)]
pub enum AsyncResult {
    /// Deliver values and continue
    Success(AsyncReturn),
    /// Run the failure action
    Failure(FailureAction),
}

/// One-shot handle resolving a suspension
///
/// Dropping it unresolved leaves the suspended thread stuck; the run then
/// ends up idle.
pub struct AsyncCompletion {
    token: u64,
    host: Option<HostHandle>,
}

impl AsyncCompletion {
    pub(crate) fn new(token: u64, host: HostHandle) -> Self {
        host.begin_async();
        Self {
            token,
            host: Some(host),
        }
    }

    /// Token identifying this operation in logs
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Report success
    pub fn succeed(mut self, ret: AsyncReturn) {
        self.resolve(AsyncResult::Success(ret));
    }

    /// Report failure
    pub fn fail(mut self, action: FailureAction) {
        self.resolve(AsyncResult::Failure(action));
    }

    fn resolve(&mut self, result: AsyncResult) {
        if let Some(host) = self.host.take() {
            host.post(HostTask::Resume {
                token: self.token,
                result,
            });
            host.end_async();
        }
    }
}

impl Drop for AsyncCompletion {
    fn drop(&mut self) {
        if let Some(host) = self.host.take() {
            tracing::warn!(token = self.token, "asynchronous operation dropped without a result");
            host.end_async();
        }
    }
}

impl fmt::Debug for AsyncCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCompletion")
            .field("token", &self.token)
            .field("resolved", &self.host.is_none())
            .finish()
    }
}
