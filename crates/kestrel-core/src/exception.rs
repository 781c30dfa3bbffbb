//! Guest exceptions and the handlers that catch them
//!
//! A [`GuestException`] carries the thrown object plus two optional
//! handlers. The method-level [`CatchHandler`] is asked, frame by frame,
//! whether a frame accepts the exception. The [`ToplevelHandler`] runs when
//! no frame does (typically dispatching to the guest's uncaught exception
//! handler).

use crate::object::ObjectRef;
use crate::stack::{Frame, FrameRunner};
use crate::value::Value;
use crate::vm::RuntimeState;
use crate::VmResult;
use std::fmt;
use std::sync::Arc;

/// Decides whether a frame accepts an exception
pub trait CatchHandler: Send + Sync {
    /// Try to catch `exception` in `frame`
    ///
    /// On acceptance the handler prepares the frame to continue at its
    /// handler and returns true. `raising` is true for the frame the
    /// exception was raised in.
    fn try_catch(&self, frame: &mut Frame, raising: bool, exception: &GuestException) -> bool;
}

/// Runs when an exception escapes every frame
pub trait ToplevelHandler: Send + Sync {
    /// Prepare the current thread to handle the exception
    ///
    /// Called with the call stack already truncated to its root frame; the
    /// execution loop runs whatever this pushes.
    fn install(&self, rt: &mut RuntimeState, exception: &GuestException) -> VmResult<()>;
}

/// Catch handler backed by method catch tables
///
/// Bytecode frames consult [`Method::catch_target`](crate::Method::catch_target);
/// native frames accept when they carry an error handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct MethodCatchTable;

impl CatchHandler for MethodCatchTable {
    fn try_catch(&self, frame: &mut Frame, raising: bool, exception: &GuestException) -> bool {
        if frame.is_native() {
            return match frame.error.clone() {
                Some(handler) => {
                    frame.runner = Some(FrameRunner::Native(handler));
                    frame.push(Value::Ref(exception.object()));
                    true
                }
                None => false,
            };
        }
        let target = match frame.method() {
            Some(method) => method.catch_target(frame.pc, exception, raising),
            None => None,
        };
        match target {
            Some(pc) => {
                frame.goto_pc(pc);
                frame.stack.clear();
                frame.push(Value::Ref(exception.object()));
                frame.runner = Some(FrameRunner::Bytecode);
                true
            }
            None => false,
        }
    }
}

/// A thrown guest exception
#[derive(Clone)]
pub struct GuestException {
    object: ObjectRef,
    class_name: String,
    message: Option<String>,
    method_catch: Option<Arc<dyn CatchHandler>>,
    toplevel: Option<Arc<dyn ToplevelHandler>>,
}

impl GuestException {
    /// Exception for `object` of class `class_name`, caught by method
    /// catch tables
    pub fn new(object: ObjectRef, class_name: impl Into<String>) -> Self {
        Self {
            object,
            class_name: class_name.into(),
            message: None,
            method_catch: Some(Arc::new(MethodCatchTable)),
            toplevel: None,
        }
    }

    /// Attach a host-side message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Replace the method-level catch handler
    pub fn with_catch_handler(mut self, handler: Arc<dyn CatchHandler>) -> Self {
        self.method_catch = Some(handler);
        self
    }

    /// Make the exception uncatchable by frames
    pub fn without_catch_handler(mut self) -> Self {
        self.method_catch = None;
        self
    }

    /// Attach a top-level handler
    pub fn with_toplevel(mut self, handler: Arc<dyn ToplevelHandler>) -> Self {
        self.toplevel = Some(handler);
        self
    }

    /// Thrown object
    pub fn object(&self) -> ObjectRef {
        self.object
    }

    /// Class descriptor of the thrown object
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Host-side message, if any
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Method-level catch handler
    pub fn method_catch(&self) -> Option<&Arc<dyn CatchHandler>> {
        self.method_catch.as_ref()
    }

    /// Top-level handler
    pub fn toplevel(&self) -> Option<&Arc<dyn ToplevelHandler>> {
        self.toplevel.as_ref()
    }
}

impl fmt::Debug for GuestException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestException")
            .field("class", &self.class_name)
            .field("object", &self.object.as_u64())
            .field("message", &self.message)
            .field("catchable", &self.method_catch.is_some())
            .field("toplevel", &self.toplevel.is_some())
            .finish()
    }
}

impl fmt::Display for GuestException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.class_name, msg),
            None => write!(f, "{}", self.class_name),
        }
    }
}
