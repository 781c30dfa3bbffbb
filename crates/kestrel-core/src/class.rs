//! Collaborator contracts for methods, classes and class loaders
//!
//! The execution core never decodes bytecode or resolves classes itself.
//! Embedders implement these traits; the core only calls the handful of
//! operations it needs to drive frames, unwind exceptions and build the
//! few guest objects the runtime creates on its own (strings, arrays,
//! exception instances).

use crate::exception::GuestException;
use crate::value::Value;
use crate::vm::{RuntimeState, StepOutcome};
use crate::VmResult;
use std::fmt;
use std::sync::Arc;

/// Shared method handle
pub type MethodRef = Arc<dyn Method>;

/// Shared class handle
pub type ClassRef = Arc<dyn GuestClass>;

/// Shared class loader handle
pub type LoaderRef = Arc<dyn ClassLoader>;

/// A resolved guest method
pub trait Method: Send + Sync {
    /// Fully qualified signature, e.g. `java/lang/Object::hashCode()I`
    fn full_signature(&self) -> &str;

    /// Whether the method has bytecode (false for native methods)
    fn has_bytecode(&self) -> bool;

    /// Declaring class, if any
    fn class(&self) -> Option<ClassRef> {
        None
    }

    /// Number of operand bytes following the opcode at `pc`
    ///
    /// Used to step over the instruction that started an asynchronous
    /// operation once it completes.
    fn operand_len(&self, pc: usize) -> Option<usize>;

    /// Look up the catch table for a handler covering `pc` that accepts
    /// `exception`; returns the handler offset.
    ///
    /// `raising` is true when this method's frame raised the exception and
    /// false when the frame is a caller the exception is propagating through.
    fn catch_target(&self, pc: usize, exception: &GuestException, raising: bool) -> Option<usize> {
        let _ = (pc, exception, raising);
        None
    }

    /// Execute one step of this method on the current frame
    fn execute(&self, rt: &mut RuntimeState) -> VmResult<StepOutcome>;
}

impl fmt::Debug for dyn Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({})", self.full_signature())
    }
}

/// A loaded, initialized guest class
pub trait GuestClass: Send + Sync {
    /// Internal descriptor name, e.g. `Ljava/lang/String;` or `[C`
    fn name(&self) -> &str;

    /// Defining loader
    fn loader(&self) -> Option<LoaderRef>;

    /// Find a method by signature, e.g. `<init>(Ljava/lang/String;)V`
    fn method_lookup(&self, signature: &str) -> Option<MethodRef>;

    /// Read a static field
    fn static_field(&self, name: &str) -> Option<Value>;

    /// Write a static field
    fn set_static_field(&self, name: &str, value: Value);
}

impl fmt::Debug for dyn GuestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Class({})", self.name())
    }
}

/// A class loader able to hand out initialized classes
pub trait ClassLoader: Send + Sync {
    /// Loader name used in diagnostics and snapshots
    fn name(&self) -> &str;

    /// Resolve and initialize `name`
    ///
    /// With `allow_null` a missing class yields `Ok(None)`; otherwise the
    /// loader reports an error.
    fn get_initialized_class(&self, name: &str, allow_null: bool) -> VmResult<Option<ClassRef>>;

    /// Render loader identity for a state dump
    fn describe(&self) -> serde_json::Value {
        serde_json::json!({ "loader": self.name() })
    }
}

impl fmt::Debug for dyn ClassLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassLoader({})", self.name())
    }
}
