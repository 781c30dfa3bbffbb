//! Frames and per-thread call stacks
//!
//! Every logical thread owns one [`CallStack`]. The stack is never empty:
//! it is seeded with a synthetic native `$bootstrap` frame which stays at
//! the bottom for the thread's whole life.
//!
//! # Layout
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │ Frame N (current)                   │  ← current(), caller_at_depth(0)
//! │   runner: Bytecode | Native | ...   │
//! │   pc, operand stack, locals         │
//! ├─────────────────────────────────────┤
//! │ Frame N-1                           │  ← caller_at_depth(1)
//! │   ...                               │
//! ├─────────────────────────────────────┤
//! │ $bootstrap (native, no runner)      │  ← caller_at_depth(N)
//! └─────────────────────────────────────┘
//! ```

use crate::class::MethodRef;
use crate::snapshot::StackSnapshot;
use crate::value::Value;
use crate::vm::{ContinuationId, RuntimeState, StepOutcome};
use crate::{VmError, VmResult};
use std::fmt;
use std::sync::Arc;

/// Name of the synthetic frame at the bottom of every call stack
pub const BOOTSTRAP_FRAME: &str = "$bootstrap";

/// Host logic run by a native frame
pub trait NativeStep: Send + Sync {
    /// Execute one step on the current frame
    fn step(&self, rt: &mut RuntimeState) -> VmResult<StepOutcome>;
}

impl<F> NativeStep for F
where
    F: Fn(&mut RuntimeState) -> VmResult<StepOutcome> + Send + Sync,
{
    fn step(&self, rt: &mut RuntimeState) -> VmResult<StepOutcome> {
        self(rt)
    }
}

/// What the execution loop runs next for a frame
#[derive(Clone)]
pub enum FrameRunner {
    /// Hand the frame to its method's interpreter
    Bytecode,
    /// Run host logic
    Native(Arc<dyn NativeStep>),
    /// One-shot: pop this frame (placed by thread handoff)
    PopMarker,
    /// Awaiting resume with a registered continuation
    Resume(ContinuationId),
}

impl fmt::Debug for FrameRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameRunner::Bytecode => write!(f, "Bytecode"),
            FrameRunner::Native(_) => write!(f, "Native"),
            FrameRunner::PopMarker => write!(f, "PopMarker"),
            FrameRunner::Resume(id) => write!(f, "Resume({})", id.as_u64()),
        }
    }
}

/// One method activation
pub struct Frame {
    method: Option<MethodRef>,
    name: Arc<str>,
    native: bool,

    /// Program counter
    pub pc: usize,

    /// Operand stack
    pub stack: Vec<Value>,

    /// Local variable slots
    pub locals: Vec<Value>,

    /// Next step; `None` once the frame has nothing left to run
    pub runner: Option<FrameRunner>,

    /// Error handler (native frames only), run in place of the runner when
    /// an exception propagates into this frame
    pub error: Option<Arc<dyn NativeStep>>,
}

impl Frame {
    /// Create a frame for a method invocation
    ///
    /// Bytecode methods get a `Bytecode` runner; anything else starts
    /// without a runner and must be given one by the caller.
    pub fn new(method: MethodRef, locals: Vec<Value>, stack: Vec<Value>) -> Self {
        let name: Arc<str> = Arc::from(method.full_signature());
        let runner = if method.has_bytecode() {
            Some(FrameRunner::Bytecode)
        } else {
            None
        };
        Self {
            method: Some(method),
            name,
            native: false,
            pc: 0,
            stack,
            locals,
            runner,
            error: None,
        }
    }

    /// Create a native frame running host logic
    pub fn native(
        name: &str,
        handler: Option<Arc<dyn NativeStep>>,
        error: Option<Arc<dyn NativeStep>>,
    ) -> Self {
        Self {
            method: None,
            name: Arc::from(name),
            native: true,
            pc: 0,
            stack: Vec::new(),
            locals: Vec::new(),
            runner: handler.map(FrameRunner::Native),
            error,
        }
    }

    /// Create a native frame with no work of its own
    pub fn synthetic(name: &str) -> Self {
        Self::native(name, None, None)
    }

    /// The method this frame activates (`None` for native frames)
    pub fn method(&self) -> Option<&MethodRef> {
        self.method.as_ref()
    }

    /// Display name (method signature or native frame name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is a native frame
    pub fn is_native(&self) -> bool {
        self.native
    }

    /// Whether the frame still has work to run
    pub fn has_runner(&self) -> bool {
        self.runner.is_some()
    }

    /// Push an operand
    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop an operand
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackUnderflow` if the operand stack is empty.
    #[inline]
    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Peek at value N slots from top (0 = top)
    #[inline]
    pub fn peek(&self, depth: usize) -> VmResult<Value> {
        if self.stack.len() <= depth {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.stack[self.stack.len() - 1 - depth])
    }

    /// Load a local slot (unset slots read as null)
    #[inline]
    pub fn local(&self, index: usize) -> Value {
        self.locals.get(index).copied().unwrap_or(Value::Null)
    }

    /// Store a local slot, growing the slot vector as needed
    pub fn set_local(&mut self, index: usize, value: Value) {
        if index >= self.locals.len() {
            self.locals.resize(index + 1, Value::Null);
        }
        self.locals[index] = value;
    }

    /// Store a two-slot value; the upper slot is cleared
    pub fn set_local_wide(&mut self, index: usize, value: Value) {
        self.set_local(index, value);
        self.set_local(index + 1, Value::Null);
    }

    /// Jump to an absolute pc
    #[inline]
    pub fn goto_pc(&mut self, pc: usize) {
        self.pc = pc;
    }

    /// Advance the pc by `n` bytes
    #[inline]
    pub fn advance_pc(&mut self, n: usize) {
        self.pc += n;
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("name", &self.name)
            .field("pc", &self.pc)
            .field("native", &self.native)
            .field("runner", &self.runner)
            .field("stack", &self.stack)
            .field("locals", &self.locals)
            .finish()
    }
}

/// Ordered frames of one logical thread
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    /// Create a call stack holding only the bootstrap frame
    pub fn new() -> Self {
        Self::with_initial_stack(Vec::new())
    }

    /// Create a call stack whose bootstrap frame starts with `initial_stack`
    /// as its operand stack (e.g. the program arguments array)
    pub fn with_initial_stack(initial_stack: Vec<Value>) -> Self {
        let mut bootstrap = Frame::synthetic(BOOTSTRAP_FRAME);
        bootstrap.stack = initial_stack;
        Self {
            frames: vec![bootstrap],
        }
    }

    /// Number of frames, bootstrap included
    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Push a frame; returns the new depth
    pub fn push(&mut self, frame: Frame) -> usize {
        self.frames.push(frame);
        self.frames.len()
    }

    /// Pop the top frame
    ///
    /// # Panics
    ///
    /// Popping an empty stack is a scheduler bug, not a guest error.
    pub fn pop(&mut self) -> Frame {
        self.frames
            .pop()
            .expect("pop on an empty call stack; callers must check depth first")
    }

    /// Truncate `count` frames from the top; returns the new depth
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the depth.
    pub fn pop_n(&mut self, count: usize) -> usize {
        assert!(
            count <= self.frames.len(),
            "pop_n({}) on a call stack of depth {}",
            count,
            self.frames.len()
        );
        let new_len = self.frames.len() - count;
        self.frames.truncate(new_len);
        new_len
    }

    /// Current (top) frame
    #[inline]
    pub fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Mutable current frame
    #[inline]
    pub fn current_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// Frame `n` levels below the top (0 = current); `None` past the bottom
    pub fn caller_at_depth(&self, n: usize) -> Option<&Frame> {
        let idx = self.frames.len().checked_sub(n + 1)?;
        self.frames.get(idx)
    }

    /// Mutable frame `n` levels below the top
    pub fn caller_at_depth_mut(&mut self, n: usize) -> Option<&mut Frame> {
        let idx = self.frames.len().checked_sub(n + 1)?;
        self.frames.get_mut(idx)
    }

    /// Iterate frames bottom to top
    pub fn frames(&self) -> impl Iterator<Item = &Frame> + '_ {
        self.frames.iter()
    }

    /// Capture an immutable view of every frame, bottom to top
    pub fn snapshot(&self) -> StackSnapshot {
        StackSnapshot::capture(self)
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.frames.iter().map(|fr| fr.name())).finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
