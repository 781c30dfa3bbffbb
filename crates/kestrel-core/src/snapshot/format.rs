use crate::class::LoaderRef;
use crate::object::{Heap, ObjectRef};
use crate::stack::{CallStack, Frame};
use crate::value::Value;
use rustc_hash::FxHashSet;
use serde::Serialize;

/// Immutable view of one frame at capture time
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// Method signature or native frame name
    pub name: String,
    /// Program counter
    pub pc: usize,
    /// Native frame flag
    pub native: bool,
    /// Operand stack copy
    pub stack: Vec<Value>,
    /// Local slot copy
    pub locals: Vec<Value>,
    /// Defining loader of the frame's class
    pub loader: Option<LoaderRef>,
}

impl FrameSnapshot {
    fn capture(frame: &Frame) -> Self {
        let loader = frame
            .method()
            .and_then(|m| m.class())
            .and_then(|c| c.loader());
        Self {
            name: frame.name().to_string(),
            pc: frame.pc,
            native: frame.is_native(),
            stack: frame.stack.clone(),
            locals: frame.locals.clone(),
            loader,
        }
    }
}

/// Frames of one call stack, bottom to top
#[derive(Debug, Clone, Default)]
pub struct StackSnapshot {
    frames: Vec<FrameSnapshot>,
}

/// Fully rendered frame, as written to a state dump
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializedFrame {
    /// Method signature or native frame name
    pub name: String,
    /// Program counter
    pub pc: usize,
    /// Native frame flag
    pub native: bool,
    /// Loader identity, `null` for frames without a class
    pub loader: serde_json::Value,
    /// Operand stack with object graphs expanded
    pub stack: Vec<serde_json::Value>,
    /// Local slots with object graphs expanded
    pub locals: Vec<serde_json::Value>,
}

impl StackSnapshot {
    /// Capture every frame of `stack`
    pub fn capture(stack: &CallStack) -> Self {
        Self {
            frames: stack.frames().map(FrameSnapshot::capture).collect(),
        }
    }

    /// Captured frames, bottom to top
    pub fn frames(&self) -> &[FrameSnapshot] {
        &self.frames
    }

    /// Number of captured frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Render frames against the current heap contents
    ///
    /// An object reachable from several slots is expanded once; later
    /// occurrences render as `{"ref": id}`.
    pub fn serialize(&self, heap: &Heap) -> Vec<SerializedFrame> {
        let mut visited: FxHashSet<ObjectRef> = FxHashSet::default();
        self.frames
            .iter()
            .map(|f| SerializedFrame {
                name: f.name.clone(),
                pc: f.pc,
                native: f.native,
                loader: f
                    .loader
                    .as_ref()
                    .map(|l| l.describe())
                    .unwrap_or(serde_json::Value::Null),
                stack: f
                    .stack
                    .iter()
                    .map(|v| heap.serialize_value(*v, &mut visited))
                    .collect(),
                locals: f
                    .locals
                    .iter()
                    .map(|v| heap.serialize_value(*v, &mut visited))
                    .collect(),
            })
            .collect()
    }
}
