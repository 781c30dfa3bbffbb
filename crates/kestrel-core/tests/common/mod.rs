//! Shared collaborators for integration tests
//!
//! `Script` is a tiny bytecode method: a list of ops laid out like real
//! instructions (one opcode byte plus operand bytes), so pc arithmetic and
//! catch ranges behave as they would for decoded bytecode.

#![allow(dead_code)]

use kestrel_core::{
    AsyncCompletion, ClassLoader, ClassRef, Frame, GuestClass, GuestException, LoaderRef,
    ManualClock, Method, MethodRef, NativeStep, RunStamps, RuntimeState, StepOutcome, Suspension,
    Value, Vm, VmBuilder, VmError, VmOptions, VmResult,
};
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;
use std::sync::{Arc, Weak};
use std::time::Duration;

// ============================================================================
// Loader and classes
// ============================================================================

pub struct Loader {
    name: String,
    me: Weak<Loader>,
    classes: Mutex<HashMap<String, Arc<Class>>>,
}

impl Loader {
    pub fn new(name: &str) -> Arc<Loader> {
        Arc::new_cyclic(|me| Loader {
            name: name.to_string(),
            me: me.clone(),
            classes: Mutex::new(HashMap::new()),
        })
    }

    /// Get or create a class
    pub fn class(&self, name: &str) -> Arc<Class> {
        let mut classes = self.classes.lock();
        classes
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Class {
                    name: name.to_string(),
                    loader: self.me.clone(),
                    methods: Mutex::new(HashMap::new()),
                    statics: Mutex::new(HashMap::new()),
                })
            })
            .clone()
    }
}

impl ClassLoader for Loader {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_initialized_class(&self, name: &str, _allow_null: bool) -> VmResult<Option<ClassRef>> {
        let class: ClassRef = self.class(name);
        Ok(Some(class))
    }
}

pub struct Class {
    name: String,
    loader: Weak<Loader>,
    methods: Mutex<HashMap<String, MethodRef>>,
    statics: Mutex<HashMap<String, Value>>,
}

impl Class {
    pub fn add_method(&self, signature: &str, method: MethodRef) {
        self.methods.lock().insert(signature.to_string(), method);
    }
}

impl GuestClass for Class {
    fn name(&self) -> &str {
        &self.name
    }

    fn loader(&self) -> Option<LoaderRef> {
        let loader: LoaderRef = self.loader.upgrade()?;
        Some(loader)
    }

    fn method_lookup(&self, signature: &str) -> Option<MethodRef> {
        self.methods.lock().get(signature).cloned()
    }

    fn static_field(&self, name: &str) -> Option<Value> {
        self.statics.lock().get(name).copied()
    }

    fn set_static_field(&self, name: &str, value: Value) {
        self.statics.lock().insert(name.to_string(), value);
    }
}

// ============================================================================
// Scripted bytecode methods
// ============================================================================

pub type OpFn = Arc<dyn Fn(&mut RuntimeState) -> VmResult<StepOutcome> + Send + Sync>;

#[derive(Clone)]
pub struct Op {
    pub operands: usize,
    pub run: OpFn,
}

impl Op {
    pub fn new<F>(operands: usize, run: F) -> Op
    where
        F: Fn(&mut RuntimeState) -> VmResult<StepOutcome> + Send + Sync + 'static,
    {
        Op {
            operands,
            run: Arc::new(run),
        }
    }
}

struct Handler {
    range: Range<usize>,
    target: usize,
    class: Option<String>,
}

pub struct Script {
    signature: String,
    class: Option<ClassRef>,
    ops: Vec<(usize, Op)>,
    handlers: Vec<Handler>,
}

pub struct ScriptBuilder {
    signature: String,
    class: Option<ClassRef>,
    ops: Vec<Op>,
    handlers: Vec<(Range<usize>, usize, Option<String>)>,
}

impl Script {
    pub fn build(signature: &str) -> ScriptBuilder {
        ScriptBuilder {
            signature: signature.to_string(),
            class: None,
            ops: Vec::new(),
            handlers: Vec::new(),
        }
    }

    fn op_at(&self, pc: usize) -> Option<&Op> {
        self.ops.iter().find(|(at, _)| *at == pc).map(|(_, op)| op)
    }
}

impl ScriptBuilder {
    pub fn op(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    pub fn ops(mut self, ops: impl IntoIterator<Item = Op>) -> Self {
        self.ops.extend(ops);
        self
    }

    /// Handler covering ops `[range)` that jumps to op `target`; ranges
    /// and targets are op indices, converted to pcs on `finish`
    pub fn catch(mut self, range: Range<usize>, target: usize, class: Option<&str>) -> Self {
        self.handlers.push((range, target, class.map(str::to_string)));
        self
    }

    pub fn in_class(mut self, class: ClassRef) -> Self {
        self.class = Some(class);
        self
    }

    pub fn finish(self) -> MethodRef {
        let mut pcs = Vec::with_capacity(self.ops.len() + 1);
        let mut pc = 0;
        for op in &self.ops {
            pcs.push(pc);
            pc += 1 + op.operands;
        }
        pcs.push(pc);
        let handlers = self
            .handlers
            .into_iter()
            .map(|(range, target, class)| Handler {
                range: pcs[range.start]..pcs[range.end],
                target: pcs[target],
                class,
            })
            .collect();
        Arc::new(Script {
            signature: self.signature,
            class: self.class,
            ops: pcs.into_iter().zip(self.ops).collect(),
            handlers,
        })
    }
}

/// pc of op `index` in a script whose ops have these operand counts
pub fn pc_of(operands: &[usize], index: usize) -> usize {
    operands[..index].iter().map(|n| n + 1).sum()
}

impl Method for Script {
    fn full_signature(&self) -> &str {
        &self.signature
    }

    fn has_bytecode(&self) -> bool {
        true
    }

    fn class(&self) -> Option<ClassRef> {
        self.class.clone()
    }

    fn operand_len(&self, pc: usize) -> Option<usize> {
        self.op_at(pc).map(|op| op.operands)
    }

    fn catch_target(&self, pc: usize, exception: &GuestException, _raising: bool) -> Option<usize> {
        self.handlers
            .iter()
            .find(|h| {
                h.range.contains(&pc)
                    && h.class.as_deref().map_or(true, |c| c == exception.class_name())
            })
            .map(|h| h.target)
    }

    fn execute(&self, rt: &mut RuntimeState) -> VmResult<StepOutcome> {
        let pc = rt.current_frame()?.pc;
        let op = self.op_at(pc).ok_or_else(|| VmError::UnknownInstruction {
            method: self.signature.clone(),
            pc,
        })?;
        (op.run)(rt)
    }
}

// ============================================================================
// Ops
// ============================================================================

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// Step past the current instruction
pub fn advance(rt: &mut RuntimeState, operands: usize) -> VmResult<StepOutcome> {
    rt.current_frame_mut()?.advance_pc(1 + operands);
    Ok(StepOutcome::Continue)
}

pub mod ops {
    use super::*;

    pub fn push(value: Value) -> Op {
        Op::new(0, move |rt| {
            rt.push(value)?;
            advance(rt, 0)
        })
    }

    pub fn pop() -> Op {
        Op::new(0, |rt| {
            rt.pop()?;
            advance(rt, 0)
        })
    }

    pub fn record(log: &Log, tag: &str) -> Op {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        Op::new(0, move |rt| {
            log.lock().push(tag.clone());
            advance(rt, 0)
        })
    }

    /// Record the top operand without popping it
    pub fn record_top(log: &Log) -> Op {
        let log = Arc::clone(log);
        Op::new(0, move |rt| {
            let top = rt.peek(0)?;
            log.lock().push(format!("{:?}", top));
            advance(rt, 0)
        })
    }

    pub fn record_depth(log: &Log) -> Op {
        let log = Arc::clone(log);
        Op::new(0, move |rt| {
            log.lock().push(format!("depth={}", rt.current_stack().depth()));
            advance(rt, 0)
        })
    }

    pub fn ret() -> Op {
        Op::new(0, |_| Ok(StepOutcome::Return(Vec::new())))
    }

    pub fn ret_top() -> Op {
        Op::new(0, |rt| {
            let value = rt.pop()?;
            Ok(StepOutcome::Return(vec![value]))
        })
    }

    pub fn done() -> Op {
        Op::new(0, |_| Ok(StepOutcome::Done))
    }

    pub fn invoke(method: MethodRef) -> Op {
        Op::new(2, move |rt| {
            rt.current_frame_mut()?.advance_pc(3);
            rt.push_frame(Frame::new(Arc::clone(&method), Vec::new(), Vec::new()));
            Ok(StepOutcome::Continue)
        })
    }

    /// Invoke a native method whose body is `body`
    pub fn call_native<F>(name: &str, body: F) -> Op
    where
        F: Fn(&mut RuntimeState) -> VmResult<StepOutcome> + Send + Sync + 'static,
    {
        let name = name.to_string();
        let handler: Arc<dyn NativeStep> = Arc::new(body);
        Op::new(2, move |rt| {
            rt.current_frame_mut()?.advance_pc(3);
            rt.push_frame(Frame::native(&name, Some(Arc::clone(&handler)), None));
            Ok(StepOutcome::Continue)
        })
    }

    pub fn throw(class: &str) -> Op {
        let class = class.to_string();
        Op::new(0, move |rt| rt.throw_new(&class, "thrown"))
    }

    pub fn fail() -> Op {
        Op::new(0, |_| Err(VmError::Internal("scripted failure".to_string())))
    }

    /// Advance a manual clock, then continue
    pub fn tick(clock: &Arc<ManualClock>, by: Duration) -> Op {
        let clock = Arc::clone(clock);
        Op::new(0, move |rt| {
            clock.advance(by);
            advance(rt, 0)
        })
    }

    pub fn nop() -> Op {
        Op::new(0, |rt| advance(rt, 0))
    }

    /// Suspend; `start` receives the completion
    pub fn suspend<F>(operands: usize, start: F) -> Op
    where
        F: Fn(AsyncCompletion) + Send + Sync + 'static,
    {
        let start = Arc::new(start);
        Op::new(operands, move |_| {
            let start = Arc::clone(&start);
            Ok(StepOutcome::Suspend(Suspension::new(move |_, completion| start(completion))))
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub vm: Vm,
    pub clock: Arc<ManualClock>,
    pub loader: Arc<Loader>,
    pub output: Log,
}

pub fn harness() -> Harness {
    harness_with(VmOptions::default())
}

pub fn harness_with(options: VmOptions) -> Harness {
    harness_from(move |builder| builder.options(options))
}

/// Harness whose builder is adjusted by `configure` before building
pub fn harness_from(configure: impl FnOnce(VmBuilder) -> VmBuilder) -> Harness {
    let stamps = RunStamps::new();
    let clock = Arc::new(ManualClock::new());
    let loader = Loader::new("bootstrap");
    let output = new_log();
    let sink = Arc::clone(&output);
    let builder = Vm::builder(loader.clone())
        .clock(clock.clone())
        .print(move |text| sink.lock().push(text.to_string()));
    let vm = configure(builder).build(&stamps);
    Harness {
        vm,
        clock,
        loader,
        output,
    }
}

impl Harness {
    /// Run `method` on the main thread until the run ends
    pub fn run_main(&mut self, method: MethodRef) -> Option<bool> {
        self.run_with(move |rt| {
            rt.push_frame(Frame::new(method, Vec::new(), Vec::new()));
            Ok(())
        })
    }

    pub fn run_with<S>(&mut self, setup: S) -> Option<bool>
    where
        S: FnOnce(&mut RuntimeState) -> VmResult<()> + Send + 'static,
    {
        let outcome = Rc::new(Cell::new(None));
        let seen = Rc::clone(&outcome);
        self.vm
            .run(setup, false, move |success| seen.set(Some(success)))
            .expect("no run in progress");
        let result = self.vm.run_to_completion();
        assert_eq!(result, outcome.get(), "done callback disagrees with the run result");
        result
    }
}
