//! State owned by one VM instance
//!
//! Everything that would otherwise be process-wide (thread pool, string
//! intern table, memory blocks, continuations, pending input, run stamp)
//! lives on [`RuntimeState`], so independent instances can coexist.

use super::continuation::{Continuation, ContinuationId, ContinuationTable};
use super::execution::StepOutcome;
use super::input::{InputBuffer, InputSource};
use super::suspend::AsyncCompletion;
use crate::class::{ClassRef, LoaderRef};
use crate::config::VmOptions;
use crate::exception::{GuestException, ToplevelHandler};
use crate::memory::MemoryBlockTable;
use crate::object::{Heap, ObjectRef};
use crate::scheduler::{
    Clock, HostHandle, HostTask, Scheduler, SwitchOutcome, ThreadId, ThreadState,
};
use crate::snapshot::{write_dump, StackSnapshot};
use crate::stack::{CallStack, Frame, FrameRunner};
use crate::strings::{
    self, StringPool, CHAR_ARRAY_CLASS, STRING_CLASS, STRING_COUNT_FIELD, STRING_VALUE_FIELD,
};
use crate::sync::MonitorId;
use crate::value::Value;
use crate::{VmError, VmResult};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

/// Detail message field of guest throwables
pub const THROWABLE_MESSAGE_FIELD: &str = "Ljava/lang/Throwable;detailMessage";

const NULL_POINTER_EXCEPTION: &str = "Ljava/lang/NullPointerException;";
const NEGATIVE_ARRAY_SIZE_EXCEPTION: &str = "Ljava/lang/NegativeArraySizeException;";
const STRING_ARRAY_CLASS: &str = "[Ljava/lang/String;";
const EXCEPTION_CONSTRUCTOR: &str = "<init>(Ljava/lang/String;)V";

/// Name of the frame pushed under an asynchronous result
pub(crate) const ASYNC_OP_FRAME: &str = "async_op";

/// Name of the marker frame on top of a freshly spawned thread
pub const THREAD_START_FRAME: &str = "$thread_start";

/// Allocator of run stamps
///
/// Each runtime instance takes one stamp at construction. Stamps only
/// increase and tag dumps and log lines.
#[derive(Debug, Default)]
pub struct RunStamps {
    last: AtomicU64,
}

impl RunStamps {
    /// Create an allocator starting at 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Next stamp
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Host text sink for guest output
pub type PrintFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything one VM instance owns
pub struct RuntimeState {
    run_stamp: u64,
    scheduler: Scheduler,
    heap: Heap,
    strings: StringPool,
    memory: MemoryBlockTable,
    pub(crate) continuations: ContinuationTable,
    input: InputBuffer,
    input_source: Arc<dyn InputSource>,
    bootstrap_loader: LoaderRef,
    uncaught_handler: Option<Arc<dyn ToplevelHandler>>,
    print: PrintFn,
    startup_time: i64,
    clock: Arc<dyn Clock>,
    options: VmOptions,
    host: HostHandle,
    next_token: u64,
    pub(crate) unusual_termination: bool,
}

impl RuntimeState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        stamps: &RunStamps,
        bootstrap_loader: LoaderRef,
        options: VmOptions,
        clock: Arc<dyn Clock>,
        host: HostHandle,
        input_source: Arc<dyn InputSource>,
        print: PrintFn,
        initial_stack: Vec<Value>,
    ) -> Self {
        let startup_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let run_stamp = stamps.next();
        debug!(run_stamp, "runtime state created");
        Self {
            run_stamp,
            scheduler: Scheduler::new(CallStack::with_initial_stack(initial_stack)),
            heap: Heap::new(),
            strings: StringPool::new(),
            memory: MemoryBlockTable::new(),
            continuations: ContinuationTable::new(),
            input: InputBuffer::new(),
            input_source,
            bootstrap_loader,
            uncaught_handler: None,
            print,
            startup_time,
            clock,
            options,
            host,
            next_token: 0,
            unusual_termination: false,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Stamp of this instance
    pub fn run_stamp(&self) -> u64 {
        self.run_stamp
    }

    /// Options this instance was built with
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Current instant of the instance clock
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Wall-clock startup time in milliseconds since the epoch
    pub fn startup_time(&self) -> i64 {
        self.startup_time
    }

    /// Whether an exception escaped every frame during this instance's life
    pub fn unusual_termination(&self) -> bool {
        self.unusual_termination
    }

    /// Write guest output to the host
    pub fn print(&self, text: &str) {
        (self.print)(text)
    }

    /// Thread scheduler
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Mutable thread scheduler
    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Object store
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Mutable object store
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Intern table
    pub fn strings(&self) -> &StringPool {
        &self.strings
    }

    /// Raw memory blocks
    pub fn memory(&self) -> &MemoryBlockTable {
        &self.memory
    }

    /// Mutable raw memory blocks
    pub fn memory_mut(&mut self) -> &mut MemoryBlockTable {
        &mut self.memory
    }

    /// Bytes received from the input source but not yet read
    pub fn input_buffer(&self) -> &InputBuffer {
        &self.input
    }

    /// Handler attached to exceptions the runtime creates
    pub fn set_uncaught_handler(&mut self, handler: Arc<dyn ToplevelHandler>) {
        self.uncaught_handler = Some(handler);
    }

    // ========================================================================
    // Frames and operands
    // ========================================================================

    /// Current thread
    pub fn current_thread(&self) -> ThreadId {
        self.scheduler.current()
    }

    /// Call stack of the current thread
    pub fn current_stack(&self) -> &CallStack {
        self.scheduler.current_stack()
    }

    /// Mutable call stack of the current thread
    pub fn current_stack_mut(&mut self) -> &mut CallStack {
        self.scheduler.current_stack_mut()
    }

    /// Top frame of the current thread
    pub fn current_frame(&self) -> VmResult<&Frame> {
        self.current_stack().current().ok_or(VmError::EmptyCallStack)
    }

    /// Mutable top frame of the current thread
    pub fn current_frame_mut(&mut self) -> VmResult<&mut Frame> {
        self.current_stack_mut().current_mut().ok_or(VmError::EmptyCallStack)
    }

    /// Push a frame on the current thread; returns the new depth
    pub fn push_frame(&mut self, frame: Frame) -> usize {
        self.current_stack_mut().push(frame)
    }

    /// Pop the current frame; the root frame cannot be popped
    pub fn pop_frame(&mut self) -> VmResult<Frame> {
        let stack = self.current_stack_mut();
        if stack.depth() <= 1 {
            return Err(VmError::BootstrapReturn);
        }
        Ok(stack.pop())
    }

    /// Pop the current frame and push `values` on its caller
    pub fn return_values(&mut self, values: Vec<Value>) -> VmResult<()> {
        self.pop_frame()?;
        let caller = self.current_frame_mut()?;
        caller.stack.extend(values);
        Ok(())
    }

    /// Push an operand on the current frame
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        self.current_frame_mut()?.push(value);
        Ok(())
    }

    /// Pop an operand from the current frame
    pub fn pop(&mut self) -> VmResult<Value> {
        self.current_frame_mut()?.pop()
    }

    /// Peek at the current frame's operand stack (0 = top)
    pub fn peek(&self, depth: usize) -> VmResult<Value> {
        self.current_frame()?.peek(depth)
    }

    /// Load a local of the current frame
    pub fn local(&self, index: usize) -> VmResult<Value> {
        Ok(self.current_frame()?.local(index))
    }

    /// Store a local of the current frame
    pub fn set_local(&mut self, index: usize, value: Value) -> VmResult<()> {
        self.current_frame_mut()?.set_local(index, value);
        Ok(())
    }

    // ========================================================================
    // Classes and guest objects
    // ========================================================================

    /// Bootstrap class loader
    pub fn bootstrap_loader(&self) -> &LoaderRef {
        &self.bootstrap_loader
    }

    /// Resolve `name` through the bootstrap loader
    pub fn bootstrap_class(&self, name: &str) -> VmResult<ClassRef> {
        self.bootstrap_loader
            .get_initialized_class(name, false)?
            .ok_or_else(|| VmError::ClassNotFound(name.to_string()))
    }

    /// Loader of the current frame's class (bootstrap for native frames)
    pub fn current_loader(&self) -> LoaderRef {
        self.current_frame()
            .ok()
            .and_then(|f| f.method())
            .and_then(|m| m.class())
            .and_then(|c| c.loader())
            .unwrap_or_else(|| Arc::clone(&self.bootstrap_loader))
    }

    /// Resolve `name` through the current frame's loader
    pub fn class_for_current_frame(&self, name: &str) -> VmResult<ClassRef> {
        self.current_loader()
            .get_initialized_class(name, false)?
            .ok_or_else(|| VmError::ClassNotFound(name.to_string()))
    }

    /// Build a guest char array holding the UTF-16 units of `s`
    pub fn init_char_array(&mut self, s: &str) -> VmResult<ObjectRef> {
        let class = self.bootstrap_class(CHAR_ARRAY_CLASS)?;
        Ok(self.heap.new_array(class, strings::char_values(s)))
    }

    /// Build a guest string; with `intern` the same object is returned for
    /// equal contents
    pub fn init_string(&mut self, s: &str, intern: bool) -> VmResult<ObjectRef> {
        if intern {
            if let Some(existing) = self.strings.get(s) {
                return Ok(existing);
            }
        }
        let chars = self.init_char_array(s)?;
        let class = self.bootstrap_class(STRING_CLASS)?;
        let count = s.encode_utf16().count() as i32;
        let obj = self.heap.new_object(
            class,
            [
                (STRING_VALUE_FIELD, Value::Ref(chars)),
                (STRING_COUNT_FIELD, Value::i32(count)),
            ],
        );
        if intern {
            self.strings.insert(s, obj);
        }
        Ok(obj)
    }

    /// Build a zero-filled array of `component` values
    ///
    /// A negative length raises `NegativeArraySizeException`.
    pub fn new_array(&mut self, component: &str, len: i32) -> VmResult<ObjectRef> {
        if len < 0 {
            let msg = format!("Tried to init [{} array with length {}", component, len);
            return Err(self.new_exception(NEGATIVE_ARRAY_SIZE_EXCEPTION, &msg)?.into());
        }
        let array_class = format!("[{}", component);
        let class = match component.as_bytes().first() {
            Some(b'L') | Some(b'[') => self.class_for_current_frame(&array_class)?,
            _ => self.bootstrap_class(&array_class)?,
        };
        let elements = vec![Value::zero_for(component); len as usize];
        Ok(self.heap.new_array(class, elements))
    }

    /// Pass non-null values through; null raises `NullPointerException`
    pub fn check_null(&mut self, value: Value) -> VmResult<Value> {
        if value.is_null() {
            return Err(self.new_exception(NULL_POINTER_EXCEPTION, "")?.into());
        }
        Ok(value)
    }

    /// Allocate an exception object with its detail message set directly
    ///
    /// Used where a constructor call cannot be scheduled, e.g. from helpers
    /// that report through `VmResult`.
    pub fn new_exception(&mut self, class_name: &str, message: &str) -> VmResult<GuestException> {
        let class = self.bootstrap_class(class_name)?;
        let msg = self.init_string(message, false)?;
        let obj = self
            .heap
            .new_object(class, [(THROWABLE_MESSAGE_FIELD, Value::Ref(msg))]);
        Ok(self.decorate(GuestException::new(obj, class_name).with_message(message)))
    }

    fn decorate(&self, exception: GuestException) -> GuestException {
        match &self.uncaught_handler {
            Some(handler) => exception.with_toplevel(Arc::clone(handler)),
            None => exception,
        }
    }

    /// Construct an exception of `class_name` and throw it from the
    /// current frame
    ///
    /// When the class has a `(String)` constructor it runs first, in its
    /// own frame; the throw happens once it returns.
    pub fn throw_new(&mut self, class_name: &str, message: &str) -> VmResult<StepOutcome> {
        let class = self.bootstrap_class(class_name)?;
        let obj = self.heap.new_object(class.clone(), Vec::<(String, Value)>::new());
        let msg = self.init_string(message, false)?;
        let exception = self.decorate(GuestException::new(obj, class_name).with_message(message));

        let ctor = match class.method_lookup(EXCEPTION_CONSTRUCTOR) {
            Some(ctor) => ctor,
            None => {
                self.heap.set_field(obj, THROWABLE_MESSAGE_FIELD, Value::Ref(msg));
                return Ok(StepOutcome::Raise(exception));
            }
        };

        let frame = self.current_frame_mut()?;
        frame.push(Value::Ref(obj));
        let restore = frame.runner.take();
        let id = self
            .continuations
            .register(Continuation::RaiseConstructed { restore, exception });
        self.current_frame_mut()?.runner = Some(FrameRunner::Resume(id));
        self.push_frame(Frame::new(ctor, vec![Value::Ref(obj), Value::Ref(msg)], Vec::new()));
        Ok(StepOutcome::ReturnControl)
    }

    /// Build the `String[]` argument array and reseed the current thread's
    /// stack with it
    pub fn init_args(&mut self, args: &[&str]) -> VmResult<()> {
        let mut elements = Vec::with_capacity(args.len());
        for arg in args {
            elements.push(Value::Ref(self.init_string(arg, false)?));
        }
        let class = self.bootstrap_class(STRING_ARRAY_CLASS)?;
        let array = self.heap.new_array(class, elements);
        *self.current_stack_mut() = CallStack::with_initial_stack(vec![Value::Ref(array)]);
        debug!(run_stamp = self.run_stamp, "finished runtime state initialization");
        Ok(())
    }

    /// Start address of the memory block containing `addr`
    pub fn block_addr(&self, addr: u64) -> VmResult<u64> {
        self.memory.block_addr(addr)
    }

    // ========================================================================
    // Threads
    // ========================================================================

    /// Register a thread that will run `entry` when first scheduled
    pub fn spawn_thread(
        &mut self,
        name: &str,
        object: Option<ObjectRef>,
        entry: Frame,
    ) -> ThreadId {
        let mut stack = CallStack::new();
        stack.push(entry);
        let mut marker = Frame::synthetic(THREAD_START_FRAME);
        marker.runner = Some(FrameRunner::PopMarker);
        stack.push(marker);
        self.scheduler.spawn(name, object, stack)
    }

    /// Observable state of a thread
    ///
    /// Parks whose deadline has passed on the runtime clock read as
    /// released even before the next selection.
    pub fn thread_state(&self, id: ThreadId) -> VmResult<ThreadState> {
        self.scheduler.thread_state_at(id, self.clock.now())
    }

    fn settle(&mut self, outcome: SwitchOutcome) -> SwitchOutcome {
        let displaced = self.scheduler.take_displaced();
        self.release_continuations(displaced);
        if let SwitchOutcome::Deferred(at) = outcome {
            self.host.post_at(at, HostTask::SelectThread);
        }
        outcome
    }

    /// Drop continuations whose frames will never step them
    pub(crate) fn release_continuations(&mut self, ids: Vec<ContinuationId>) {
        for id in ids {
            if self.continuations.take(id).is_some() {
                trace!(continuation = id.as_u64(), "released orphaned continuation");
            }
        }
    }

    /// Number of registered continuations not yet resumed
    pub fn pending_continuations(&self) -> usize {
        self.continuations.len()
    }

    /// Hand control to `target`
    pub fn yield_to(&mut self, target: ThreadId) -> VmResult<SwitchOutcome> {
        self.scheduler.yield_to(target)?;
        Ok(self.settle(SwitchOutcome::Switched))
    }

    /// Block the current thread on `monitor`
    pub fn wait(
        &mut self,
        monitor: MonitorId,
        yieldee: Option<ThreadId>,
    ) -> VmResult<SwitchOutcome> {
        let now = self.clock.now();
        let outcome = self.scheduler.wait(monitor, yieldee, now)?;
        Ok(self.settle(outcome))
    }

    /// Release the oldest waiter of `monitor`
    pub fn notify(&mut self, monitor: MonitorId) -> Option<ThreadId> {
        self.scheduler.notify(monitor)
    }

    /// Release every waiter of `monitor`
    pub fn notify_all(&mut self, monitor: MonitorId) -> Vec<ThreadId> {
        self.scheduler.notify_all(monitor)
    }

    /// Take a park permit from `thread`, optionally only for `timeout`
    pub fn park(&mut self, thread: ThreadId, timeout: Option<Duration>) -> VmResult<SwitchOutcome> {
        let now = self.clock.now();
        let deadline = timeout.map(|t| now + t);
        let outcome = self.scheduler.park(thread, deadline, now)?;
        Ok(self.settle(outcome))
    }

    /// Return a park permit to `thread`
    pub fn unpark(&mut self, thread: ThreadId) -> VmResult<SwitchOutcome> {
        let outcome = self.scheduler.unpark(thread)?;
        Ok(self.settle(outcome))
    }

    /// Put the current thread to sleep for `duration`
    pub fn sleep(&mut self, duration: Duration) -> VmResult<SwitchOutcome> {
        let now = self.clock.now();
        self.sleep_until(now + duration)
    }

    /// Put the current thread to sleep until `deadline`
    pub fn sleep_until(&mut self, deadline: Instant) -> VmResult<SwitchOutcome> {
        let now = self.clock.now();
        let outcome = self.scheduler.sleep_until(deadline, now)?;
        Ok(self.settle(outcome))
    }

    // ========================================================================
    // Suspension, input and dumps
    // ========================================================================

    pub(crate) fn new_completion(&mut self) -> AsyncCompletion {
        self.next_token += 1;
        AsyncCompletion::new(self.next_token, self.host.clone())
    }

    /// Read up to `n` bytes of guest input
    ///
    /// Buffered bytes are served first without touching the input source.
    pub fn async_input<F>(&self, n: usize, resume: F)
    where
        F: FnOnce(Vec<u8>) + Send + 'static,
    {
        self.input.read(self.input_source.as_ref(), n, resume)
    }

    /// Write the current thread's stack (or `snapshot`) to
    /// `core-<thread>[-<suffix>].json` in the dump directory
    ///
    /// Failures are logged and reported as `None`.
    pub fn dump_state(
        &self,
        snapshot: Option<&StackSnapshot>,
        suffix: Option<&str>,
    ) -> Option<PathBuf> {
        let captured;
        let snapshot = match snapshot {
            Some(s) => s,
            None => {
                captured = self.current_stack().snapshot();
                &captured
            }
        };
        let frames = snapshot.serialize(&self.heap);
        let thread = self.current_thread();
        match write_dump(&self.options.dump_dir, thread.as_u64(), suffix, &frames) {
            Ok(path) => {
                debug!(
                    run_stamp = self.run_stamp,
                    thread = %thread,
                    path = %path.display(),
                    "wrote state dump"
                );
                Some(path)
            }
            Err(e) => {
                warn!(
                    run_stamp = self.run_stamp,
                    thread = %thread,
                    error = %e,
                    "failed to write state dump"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeState")
            .field("run_stamp", &self.run_stamp)
            .field("current_thread", &self.scheduler.current())
            .field("stack", self.current_stack())
            .field("heap_entries", &self.heap.len())
            .finish()
    }
}
