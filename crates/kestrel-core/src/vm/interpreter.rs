//! Execution loop driver

use super::budget::StepBudget;
use super::continuation::Continuation;
use super::execution::{execute_step, StepOutcome};
use super::input::{InputSource, NoInput};
use super::runtime::{PrintFn, RunStamps, RuntimeState, ASYNC_OP_FRAME};
use super::suspend::AsyncResult;
use super::unwind::{unwind, Unwound};
use crate::class::LoaderRef;
use crate::config::VmOptions;
use crate::exception::{GuestException, ToplevelHandler};
use crate::scheduler::{Clock, Executor, HostHandle, HostTask, Selection, SystemClock, ThreadId};
use crate::stack::{Frame, FrameRunner};
use crate::value::Value;
use crate::{VmError, VmResult};
use rustc_hash::FxHashMap;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Progress of the active run
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// The run completed; `true` on success
    Finished(bool),
    /// Work is queued, timed or awaited from an asynchronous operation
    Pending,
    /// Nothing is running and nothing will wake the VM
    Idle,
}

type DoneFn = Box<dyn FnOnce(bool)>;

struct ActiveRun {
    single_thread: bool,
    done: Option<DoneFn>,
    /// Threads running a top-level handler, keyed to the stack depth the
    /// handler frames sit above. An escape from those frames ends the run.
    toplevel_bases: FxHashMap<ThreadId, usize>,
}

/// Builder for [`Vm`]
pub struct VmBuilder {
    loader: LoaderRef,
    options: VmOptions,
    clock: Arc<dyn Clock>,
    input: Arc<dyn InputSource>,
    print: PrintFn,
    initial_stack: Vec<Value>,
    uncaught_handler: Option<Arc<dyn ToplevelHandler>>,
}

impl VmBuilder {
    /// Use these options
    pub fn options(mut self, options: VmOptions) -> Self {
        self.options = options;
        self
    }

    /// Use this clock for budgeting and timed wakeups
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Read guest input from `input`
    pub fn input(mut self, input: Arc<dyn InputSource>) -> Self {
        self.input = input;
        self
    }

    /// Send guest output to `print`
    pub fn print<F>(mut self, print: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.print = Arc::new(print);
        self
    }

    /// Seed the main thread's root frame with these operands
    pub fn initial_stack(mut self, values: Vec<Value>) -> Self {
        self.initial_stack = values;
        self
    }

    /// Attach `handler` to exceptions the runtime creates
    pub fn uncaught_handler(mut self, handler: Arc<dyn ToplevelHandler>) -> Self {
        self.uncaught_handler = Some(handler);
        self
    }

    /// Build the VM, taking a run stamp from `stamps`
    pub fn build(self, stamps: &RunStamps) -> Vm {
        let executor = Executor::new(Arc::clone(&self.clock));
        let budget = StepBudget::new(&self.options);
        let mut state = RuntimeState::new(
            stamps,
            self.loader,
            self.options,
            self.clock,
            executor.handle(),
            self.input,
            self.print,
            self.initial_stack,
        );
        if let Some(handler) = self.uncaught_handler {
            state.set_uncaught_handler(handler);
        }
        Vm {
            host: executor.handle(),
            state,
            executor,
            budget,
            run: None,
            last_outcome: None,
        }
    }
}

/// A VM instance: runtime state plus the host executor driving it
pub struct Vm {
    state: RuntimeState,
    executor: Executor,
    host: HostHandle,
    budget: StepBudget,
    run: Option<ActiveRun>,
    last_outcome: Option<bool>,
}

impl Vm {
    /// Start building a VM around `loader`
    pub fn builder(loader: LoaderRef) -> VmBuilder {
        VmBuilder {
            loader,
            options: VmOptions::default(),
            clock: Arc::new(SystemClock),
            input: Arc::new(NoInput),
            print: Arc::new(|text: &str| {
                let mut out = std::io::stdout();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
            }),
            initial_stack: Vec::new(),
            uncaught_handler: None,
        }
    }

    /// Runtime state
    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    /// Mutable runtime state
    pub fn state_mut(&mut self) -> &mut RuntimeState {
        &mut self.state
    }

    /// Current step budget
    pub fn step_budget(&self) -> u64 {
        self.budget.steps()
    }

    /// Posting handle of this VM's executor
    pub fn host(&self) -> HostHandle {
        self.host.clone()
    }

    /// Start a run
    ///
    /// `setup` runs first on the current thread (typically pushing the
    /// entry frame). `done` is called exactly once with the outcome. With
    /// `single_thread` the run completes as soon as the current thread
    /// finishes. Nothing executes until [`poll`](Self::poll) or
    /// [`run_to_completion`](Self::run_to_completion) drives the executor.
    pub fn run<S, D>(&mut self, setup: S, single_thread: bool, done: D) -> VmResult<()>
    where
        S: FnOnce(&mut RuntimeState) -> VmResult<()> + Send + 'static,
        D: FnOnce(bool) + 'static,
    {
        if self.run.is_some() {
            return Err(VmError::Internal("a run is already in progress".to_string()));
        }
        let current = self.state.current_thread();
        self.state.scheduler_mut().revive(current)?;
        self.run = Some(ActiveRun {
            single_thread,
            done: Some(Box::new(done)),
            toplevel_bases: FxHashMap::default(),
        });
        self.last_outcome = None;
        self.host.post(HostTask::Setup(Box::new(setup)));
        Ok(())
    }

    /// Run every task that is ready now
    pub fn poll(&mut self) -> RunStatus {
        while let Some(task) = self.executor.next_task() {
            self.handle(task);
            if let Some(success) = self.last_outcome {
                if self.run.is_none() {
                    return RunStatus::Finished(success);
                }
            }
        }
        if self.run.is_none() {
            return match self.last_outcome {
                Some(success) => RunStatus::Finished(success),
                None => RunStatus::Idle,
            };
        }
        if self.executor.has_pending() {
            RunStatus::Pending
        } else {
            RunStatus::Idle
        }
    }

    /// Drive the run until it finishes, waiting on timers and asynchronous
    /// operations as needed
    ///
    /// Returns `None` if the run stalls with nothing left to wake it.
    pub fn run_to_completion(&mut self) -> Option<bool> {
        loop {
            match self.poll() {
                RunStatus::Finished(success) => return Some(success),
                RunStatus::Idle => {
                    if self.run.is_some() {
                        error!(
                            run_stamp = self.state.run_stamp(),
                            "run stalled with no pending work"
                        );
                    }
                    return None;
                }
                RunStatus::Pending => {
                    if !self.executor.wait() {
                        return None;
                    }
                }
            }
        }
    }

    // ========================================================================
    // Task handling
    // ========================================================================

    fn handle(&mut self, task: HostTask) {
        if self.run.is_none() {
            debug!(?task, "dropping host task outside of a run");
            return;
        }
        match task {
            HostTask::Slice => self.slice(),
            HostTask::Setup(setup) => match setup(&mut self.state) {
                Ok(()) => self.slice(),
                Err(e) => self.handle_error(e),
            },
            HostTask::Resume { token, result } => {
                trace!(token, "resuming after asynchronous operation");
                match self.install_result(result) {
                    Ok(()) => self.slice(),
                    Err(e) => self.fail(e),
                }
            }
            HostTask::SelectThread => self.reselect(),
        }
    }

    fn install_result(&mut self, result: AsyncResult) -> VmResult<()> {
        let continuation = match result {
            AsyncResult::Success(ret) => {
                if ret.from_bytecode {
                    self.state.push_frame(Frame::synthetic(ASYNC_OP_FRAME));
                }
                Continuation::AsyncSuccess(ret)
            }
            AsyncResult::Failure(action) => {
                self.state.push_frame(Frame::synthetic(ASYNC_OP_FRAME));
                Continuation::AsyncFailure(action)
            }
        };
        let id = self.state.continuations.register(continuation);
        self.state.current_frame_mut()?.runner = Some(FrameRunner::Resume(id));
        Ok(())
    }

    /// One slice of the execution loop
    fn slice(&mut self) {
        let start = self.state.now();
        let mut remaining = self.budget.steps();
        trace!(
            run_stamp = self.state.run_stamp(),
            thread = %self.state.current_thread(),
            budget = remaining,
            "slice start"
        );
        loop {
            let runner = match self.state.current_frame() {
                Ok(frame) => frame.runner.clone(),
                Err(e) => return self.fail(e),
            };
            let runner = match runner {
                Some(runner) => runner,
                None => return self.thread_finished(),
            };
            if remaining == 0 {
                let elapsed = self.state.now().saturating_duration_since(start);
                if let Some(steps) = self.budget.observe(elapsed) {
                    debug!(steps, elapsed_ms = elapsed.as_millis() as u64, "step budget rescaled");
                }
                self.host.post(HostTask::Slice);
                return;
            }
            remaining -= 1;

            match execute_step(&mut self.state, runner) {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Return(values)) => {
                    if let Err(e) = self.state.return_values(values) {
                        return self.fail(e);
                    }
                }
                Ok(StepOutcome::Done) => {
                    if let Ok(frame) = self.state.current_frame_mut() {
                        frame.runner = None;
                    }
                }
                Ok(StepOutcome::ReturnControl) => {
                    self.host.post(HostTask::Slice);
                    return;
                }
                Ok(StepOutcome::Deferred) => return,
                Ok(StepOutcome::Suspend(suspension)) => {
                    let completion = self.state.new_completion();
                    trace!(token = completion.token(), "suspending for asynchronous operation");
                    suspension.start(&mut self.state, completion);
                    return;
                }
                Ok(StepOutcome::Raise(exception)) => return self.raise(exception),
                Err(e) => return self.handle_error(e),
            }
        }
    }

    fn handle_error(&mut self, e: VmError) {
        match e {
            VmError::Thrown(exception) => self.raise(*exception),
            other => self.fail(other),
        }
    }

    fn raise(&mut self, exception: GuestException) {
        let escaping = self.in_toplevel_handler();
        match unwind(&mut self.state, &exception) {
            Unwound::Caught { .. } => self.host.post(HostTask::Slice),
            Unwound::Uncaught => self.toplevel(exception, escaping),
        }
    }

    /// Whether the current thread is executing frames a top-level handler
    /// installed
    ///
    /// A stale entry (the handler frames already returned) is dropped.
    fn in_toplevel_handler(&mut self) -> bool {
        let thread = self.state.current_thread();
        let depth = self.state.current_stack().depth();
        let run = match self.run.as_mut() {
            Some(run) => run,
            None => return false,
        };
        match run.toplevel_bases.get(&thread) {
            Some(&base) if depth > base => true,
            Some(_) => {
                run.toplevel_bases.remove(&thread);
                false
            }
            None => false,
        }
    }

    fn toplevel(&mut self, exception: GuestException, escaping: bool) {
        self.state.unusual_termination = true;
        let handler = exception.toplevel().cloned().filter(|_| !escaping);
        match handler {
            Some(handler) => {
                let thread = self.state.current_thread();
                let base = self.state.current_stack().depth();
                if let Some(run) = self.run.as_mut() {
                    run.toplevel_bases.insert(thread, base);
                }
                debug!(thread = %thread, exception = %exception, "installing top-level handler");
                self.host.post(HostTask::Setup(Box::new(move |rt: &mut RuntimeState| {
                    handler.install(rt, &exception)
                })));
            }
            None => {
                error!(
                    run_stamp = self.state.run_stamp(),
                    thread = %self.state.current_thread(),
                    exception = %exception,
                    escaping,
                    "uncaught exception"
                );
                self.finish(false);
            }
        }
    }

    /// The current thread has no more work
    fn thread_finished(&mut self) {
        let single_thread = self.run.as_ref().map_or(true, |r| r.single_thread);
        let finished = self.state.current_thread();
        if let Some(run) = self.run.as_mut() {
            run.toplevel_bases.remove(&finished);
        }
        if let Err(e) = self.state.scheduler_mut().retire(finished) {
            return self.fail(e);
        }
        if single_thread || self.state.scheduler().live_count() == 0 {
            return self.finish(true);
        }
        self.reselect();
    }

    /// Select the next thread and continue under it
    fn reselect(&mut self) {
        let now = self.state.now();
        let current = self.state.current_thread();
        let current_alive = self
            .state
            .scheduler()
            .thread(current)
            .map_or(false, |t| t.is_alive());
        let selection = self.state.scheduler_mut().choose_next_thread(None, now);
        let switched = match selection {
            Selection::RetryAt(at) => {
                self.host.post_at(at, HostTask::SelectThread);
                return;
            }
            Selection::Chosen(next) if !current_alive => {
                self.state.scheduler_mut().set_current(next)
            }
            Selection::Chosen(next) | Selection::Fallback(next) if current_alive => {
                self.state.yield_to(next).map(|_| ())
            }
            Selection::Chosen(_) | Selection::Fallback(_) => {
                let live = self.state.scheduler().live_count();
                return self.fail(VmError::Deadlock(live));
            }
        };
        match switched {
            Ok(()) => self.host.post(HostTask::Slice),
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, e: VmError) {
        error!(
            run_stamp = self.state.run_stamp(),
            thread = %self.state.current_thread(),
            stack = ?self.state.current_stack(),
            error = %e,
            "fatal VM error"
        );
        self.finish(false);
    }

    fn finish(&mut self, success: bool) {
        debug!(run_stamp = self.state.run_stamp(), success, "run finished");
        self.last_outcome = Some(success);
        if let Some(mut run) = self.run.take() {
            if let Some(done) = run.done.take() {
                done(success);
            }
        }
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("state", &self.state)
            .field("executor", &self.executor)
            .field("budget", &self.budget.steps())
            .field("running", &self.run.is_some())
            .finish()
    }
}
