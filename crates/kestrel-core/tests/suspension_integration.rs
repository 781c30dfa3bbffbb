//! Integration tests for the suspension protocol
//!
//! Tests cover:
//! - Bytecode-started operations resuming past their instruction
//! - Native frames receiving asynchronous results
//! - Failure actions raising into the suspended frame
//! - Completions resolved from another OS thread
//! - Buffered guest input

mod common;

use common::{entries, harness, harness_from, new_log, ops, Op, Script};
use kestrel_core::vm::Deliver;
use kestrel_core::{
    AsyncReturn, FailureAction, InputSource, RuntimeState, StepOutcome, Suspension, VmResult,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_bytecode_result_lands_past_instruction() {
    let mut h = harness();
    let log = new_log();
    let main = Script::build("Main::main()V")
        .op(ops::nop())
        .op(ops::suspend(2, |completion| {
            completion.succeed(AsyncReturn::bytecode().value(7).value(8));
        }))
        .op(ops::record_depth(&log))
        .op(ops::record_top(&log))
        .op(ops::pop())
        .op(ops::record_top(&log))
        .op(ops::ret())
        .finish();

    assert_eq!(h.run_main(main), Some(true));
    assert_eq!(entries(&log), vec!["depth=2", "8", "7"]);
}

#[test]
fn test_native_result_goes_to_caller() {
    let mut h = harness();
    let log = new_log();
    let read = ops::call_native("read", |_: &mut RuntimeState| -> VmResult<StepOutcome> {
        Ok(StepOutcome::Suspend(Suspension::new(|_, completion| {
            completion.succeed(AsyncReturn::native().value(42));
        })))
    });
    let main = Script::build("Main::main()V")
        .op(read)
        .op(ops::record_depth(&log))
        .op(ops::record_top(&log))
        .op(ops::ret())
        .finish();

    assert_eq!(h.run_main(main), Some(true));
    assert_eq!(entries(&log), vec!["depth=2", "42"]);
}

#[test]
fn test_failure_raises_in_suspended_frame() {
    let mut h = harness();
    let log = new_log();
    let main = Script::build("Main::main()V")
        .op(ops::suspend(2, |completion| {
            completion.fail(FailureAction::throw_new("LIoFailure;", "disk gone"));
        }))
        .op(ops::record(&log, "skipped"))
        .op(ops::record_depth(&log))
        .op(ops::ret())
        .catch(0..1, 2, Some("LIoFailure;"))
        .finish();

    assert_eq!(h.run_main(main), Some(true));
    assert_eq!(entries(&log), vec!["depth=2"]);
}

#[test]
fn test_uncaught_failure_ends_run() {
    let mut h = harness();
    let main = Script::build("Main::main()V")
        .op(ops::suspend(2, |completion| {
            completion.fail(FailureAction::throw_new("LIoFailure;", "disk gone"));
        }))
        .op(ops::ret())
        .finish();

    assert_eq!(h.run_main(main), Some(false));
    assert_eq!(h.vm.state().current_stack().depth(), 1);
}

#[test]
fn test_completion_from_another_thread() {
    let mut h = harness();
    let log = new_log();
    let main = Script::build("Main::main()V")
        .op(ops::suspend(2, |completion| {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                completion.succeed(AsyncReturn::bytecode().value(5));
            });
        }))
        .op(ops::record_top(&log))
        .op(ops::ret())
        .finish();

    assert_eq!(h.run_main(main), Some(true));
    assert_eq!(entries(&log), vec!["5"]);
}

#[test]
fn test_dropped_completion_stalls_run() {
    let mut h = harness();
    let main = Script::build("Main::main()V")
        .op(ops::suspend(2, drop))
        .op(ops::ret())
        .finish();

    assert_eq!(h.run_main(main), None);
}

struct ChunkSource {
    chunk: Vec<u8>,
    calls: AtomicUsize,
}

impl InputSource for ChunkSource {
    fn read(&self, deliver: Deliver) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        deliver(self.chunk.clone());
    }
}

fn chunk_source(chunk: &[u8]) -> Arc<ChunkSource> {
    Arc::new(ChunkSource {
        chunk: chunk.to_vec(),
        calls: AtomicUsize::new(0),
    })
}

fn read_now(rt: &RuntimeState, n: usize) -> Vec<u8> {
    let out = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&out);
    rt.async_input(n, move |data| *sink.lock() = data);
    let data = out.lock().clone();
    data
}

#[test]
fn test_buffered_input_served_first() {
    let source = chunk_source(b"abcdef");
    let input = Arc::clone(&source);
    let h = harness_from(move |builder| builder.input(input));
    let rt = h.vm.state();
    rt.input_buffer().extend(b"0123456789");

    assert_eq!(read_now(rt, 4), b"0123");
    assert_eq!(rt.input_buffer().len(), 6);
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);

    assert_eq!(read_now(rt, 10), b"456789");
    assert!(rt.input_buffer().is_empty());

    // Empty buffer: the source is asked and the surplus is kept
    assert_eq!(read_now(rt, 2), b"ab");
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(rt.input_buffer().len(), 4);
}

#[test]
fn test_input_read_inside_suspension() {
    let source = chunk_source(b"hello world");
    let input = Arc::clone(&source);
    let mut h = harness_from(move |builder| builder.input(input));
    let log = new_log();
    let read = Op::new(2, |_| {
        Ok(StepOutcome::Suspend(Suspension::new(|rt, completion| {
            rt.async_input(5, move |data| {
                completion.succeed(AsyncReturn::bytecode().value(data.len() as i32));
            });
        })))
    });
    let main = Script::build("Main::main()V")
        .op(read)
        .op(ops::record_top(&log))
        .op(ops::ret())
        .finish();

    assert_eq!(h.run_main(main), Some(true));
    assert_eq!(entries(&log), vec!["5"]);
    assert_eq!(h.vm.state().input_buffer().len(), 6);
}
