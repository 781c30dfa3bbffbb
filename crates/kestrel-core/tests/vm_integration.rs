//! Integration tests for the execution loop
//!
//! Tests cover:
//! - Runs finishing through the done callback
//! - Adaptive step budget driven by a manual clock
//! - Fatal errors and bootstrap returns
//! - Runtime-owned state (strings, arguments, memory blocks, output)

mod common;

use common::{entries, harness, harness_with, new_log, ops, Script};
use kestrel_core::strings::read_string;
use kestrel_core::{
    Frame, FrameRunner, RuntimeState, StepOutcome, ThreadId, ThreadState, Value, VmError,
    VmOptions, VmResult,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_simple_run_returns_to_bootstrap() {
    let mut h = harness();
    let main = Script::build("Main::main()I")
        .op(ops::push(Value::i32(42)))
        .op(ops::ret_top())
        .finish();

    assert_eq!(h.run_main(main), Some(true));

    let state = h.vm.state();
    assert_eq!(state.current_stack().depth(), 1);
    assert_eq!(state.current_stack().current().unwrap().stack, vec![Value::i32(42)]);
    assert!(state.scheduler().pool().is_empty());
    assert_eq!(state.thread_state(ThreadId::from_u64(1)).unwrap(), ThreadState::Dead);
    assert!(!state.unusual_termination());
}

#[test]
fn test_done_outcome_finishes_thread_without_popping() {
    let mut h = harness();
    let main = Script::build("Main::main()V").op(ops::done()).finish();

    assert_eq!(h.run_main(main), Some(true));
    let top = h.vm.state().current_stack().current().unwrap();
    assert_eq!(top.name(), "Main::main()V");
    assert!(!top.has_runner());
}

#[test]
fn test_fatal_error_reports_failure() {
    let mut h = harness();
    let main = Script::build("Main::main()V").op(ops::fail()).finish();
    assert_eq!(h.run_main(main), Some(false));
}

#[test]
fn test_root_frame_cannot_return() {
    let mut h = harness();
    let result = h.run_with(|rt| {
        let step = |_: &mut RuntimeState| -> VmResult<StepOutcome> {
            Ok(StepOutcome::Return(Vec::new()))
        };
        rt.current_frame_mut()?.runner = Some(FrameRunner::Native(Arc::new(step)));
        Ok(())
    });
    assert_eq!(result, Some(false));
}

#[test]
fn test_setup_error_fails_run() {
    let mut h = harness();
    let result = h.run_with(|_| Err(VmError::Internal("setup refused".to_string())));
    assert_eq!(result, Some(false));
}

#[test]
fn test_second_run_rejected_while_active() {
    let mut h = harness();
    let main = Script::build("Main::main()V").op(ops::ret()).finish();
    h.vm
        .run(
            move |rt| {
                rt.push_frame(Frame::new(main, Vec::new(), Vec::new()));
                Ok(())
            },
            false,
            |_| {},
        )
        .unwrap();

    let again = h.vm.run(|_| Ok(()), false, |_| {});
    assert!(matches!(again, Err(VmError::Internal(_))));
    assert_eq!(h.vm.run_to_completion(), Some(true));
}

#[test]
fn test_vm_runs_again_after_finishing() {
    let mut h = harness();
    let log = new_log();
    let first = Script::build("Main::first()V")
        .op(ops::record(&log, "first"))
        .op(ops::ret())
        .finish();
    let second = Script::build("Main::second()V")
        .op(ops::record(&log, "second"))
        .op(ops::ret())
        .finish();

    assert_eq!(h.run_main(first), Some(true));
    assert_eq!(h.run_main(second), Some(true));
    assert_eq!(entries(&log), vec!["first", "second"]);
}

#[test]
fn test_slow_slice_shrinks_budget() {
    let mut h = harness_with(VmOptions {
        initial_step_budget: 4,
        ..VmOptions::default()
    });
    let clock = Arc::clone(&h.clock);
    // Four 1 s steps blow the window, so the budget drops to one step per slice
    let main = Script::build("Main::slow()V")
        .ops((0..8).map(|_| ops::tick(&clock, Duration::from_secs(1))))
        .op(ops::ret())
        .finish();

    assert_eq!(h.run_main(main), Some(true));
    assert_eq!(h.vm.step_budget(), 1);
    assert_eq!(h.clock.elapsed(), Duration::from_secs(8));
}

#[test]
fn test_instant_slices_double_budget() {
    let mut h = harness_with(VmOptions {
        initial_step_budget: 2,
        ..VmOptions::default()
    });
    let main = Script::build("Main::fast()V")
        .ops((0..10).map(|_| ops::nop()))
        .op(ops::ret())
        .finish();

    assert_eq!(h.run_main(main), Some(true));
    // 2 then 4 steps exhaust their slices; the third slice finishes the method
    assert_eq!(h.vm.step_budget(), 8);
}

#[test]
fn test_slice_inside_window_keeps_budget() {
    let mut h = harness_with(VmOptions {
        initial_step_budget: 3,
        ..VmOptions::default()
    });
    let clock = Arc::clone(&h.clock);
    let main = Script::build("Main::steady()V")
        .ops((0..6).map(|_| ops::tick(&clock, Duration::from_millis(500))))
        .op(ops::ret())
        .finish();

    assert_eq!(h.run_main(main), Some(true));
    assert_eq!(h.vm.step_budget(), 3);
}

#[test]
fn test_interned_strings_share_identity() {
    let mut h = harness();
    let rt = h.vm.state_mut();

    let a = rt.init_string("hello", true).unwrap();
    let b = rt.init_string("hello", true).unwrap();
    let c = rt.init_string("hello", false).unwrap();

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(rt.strings().len(), 1);
    assert_eq!(read_string(rt.heap(), c).as_deref(), Some("hello"));
}

#[test]
fn test_init_args_seeds_root_frame() {
    let mut h = harness();
    let rt = h.vm.state_mut();
    rt.init_args(&["-v", "input.txt"]).unwrap();

    let stack = rt.current_stack();
    assert_eq!(stack.depth(), 1);
    let root = stack.current().unwrap();
    assert_eq!(root.stack.len(), 1);

    let array = root.stack[0].as_object().unwrap();
    let elements = rt.heap().array(array).unwrap();
    assert_eq!(elements.len(), 2);
    let second = elements[1].as_object().unwrap();
    assert_eq!(read_string(rt.heap(), second).as_deref(), Some("input.txt"));
    assert_eq!(rt.heap().get(array).unwrap().class().name(), "[Ljava/lang/String;");
}

#[test]
fn test_new_array_zero_fills() {
    let mut h = harness();
    let rt = h.vm.state_mut();
    let ints = rt.new_array("I", 3).unwrap();
    let longs = rt.new_array("J", 2).unwrap();
    let objects = rt.new_array("Ljava/lang/Object;", 1).unwrap();

    assert_eq!(rt.heap().array(ints).unwrap(), &[Value::i32(0); 3][..]);
    assert_eq!(rt.heap().array(longs).unwrap(), &[Value::i64(0); 2][..]);
    assert_eq!(rt.heap().array(objects).unwrap(), &[Value::Null][..]);
    assert_eq!(rt.heap().get(objects).unwrap().class().name(), "[Ljava/lang/Object;");
}

#[test]
fn test_memory_blocks_resolve_interior_addresses() {
    let mut h = harness();
    let rt = h.vm.state_mut();
    let first = rt.memory_mut().allocate(16);
    let second = rt.memory_mut().allocate(8);

    assert_eq!(rt.block_addr(first + 15).unwrap(), first);
    assert_eq!(rt.block_addr(second).unwrap(), second);
    assert!(matches!(rt.block_addr(second + 8), Err(VmError::InvalidMemoryAccess(_))));

    assert_eq!(rt.memory_mut().free(first).unwrap(), 16);
    assert!(rt.block_addr(first).is_err());
}

#[test]
fn test_print_goes_to_host_sink() {
    let mut h = harness();
    h.vm.state().print("hello ");
    h.vm.state().print("world");
    assert_eq!(entries(&h.output).concat(), "hello world");
}

#[test]
fn test_run_stamps_differ_per_instance() {
    let stamps = kestrel_core::RunStamps::new();
    let loader = common::Loader::new("bootstrap");
    let a = kestrel_core::Vm::builder(loader.clone()).build(&stamps);
    let b = kestrel_core::Vm::builder(loader).build(&stamps);
    assert!(b.state().run_stamp() > a.state().run_stamp());
}
