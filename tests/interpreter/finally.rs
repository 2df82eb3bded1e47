//! Finally blocks that run because of return() or throw(), including ones
//! that suspend with yield before the buffered completion is resumed

use super::{
    Trace, cleanup_task, create_test_vm, emit_log, emit_log_local, emit_yield, instantiate, next,
    next_with, ret, step, throw,
};
use genvm::{FunctionBuilder, GeneratorState, JsError, JsValue};

#[test]
fn test_yield_in_finally_during_return() {
    let task = cleanup_task();
    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &task, &[]);

    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(ret(&mut vm, &g, "cancelled"), step("cleanup", false));
    assert_eq!(vm.generator_state(&g), Some(GeneratorState::SuspendedYield));
    assert_eq!(next(&mut vm, &g), step("cancelled", true));
    assert_eq!(next(&mut vm, &g), step(JsValue::Undefined, true));
    assert_eq!(vm.stack_height(), 0);
}

#[test]
fn test_return_with_nothing_to_clean_up_finishes_immediately() {
    // function* g() { yield "working"; yield "more" }
    let mut b = FunctionBuilder::generator("g", &[]);
    emit_yield(&mut b, "working");
    emit_yield(&mut b, "more");
    let chunk = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &chunk, &[]);
    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(ret(&mut vm, &g, "cancelled"), step("cancelled", true));
    assert_eq!(vm.generator_state(&g), Some(GeneratorState::Completed));
}

#[test]
fn test_nested_finally_blocks_run_innermost_first() {
    // function* g() {
    //   try {
    //     try { yield "working" } finally { yield "inner-cleanup" }
    //   } finally { yield "outer-cleanup" }
    // }
    let mut b = FunctionBuilder::generator("g", &[]);
    b.try_finally(
        |b| {
            b.try_finally(
                |b| emit_yield(b, "working"),
                |b| emit_yield(b, "inner-cleanup"),
            );
        },
        |b| emit_yield(b, "outer-cleanup"),
    );
    let chunk = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &chunk, &[]);
    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(ret(&mut vm, &g, "cancelled"), step("inner-cleanup", false));
    assert_eq!(next(&mut vm, &g), step("outer-cleanup", false));
    assert_eq!(next(&mut vm, &g), step("cancelled", true));
}

#[test]
fn test_value_sent_into_finally_yield() {
    // function* g() {
    //   try { yield "working" }
    //   finally { const x = yield "cleanup-1"; log(x); yield "cleanup-2" }
    // }
    let mut b = FunctionBuilder::generator("g", &[]);
    b.try_finally(
        |b| emit_yield(b, "working"),
        |b| {
            b.push_str("cleanup-1");
            b.yield_();
            b.set_local("x");
            emit_log_local(b, "x");
            emit_yield(b, "cleanup-2");
        },
    );
    let chunk = b.finish().unwrap();

    let mut vm = create_test_vm();
    let trace = Trace::install(&mut vm);
    let g = instantiate(&mut vm, &chunk, &[]);
    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(ret(&mut vm, &g, "cancelled"), step("cleanup-1", false));
    assert_eq!(next_with(&mut vm, &g, "ack"), step("cleanup-2", false));
    assert_eq!(trace.entries(), vec!["ack"]);
    assert_eq!(next(&mut vm, &g), step("cancelled", true));
}

#[test]
fn test_finally_throwing_before_any_yield_fails_return() {
    // function* g() { try { yield "working" } finally { throw "cleanup failed" } }
    let mut b = FunctionBuilder::generator("g", &[]);
    b.try_finally(
        |b| emit_yield(b, "working"),
        |b| {
            b.push_str("cleanup failed");
            b.throw();
        },
    );
    let chunk = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &chunk, &[]);
    assert_eq!(next(&mut vm, &g), step("working", false));
    let err = vm.generator_return(&g, JsValue::from("cancelled")).unwrap_err();
    assert_eq!(err.thrown_value(), Some(&JsValue::from("cleanup failed")));
    assert_eq!(vm.generator_state(&g), Some(GeneratorState::Completed));
    assert_eq!(next(&mut vm, &g), step(JsValue::Undefined, true));
}

#[test]
fn test_finally_throwing_after_a_yield_fails_next() {
    // function* g() {
    //   try { yield "working" } finally { yield "cleanup"; throw "cleanup failed" }
    // }
    let mut b = FunctionBuilder::generator("g", &[]);
    b.try_finally(
        |b| emit_yield(b, "working"),
        |b| {
            emit_yield(b, "cleanup");
            b.push_str("cleanup failed");
            b.throw();
        },
    );
    let chunk = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &chunk, &[]);
    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(ret(&mut vm, &g, "cancelled"), step("cleanup", false));
    let err = vm.generator_next(&g, JsValue::Undefined).unwrap_err();
    assert_eq!(err.thrown_value(), Some(&JsValue::from("cleanup failed")));
    assert_eq!(vm.generator_state(&g), Some(GeneratorState::Completed));
}

#[test]
fn test_throw_from_inner_finally_still_runs_outer_finally() {
    // function* g() {
    //   try {
    //     try { yield "working" } finally { throw "inner failed" }
    //   } finally { log("outer") }
    // }
    let mut b = FunctionBuilder::generator("g", &[]);
    b.try_finally(
        |b| {
            b.try_finally(
                |b| emit_yield(b, "working"),
                |b| {
                    b.push_str("inner failed");
                    b.throw();
                },
            );
        },
        |b| emit_log(b, "outer"),
    );
    let chunk = b.finish().unwrap();

    let mut vm = create_test_vm();
    let trace = Trace::install(&mut vm);
    let g = instantiate(&mut vm, &chunk, &[]);
    assert_eq!(next(&mut vm, &g), step("working", false));
    let err = vm.generator_return(&g, JsValue::from("cancelled")).unwrap_err();
    assert_eq!(err.thrown_value(), Some(&JsValue::from("inner failed")));
    assert_eq!(trace.entries(), vec!["outer"]);
}

#[test]
fn test_return_inside_finally_overrides_pending_return() {
    // function* g() { try { yield "working" } finally { return "cleanup-override" } }
    let mut b = FunctionBuilder::generator("g", &[]);
    b.try_finally(
        |b| emit_yield(b, "working"),
        |b| {
            b.push_str("cleanup-override");
            b.ret();
        },
    );
    let chunk = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &chunk, &[]);
    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(
        ret(&mut vm, &g, "cancelled"),
        step("cleanup-override", true)
    );
}

#[test]
fn test_return_inside_finally_overrides_pending_throw() {
    let mut b = FunctionBuilder::generator("g", &[]);
    b.try_finally(
        |b| emit_yield(b, "working"),
        |b| {
            emit_yield(b, "cleanup");
            b.push_str("swallowed");
            b.ret();
        },
    );
    let chunk = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &chunk, &[]);
    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(throw(&mut vm, &g, "boom"), step("cleanup", false));
    assert_eq!(next(&mut vm, &g), step("swallowed", true));
}

#[test]
fn test_yield_star_inside_finally() {
    // function* cleanupSteps() { yield "cleanup-1"; yield "cleanup-2" }
    // function* task() { try { yield "working" } finally { yield* cleanupSteps() } }
    let mut steps = FunctionBuilder::generator("cleanupSteps", &[]);
    emit_yield(&mut steps, "cleanup-1");
    emit_yield(&mut steps, "cleanup-2");
    let steps = steps.finish().unwrap();

    let mut b = FunctionBuilder::generator("task", &[]);
    b.try_finally(
        |b| emit_yield(b, "working"),
        |b| {
            b.make_closure(steps);
            b.call(0);
            b.yield_star();
            b.pop();
        },
    );
    let task = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &task, &[]);
    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(ret(&mut vm, &g, "cancelled"), step("cleanup-1", false));
    assert_eq!(next(&mut vm, &g), step("cleanup-2", false));
    assert_eq!(next(&mut vm, &g), step("cancelled", true));
}

#[test]
fn test_throw_runs_finally_then_rethrows() {
    let task = cleanup_task();
    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &task, &[]);

    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(throw(&mut vm, &g, "boom"), step("cleanup", false));
    let err = vm.generator_next(&g, JsValue::Undefined).unwrap_err();
    assert!(matches!(err, JsError::Thrown(ref v) if *v == JsValue::from("boom")));
    assert_eq!(vm.generator_state(&g), Some(GeneratorState::Completed));
}

#[test]
fn test_catch_then_finally_after_throw() {
    // function* g() {
    //   try { yield "working" }
    //   catch (e) { log(e); yield "recovered" }
    //   finally { log("finally") }
    // }
    let mut b = FunctionBuilder::generator("g", &[]);
    b.try_catch_finally(
        |b| emit_yield(b, "working"),
        |b| {
            b.set_local("e");
            emit_log_local(b, "e");
            emit_yield(b, "recovered");
        },
        |b| emit_log(b, "finally"),
    );
    let chunk = b.finish().unwrap();

    let mut vm = create_test_vm();
    let trace = Trace::install(&mut vm);
    let g = instantiate(&mut vm, &chunk, &[]);
    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(throw(&mut vm, &g, "boom"), step("recovered", false));
    assert_eq!(trace.entries(), vec!["boom"]);
    assert_eq!(next(&mut vm, &g), step(JsValue::Undefined, true));
    assert_eq!(trace.entries(), vec!["boom", "finally"]);
}

#[test]
fn test_return_while_suspended_in_catch_runs_finally() {
    let mut b = FunctionBuilder::generator("g", &[]);
    b.try_catch_finally(
        |b| emit_yield(b, "working"),
        |b| {
            b.pop();
            emit_yield(b, "in catch");
        },
        |b| emit_yield(b, "cleanup"),
    );
    let chunk = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &chunk, &[]);
    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(throw(&mut vm, &g, "boom"), step("in catch", false));
    assert_eq!(ret(&mut vm, &g, "cancelled"), step("cleanup", false));
    assert_eq!(next(&mut vm, &g), step("cancelled", true));
}

#[test]
fn test_normal_exit_through_yielding_finally() {
    let task = cleanup_task();
    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &task, &[]);

    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(next(&mut vm, &g), step("cleanup", false));
    assert_eq!(next(&mut vm, &g), step(JsValue::Undefined, true));
}

#[test]
fn test_second_return_while_cleaning_up_replaces_the_first() {
    let task = cleanup_task();
    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &task, &[]);

    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(ret(&mut vm, &g, "first"), step("cleanup", false));
    // The finally block has already started, so the new return leaves it
    assert_eq!(ret(&mut vm, &g, "second"), step("second", true));
}
