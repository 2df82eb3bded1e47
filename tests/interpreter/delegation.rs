//! yield* delegation tests

use std::rc::Rc;

use super::{
    Trace, create_test_vm, emit_log, emit_log_local, emit_yield, instantiate, next, next_with,
    ret, step, strings, throw,
};
use genvm::value::JsObject;
use genvm::{
    FunctionBuilder, FunctionChunk, GeneratorState, IterResult, JsError, JsString, JsValue, Op, Vm,
    VmConfig,
};

/// `order.push(name)`
fn emit_order(b: &mut FunctionBuilder, name: &str) {
    b.get_global("order");
    b.push_str(name);
    b.call_method("push", 1);
    b.pop();
}

/// function* inner() { yield "a"; yield "b"; return "inner-result" }
fn abc_inner() -> Rc<FunctionChunk> {
    let mut b = FunctionBuilder::generator("inner", &[]);
    emit_yield(&mut b, "a");
    emit_yield(&mut b, "b");
    b.push_str("inner-result");
    b.ret();
    b.finish().unwrap()
}

#[test]
fn test_yield_star_forwards_values_and_result() {
    // function* outer() { const r = yield* inner(); log(r); yield "c" }
    let mut b = FunctionBuilder::generator("outer", &[]);
    b.make_closure(abc_inner());
    b.call(0);
    b.yield_star();
    b.set_local("r");
    emit_log_local(&mut b, "r");
    emit_yield(&mut b, "c");
    let outer = b.finish().unwrap();

    let mut vm = create_test_vm();
    let trace = Trace::install(&mut vm);
    let g = instantiate(&mut vm, &outer, &[]);
    assert_eq!(next(&mut vm, &g), step("a", false));
    assert_eq!(next(&mut vm, &g), step("b", false));
    assert!(trace.entries().is_empty());
    assert_eq!(next(&mut vm, &g), step("c", false));
    assert_eq!(trace.entries(), vec!["inner-result"]);
    assert_eq!(next(&mut vm, &g), step(JsValue::Undefined, true));
}

#[test]
fn test_next_values_reach_the_inner_generator() {
    // function* inner() { const x = yield "ready"; return x }
    // function* outer() { return yield* inner() }
    let mut inner = FunctionBuilder::generator("inner", &[]);
    inner.push_str("ready");
    inner.yield_();
    inner.ret();
    let inner = inner.finish().unwrap();

    let mut b = FunctionBuilder::generator("outer", &[]);
    b.make_closure(inner);
    b.call(0);
    b.yield_star();
    b.ret();
    let outer = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &outer, &[]);
    assert_eq!(next(&mut vm, &g), step("ready", false));
    assert_eq!(next_with(&mut vm, &g, "sent"), step("sent", true));
}

#[test]
fn test_return_closes_inner_before_outer() {
    // const order = [];
    // function* inner() { try { yield 1; yield 2 } finally { order.push("inner") } }
    // function* outer() { try { yield* inner() } finally { order.push("outer") } }
    let mut inner = FunctionBuilder::generator("inner", &[]);
    inner.try_finally(
        |b| {
            b.push_int(1);
            b.yield_();
            b.pop();
            b.push_int(2);
            b.yield_();
            b.pop();
        },
        |b| emit_order(b, "inner"),
    );
    let inner = inner.finish().unwrap();

    let mut b = FunctionBuilder::generator("outer", &[]);
    b.try_finally(
        |b| {
            b.make_closure(inner);
            b.call(0);
            b.yield_star();
            b.pop();
        },
        |b| emit_order(b, "outer"),
    );
    let outer = b.finish().unwrap();

    let mut vm = create_test_vm();
    vm.set_global("order", JsValue::array(Vec::new()));
    let g = instantiate(&mut vm, &outer, &[]);
    assert_eq!(next(&mut vm, &g), step(1, false));
    assert_eq!(ret(&mut vm, &g, "cancelled"), step("cancelled", true));

    let order = vm.get_global("order").unwrap();
    assert_eq!(order.to_js_string().as_str(), "inner,outer");
    assert_eq!(strings(Some(order)), vec!["inner", "outer"]);
}

#[test]
fn test_inner_cleanup_yields_during_forwarded_return() {
    // function* inner() { try { yield "working" } finally { yield "inner-cleanup" } }
    // function* outer() { try { yield* inner() } finally { log("outer") } }
    let mut inner = FunctionBuilder::generator("inner", &[]);
    inner.try_finally(
        |b| emit_yield(b, "working"),
        |b| emit_yield(b, "inner-cleanup"),
    );
    let inner = inner.finish().unwrap();

    let mut b = FunctionBuilder::generator("outer", &[]);
    b.try_finally(
        |b| {
            b.make_closure(inner);
            b.call(0);
            b.yield_star();
            b.pop();
        },
        |b| emit_log(b, "outer"),
    );
    let outer = b.finish().unwrap();

    let mut vm = create_test_vm();
    let trace = Trace::install(&mut vm);
    let g = instantiate(&mut vm, &outer, &[]);
    assert_eq!(next(&mut vm, &g), step("working", false));
    assert_eq!(ret(&mut vm, &g, "cancelled"), step("inner-cleanup", false));
    assert!(trace.entries().is_empty());
    assert_eq!(vm.generator_state(&g), Some(GeneratorState::SuspendedYield));
    assert_eq!(next(&mut vm, &g), step("cancelled", true));
    assert_eq!(trace.entries(), vec!["outer"]);
}

#[test]
fn test_three_levels_close_innermost_first() {
    let mut level3 = FunctionBuilder::generator("level3", &[]);
    level3.try_finally(|b| emit_yield(b, "deep"), |b| emit_log(b, "level3"));
    let level3 = level3.finish().unwrap();

    let mut level2 = FunctionBuilder::generator("level2", &[]);
    level2.try_finally(
        |b| {
            b.make_closure(level3);
            b.call(0);
            b.yield_star();
            b.pop();
        },
        |b| emit_log(b, "level2"),
    );
    let level2 = level2.finish().unwrap();

    let mut level1 = FunctionBuilder::generator("level1", &[]);
    level1.try_finally(
        |b| {
            b.make_closure(level2);
            b.call(0);
            b.yield_star();
            b.pop();
        },
        |b| emit_log(b, "level1"),
    );
    let level1 = level1.finish().unwrap();

    let mut vm = create_test_vm();
    let trace = Trace::install(&mut vm);
    let g = instantiate(&mut vm, &level1, &[]);
    assert_eq!(next(&mut vm, &g), step("deep", false));
    assert_eq!(ret(&mut vm, &g, "cancelled"), step("cancelled", true));
    assert_eq!(trace.entries(), vec!["level3", "level2", "level1"]);
    assert_eq!(vm.stack_height(), 0);
}

#[test]
fn test_return_with_array_inner_skips_to_outer_cleanup() {
    // function* outer() { try { yield* ["a", "b"] } finally { log("outer") } }
    let mut b = FunctionBuilder::generator("outer", &[]);
    b.try_finally(
        |b| {
            b.push_str("a");
            b.push_str("b");
            b.new_array(2);
            b.yield_star();
            b.pop();
        },
        |b| emit_log(b, "outer"),
    );
    let outer = b.finish().unwrap();

    let mut vm = create_test_vm();
    let trace = Trace::install(&mut vm);
    let g = instantiate(&mut vm, &outer, &[]);
    assert_eq!(next(&mut vm, &g), step("a", false));
    assert_eq!(ret(&mut vm, &g, "stop"), step("stop", true));
    assert_eq!(trace.entries(), vec!["outer"]);
}

#[test]
fn test_array_delegation_runs_to_completion() {
    // function* outer() { const r = yield* [1, 2]; yield r === undefined }
    let mut b = FunctionBuilder::generator("outer", &[]);
    b.push_int(1);
    b.push_int(2);
    b.new_array(2);
    b.yield_star();
    b.push_undefined();
    b.emit(Op::StrictEq);
    b.yield_();
    b.pop();
    let outer = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &outer, &[]);
    assert_eq!(next(&mut vm, &g), step(1, false));
    assert_eq!(next(&mut vm, &g), step(2, false));
    assert_eq!(next(&mut vm, &g), step(true, false));
    assert_eq!(next(&mut vm, &g), step(JsValue::Undefined, true));
}

#[test]
fn test_throw_is_forwarded_to_inner_generator() {
    // function* inner() { try { yield "a" } catch (e) { yield "caught " + e } }
    // function* outer() { yield* inner(); yield "after" }
    let mut inner = FunctionBuilder::generator("inner", &[]);
    inner.try_catch(
        |b| emit_yield(b, "a"),
        |b| {
            b.set_local("e");
            b.push_str("caught ");
            b.get_local("e");
            b.emit(Op::Add);
            b.yield_();
            b.pop();
        },
    );
    let inner = inner.finish().unwrap();

    let mut b = FunctionBuilder::generator("outer", &[]);
    b.make_closure(inner);
    b.call(0);
    b.yield_star();
    b.pop();
    emit_yield(&mut b, "after");
    let outer = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &outer, &[]);
    assert_eq!(next(&mut vm, &g), step("a", false));
    assert_eq!(throw(&mut vm, &g, "x"), step("caught x", false));
    assert_eq!(next(&mut vm, &g), step("after", false));
}

#[test]
fn test_throw_without_inner_throw_method_closes_inner() {
    // const it = { next() { return { value: "tick", done: false } }, return() { log("closed") } };
    // function* outer() { try { yield* it } catch (e) { yield e.message } }
    let mut vm = create_test_vm();
    let trace = Trace::install(&mut vm);

    let sink = trace.clone();
    let mut it = JsObject::ordinary();
    it.set(
        JsString::from("next"),
        JsValue::native("next", |_vm, _this, _args| {
            Ok(IterResult::yielded(JsValue::from("tick")).to_value())
        }),
    );
    it.set(
        JsString::from("return"),
        JsValue::native("return", move |_vm, _this, _args| {
            sink.push("closed");
            Ok(IterResult::done(JsValue::Undefined).to_value())
        }),
    );
    vm.set_global("it", JsValue::object(it));

    let mut b = FunctionBuilder::generator("outer", &[]);
    b.try_catch(
        |b| {
            b.get_global("it");
            b.yield_star();
            b.pop();
        },
        |b| {
            b.get_prop("message");
            b.yield_();
            b.pop();
        },
    );
    let outer = b.finish().unwrap();

    let g = instantiate(&mut vm, &outer, &[]);
    assert_eq!(next(&mut vm, &g), step("tick", false));
    assert_eq!(next(&mut vm, &g), step("tick", false));
    assert_eq!(
        throw(&mut vm, &g, "x"),
        step("The iterator does not provide a 'throw' method", false)
    );
    assert_eq!(trace.entries(), vec!["closed"]);
}

#[test]
fn test_custom_iterator_return_result_completes_outer() {
    // next() yields "tick" forever, return(v) answers { value: "closed:" + v, done: true }
    let mut vm = create_test_vm();
    let mut it = JsObject::ordinary();
    it.set(
        JsString::from("next"),
        JsValue::native("next", |_vm, _this, _args| {
            Ok(IterResult::yielded(JsValue::from("tick")).to_value())
        }),
    );
    it.set(
        JsString::from("return"),
        JsValue::native("return", |_vm, _this, args| {
            let value = args.first().cloned().unwrap_or_default();
            Ok(IterResult::done(JsValue::from(format!("closed:{}", value))).to_value())
        }),
    );
    vm.set_global("it", JsValue::object(it));

    let mut b = FunctionBuilder::generator("outer", &[]);
    b.get_global("it");
    b.yield_star();
    b.pop();
    emit_yield(&mut b, "unreachable");
    let outer = b.finish().unwrap();

    let g = instantiate(&mut vm, &outer, &[]);
    assert_eq!(next(&mut vm, &g), step("tick", false));
    assert_eq!(ret(&mut vm, &g, "stop"), step("closed:stop", true));
    assert_eq!(vm.generator_state(&g), Some(GeneratorState::Completed));
}

#[test]
fn test_throw_into_array_delegation_is_a_type_error() {
    // function* outer() { yield* [1, 2] }
    let mut b = FunctionBuilder::generator("outer", &[]);
    b.push_int(1);
    b.push_int(2);
    b.new_array(2);
    b.yield_star();
    b.pop();
    let outer = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &outer, &[]);
    assert_eq!(next(&mut vm, &g), step(1, false));
    let err = vm.generator_throw(&g, JsValue::from("x")).unwrap_err();
    assert!(matches!(err, JsError::TypeError { .. }));
    assert_eq!(vm.generator_state(&g), Some(GeneratorState::Completed));
}

#[test]
fn test_yield_star_on_non_iterable_throws_at_delegation_point() {
    // function* outer() { try { yield* 42 } catch (e) { yield e.message } }
    let mut b = FunctionBuilder::generator("outer", &[]);
    b.try_catch(
        |b| {
            b.push_int(42);
            b.yield_star();
            b.pop();
        },
        |b| {
            b.get_prop("message");
            b.yield_();
            b.pop();
        },
    );
    let outer = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &outer, &[]);
    assert_eq!(next(&mut vm, &g), step("42 is not iterable", false));
}

#[test]
fn test_inner_failure_surfaces_in_outer_catch() {
    // function* inner() { yield 1; throw "inner failed" }
    // function* outer() { try { yield* inner() } catch (e) { yield "outer caught " + e } }
    let mut inner = FunctionBuilder::generator("inner", &[]);
    inner.push_int(1);
    inner.yield_();
    inner.pop();
    inner.push_str("inner failed");
    inner.throw();
    let inner = inner.finish().unwrap();

    let mut b = FunctionBuilder::generator("outer", &[]);
    b.try_catch(
        |b| {
            b.make_closure(inner);
            b.call(0);
            b.yield_star();
            b.pop();
        },
        |b| {
            b.set_local("e");
            b.push_str("outer caught ");
            b.get_local("e");
            b.emit(Op::Add);
            b.yield_();
            b.pop();
        },
    );
    let outer = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &outer, &[]);
    assert_eq!(next(&mut vm, &g), step(1, false));
    assert_eq!(
        next(&mut vm, &g),
        step("outer caught inner failed", false)
    );
}

#[test]
fn test_delegation_to_running_generator_is_a_type_error() {
    // function* outer() { try { yield* self } catch (e) { yield e.message } }
    let mut b = FunctionBuilder::generator("outer", &[]);
    b.try_catch(
        |b| {
            b.get_global("self");
            b.yield_star();
            b.pop();
        },
        |b| {
            b.get_prop("message");
            b.yield_();
            b.pop();
        },
    );
    let outer = b.finish().unwrap();

    let mut vm = create_test_vm();
    let g = instantiate(&mut vm, &outer, &[]);
    vm.set_global("self", g.clone());
    assert_eq!(
        next(&mut vm, &g),
        step("Generator is already running", false)
    );
}

/// function* r(n) { if (0 < n) { return yield* r(n - 1) } yield "leaf" }
fn recursive() -> Rc<FunctionChunk> {
    let mut b = FunctionBuilder::generator("r", &["n"]);
    b.push_int(0);
    b.get_local("n");
    b.emit(Op::Lt);
    b.if_(|b| {
        b.get_global("r");
        b.get_local("n");
        b.push_int(1);
        b.emit(Op::Sub);
        b.call(1);
        b.yield_star();
        b.ret();
    });
    emit_yield(&mut b, "leaf");
    b.finish().unwrap()
}

fn recursive_vm(vm: &mut Vm) -> JsValue {
    let r = JsValue::function(recursive());
    vm.set_global("r", r.clone());
    r
}

#[test]
fn test_recursive_delegation_within_limit() {
    let mut vm = create_test_vm();
    let r = recursive_vm(&mut vm);
    let g = vm
        .call_function(&r, JsValue::Undefined, &[JsValue::from(50)])
        .unwrap();
    assert_eq!(next(&mut vm, &g), step("leaf", false));
    assert_eq!(next(&mut vm, &g), step(JsValue::Undefined, true));
    assert_eq!(vm.stack_height(), 0);
}

#[test]
fn test_unbounded_recursive_delegation_is_a_range_error() {
    let mut vm = create_test_vm();
    let r = recursive_vm(&mut vm);
    for depth in [400, 100_000] {
        let g = vm
            .call_function(&r, JsValue::Undefined, &[JsValue::from(depth)])
            .unwrap();
        let err = vm.generator_next(&g, JsValue::Undefined).unwrap_err();
        assert!(matches!(err, JsError::RangeError { .. }), "unexpected error: {:?}", err);
        assert_eq!(vm.generator_state(&g), Some(GeneratorState::Completed));
        assert_eq!(vm.stack_height(), 0);
        assert_eq!(vm.frame_depth(), 0);
    }

    // The nesting count is restored once the error has unwound
    let g = vm
        .call_function(&r, JsValue::Undefined, &[JsValue::from(3)])
        .unwrap();
    assert_eq!(next(&mut vm, &g), step("leaf", false));
}

#[test]
fn test_reentry_depth_is_configurable() {
    let mut vm = Vm::with_config(VmConfig {
        max_reentry_depth: 16,
        ..VmConfig::default()
    });
    let r = recursive_vm(&mut vm);

    let shallow = vm
        .call_function(&r, JsValue::Undefined, &[JsValue::from(8)])
        .unwrap();
    assert_eq!(next(&mut vm, &shallow), step("leaf", false));

    let deep = vm
        .call_function(&r, JsValue::Undefined, &[JsValue::from(16)])
        .unwrap();
    let err = vm.generator_next(&deep, JsValue::Undefined).unwrap_err();
    assert!(matches!(err, JsError::RangeError { .. }), "unexpected error: {:?}", err);
}
