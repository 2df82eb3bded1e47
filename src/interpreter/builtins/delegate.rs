//! `yield*` delegation
//!
//! While an outer generator is suspended inside `yield*`, every resumption
//! is forwarded to the inner iterator first. The inner iterator's results
//! decide whether the outer generator stays suspended (its value is yielded
//! to the outer caller) or continues at the `yield*` point with a
//! completion built from the inner's final value.

use tracing::debug;

use crate::error::JsError;
use crate::interpreter::Vm;
use crate::interpreter::completion::Completion;
use crate::value::JsValue;

use super::iterator::{self, IterResult};

/// An active delegation to an inner iterator
#[derive(Debug, Clone)]
pub struct Delegation {
    iterator: JsValue,
    /// Set once a `return` was forwarded: the inner's final value then
    /// completes the outer generator instead of resuming it normally
    closing: bool,
}

impl Delegation {
    pub fn iterator(&self) -> &JsValue {
        &self.iterator
    }

    fn settle(self, result: IterResult) -> DelegateStep {
        if !result.done {
            return DelegateStep::Yield(result.value, self);
        }
        debug!(target: "genvm::vm", closing = self.closing, "delegation finished");
        if self.closing {
            DelegateStep::Resume(Completion::Return(result.value))
        } else {
            DelegateStep::Resume(Completion::Normal(result.value))
        }
    }
}

/// What the outer generator does after a forwarded resumption
#[derive(Debug)]
pub enum DelegateStep {
    /// Stay suspended, yielding the inner's value
    Yield(JsValue, Delegation),
    /// Delegation is over; continue the outer body at the `yield*` point
    Resume(Completion),
}

/// Start delegating to `iterable` by calling its `next()` once.
/// Failures are reported as a throw at the `yield*` point.
pub fn open(vm: &mut Vm, iterable: &JsValue) -> DelegateStep {
    match iterator::get_iterator(vm, iterable) {
        Ok(iterator) => {
            debug!(target: "genvm::vm", "delegation opened");
            forward(
                vm,
                Delegation {
                    iterator,
                    closing: false,
                },
                Completion::Normal(JsValue::Undefined),
            )
        }
        Err(err) => DelegateStep::Resume(Completion::Throw(err)),
    }
}

/// Forward one resumption of the outer generator to the inner iterator
pub fn forward(vm: &mut Vm, delegation: Delegation, input: Completion) -> DelegateStep {
    match try_forward(vm, delegation, input) {
        Ok(step) => step,
        // Errors raised by the inner iterator surface at the `yield*` point
        Err(err) => DelegateStep::Resume(Completion::Throw(err)),
    }
}

fn try_forward(
    vm: &mut Vm,
    mut delegation: Delegation,
    input: Completion,
) -> Result<DelegateStep, JsError> {
    let inner = delegation.iterator.clone();
    match input {
        Completion::Normal(value) => {
            let next = iterator::get_method(vm, &inner, "next")?
                .ok_or_else(|| JsError::type_error("Iterator does not provide a 'next' method"))?;
            let result = iterator::call_iterator_method(vm, &next, &inner, value)?;
            Ok(delegation.settle(result))
        }

        Completion::Return(value) => {
            let Some(method) = iterator::get_method(vm, &inner, "return")? else {
                debug!(target: "genvm::vm", "inner iterator has no return method");
                return Ok(DelegateStep::Resume(Completion::Return(value)));
            };
            delegation.closing = true;
            let result = iterator::call_iterator_method(vm, &method, &inner, value)?;
            Ok(delegation.settle(result))
        }

        Completion::Throw(err) if !err.is_catchable() => {
            Ok(DelegateStep::Resume(Completion::Throw(err)))
        }

        Completion::Throw(err) => {
            if let Some(method) = iterator::get_method(vm, &inner, "throw")? {
                delegation.closing = false;
                let result = iterator::call_iterator_method(vm, &method, &inner, err.to_value())?;
                return Ok(delegation.settle(result));
            }

            debug!(target: "genvm::vm", "inner iterator has no throw method, closing it");
            // Close the inner iterator; its failures are ignored
            if let Ok(Some(method)) = iterator::get_method(vm, &inner, "return") {
                let _ = vm.call_function(&method, inner.clone(), &[]);
            }
            Ok(DelegateStep::Resume(Completion::Throw(JsError::type_error(
                "The iterator does not provide a 'throw' method",
            ))))
        }

        Completion::Break { .. } | Completion::Continue { .. } => Err(JsError::internal_error(
            "break or continue forwarded to a delegated iterator",
        )),
    }
}
