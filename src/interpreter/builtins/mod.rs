//! Built-in methods of the object kinds the VM knows about

pub mod delegate;
pub mod generator;
pub mod iterator;

use crate::error::JsError;
use crate::interpreter::Vm;
use crate::value::{JsValue, ObjectKind};

/// Method values shared by every object of a kind
pub(crate) struct Intrinsics {
    pub generator_next: JsValue,
    pub generator_return: JsValue,
    pub generator_throw: JsValue,
    pub array_push: JsValue,
    pub array_iterator_next: JsValue,
}

impl Intrinsics {
    pub fn new() -> Self {
        Self {
            generator_next: JsValue::native("next", generator::generator_next),
            generator_return: JsValue::native("return", generator::generator_return),
            generator_throw: JsValue::native("throw", generator::generator_throw),
            array_push: JsValue::native("push", array_push),
            array_iterator_next: JsValue::native("next", iterator::array_iterator_next),
        }
    }
}

/// Array.prototype.push(...items)
fn array_push(_vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JsError> {
    let JsValue::Object(obj) = &this else {
        return Err(JsError::type_error(
            "Array.prototype.push called on non-object",
        ));
    };
    let mut obj = obj.borrow_mut();
    let ObjectKind::Array(values) = &mut obj.kind else {
        return Err(JsError::type_error(
            "Array.prototype.push called on non-array",
        ));
    };
    values.extend(args.iter().cloned());
    Ok(JsValue::Number(values.len() as f64))
}
