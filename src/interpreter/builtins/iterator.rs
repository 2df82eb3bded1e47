//! Iterator protocol helpers
//!
//! Iterator results cross the script boundary as ordinary `{ value, done }`
//! objects; [`IterResult`] is their Rust-side view.

use std::rc::Rc;

use crate::error::JsError;
use crate::interpreter::Vm;
use crate::value::{JsObject, JsString, JsValue, ObjectKind};

/// `{ value, done }`
#[derive(Debug, Clone, PartialEq)]
pub struct IterResult {
    pub value: JsValue,
    pub done: bool,
}

impl IterResult {
    pub fn new(value: JsValue, done: bool) -> Self {
        Self { value, done }
    }

    /// A value produced by a suspension
    pub fn yielded(value: JsValue) -> Self {
        Self::new(value, false)
    }

    /// A final value
    pub fn done(value: JsValue) -> Self {
        Self::new(value, true)
    }

    /// Create an iterator result object { value, done }
    pub fn to_value(&self) -> JsValue {
        let mut obj = JsObject::ordinary();
        obj.set(JsString::from("value"), self.value.clone());
        obj.set(JsString::from("done"), JsValue::Boolean(self.done));
        JsValue::object(obj)
    }

    /// Read an iterator result object returned by an iterator method
    pub fn from_value(vm: &Vm, result: &JsValue) -> Result<Self, JsError> {
        if result.as_object().is_none() {
            return Err(JsError::type_error(format!(
                "Iterator result {} is not an object",
                result
            )));
        }
        let done = vm.get_property(result, "done")?.to_boolean();
        let value = vm.get_property(result, "value")?;
        Ok(Self { value, done })
    }
}

/// GetIterator: generators and custom iterators are their own iterators,
/// arrays get a fresh array iterator
pub fn get_iterator(vm: &Vm, iterable: &JsValue) -> Result<JsValue, JsError> {
    if let JsValue::Object(obj) = iterable {
        match &obj.borrow().kind {
            ObjectKind::Generator(_) | ObjectKind::ArrayIterator { .. } => {
                return Ok(iterable.clone());
            }
            ObjectKind::Array(_) => {
                return Ok(JsValue::object(JsObject::with_kind(
                    ObjectKind::ArrayIterator {
                        array: Rc::clone(obj),
                        index: 0,
                    },
                )));
            }
            _ => {}
        }
        if get_method(vm, iterable, "next")?.is_some() {
            return Ok(iterable.clone());
        }
    }
    Err(JsError::type_error(format!("{} is not iterable", iterable)))
}

/// GetMethod: `None` when the property is undefined or null
pub fn get_method(vm: &Vm, target: &JsValue, name: &str) -> Result<Option<JsValue>, JsError> {
    let method = vm.get_property(target, name)?;
    if method.is_null_or_undefined() {
        return Ok(None);
    }
    if !method.is_callable() {
        return Err(JsError::type_error(format!(
            "Iterator {} method is not callable",
            name
        )));
    }
    Ok(Some(method))
}

/// Call an iterator method and read its result object
pub fn call_iterator_method(
    vm: &mut Vm,
    method: &JsValue,
    iterator: &JsValue,
    arg: JsValue,
) -> Result<IterResult, JsError> {
    let result = vm.call_function(method, iterator.clone(), &[arg])?;
    IterResult::from_value(vm, &result)
}

/// %ArrayIteratorPrototype%.next()
pub fn array_iterator_next(
    _vm: &mut Vm,
    this: JsValue,
    _args: &[JsValue],
) -> Result<JsValue, JsError> {
    let JsValue::Object(obj) = &this else {
        return Err(JsError::type_error(
            "Array Iterator next called on non-object",
        ));
    };
    let mut obj = obj.borrow_mut();
    let ObjectKind::ArrayIterator { array, index } = &mut obj.kind else {
        return Err(JsError::type_error(
            "Array Iterator next called on incompatible receiver",
        ));
    };
    let element = match &array.borrow().kind {
        ObjectKind::Array(values) => values.get(*index).cloned(),
        _ => None,
    };
    let result = match element {
        Some(value) => {
            *index += 1;
            IterResult::yielded(value)
        }
        None => IterResult::done(JsValue::Undefined),
    };
    Ok(result.to_value())
}
