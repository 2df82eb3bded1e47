//! Value representation
//!
//! The VM only needs enough of a value model to drive generators and let
//! scripts leave observable traces: primitives, ordinary objects, arrays,
//! functions and the generator objects themselves.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::compiler::FunctionChunk;
use crate::error::JsError;
use crate::interpreter::Vm;
use crate::interpreter::builtins::generator::Generator;

/// Trait for types that have cheap (O(1), reference-counted) clones.
///
/// Makes it explicit at the call site that a clone only bumps a reference
/// count. `JsString` and `JsObjectRef` implement it.
pub trait CheapClone: Clone {
    fn cheap_clone(&self) -> Self {
        self.clone()
    }
}

impl<T: ?Sized> CheapClone for Rc<T> {}

/// Shared handle to a heap object
pub type JsObjectRef = Rc<RefCell<JsObject>>;

/// A JavaScript value
#[derive(Clone, Default)]
pub enum JsValue {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(JsString),
    Object(JsObjectRef),
}

impl JsValue {
    /// Wrap an object in a fresh heap cell
    pub fn object(object: JsObject) -> Self {
        JsValue::Object(Rc::new(RefCell::new(object)))
    }

    /// Create an array value
    pub fn array(values: Vec<JsValue>) -> Self {
        JsValue::object(JsObject::with_kind(ObjectKind::Array(values)))
    }

    /// Create a function value from a compiled chunk
    pub fn function(chunk: Rc<FunctionChunk>) -> Self {
        JsValue::object(JsObject::with_kind(ObjectKind::Function(
            Callable::Bytecode(chunk),
        )))
    }

    /// Create a host function value
    pub fn native(
        name: &str,
        func: impl Fn(&mut Vm, JsValue, &[JsValue]) -> Result<JsValue, JsError> + 'static,
    ) -> Self {
        JsValue::object(JsObject::with_kind(ObjectKind::Function(Callable::Native(
            NativeFunction::new(name, func),
        ))))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, JsValue::Undefined)
    }

    /// Check if this value is null or undefined
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, JsValue::Null | JsValue::Undefined)
    }

    pub fn as_object(&self) -> Option<&JsObjectRef> {
        match self {
            JsValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Check if this value is callable (a function)
    pub fn is_callable(&self) -> bool {
        match self {
            JsValue::Object(obj) => matches!(obj.borrow().kind, ObjectKind::Function(_)),
            _ => false,
        }
    }

    /// Check if this value is a generator object
    pub fn is_generator(&self) -> bool {
        match self {
            JsValue::Object(obj) => matches!(obj.borrow().kind, ObjectKind::Generator(_)),
            _ => false,
        }
    }

    /// Snapshot of an array's elements
    pub fn array_values(&self) -> Option<Vec<JsValue>> {
        match self {
            JsValue::Object(obj) => match &obj.borrow().kind {
                ObjectKind::Array(values) => Some(values.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Get the typeof result for this value
    pub fn type_of(&self) -> &'static str {
        match self {
            JsValue::Undefined => "undefined",
            JsValue::Null => "object",
            JsValue::Boolean(_) => "boolean",
            JsValue::Number(_) => "number",
            JsValue::String(_) => "string",
            JsValue::Object(obj) => {
                if matches!(obj.borrow().kind, ObjectKind::Function(_)) {
                    "function"
                } else {
                    "object"
                }
            }
        }
    }

    /// Convert to boolean (ToBoolean)
    pub fn to_boolean(&self) -> bool {
        match self {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Boolean(b) => *b,
            JsValue::Number(n) => *n != 0.0 && !n.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            JsValue::Object(_) => true,
        }
    }

    /// Convert to number (ToNumber)
    pub fn to_number(&self) -> f64 {
        match self {
            JsValue::Undefined => f64::NAN,
            JsValue::Null => 0.0,
            JsValue::Boolean(true) => 1.0,
            JsValue::Boolean(false) => 0.0,
            JsValue::Number(n) => *n,
            JsValue::String(s) => {
                let trimmed = s.as_str().trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            JsValue::Object(_) => f64::NAN,
        }
    }

    /// Convert to string (ToString)
    pub fn to_js_string(&self) -> JsString {
        match self {
            JsValue::Undefined => JsString::from("undefined"),
            JsValue::Null => JsString::from("null"),
            JsValue::Boolean(true) => JsString::from("true"),
            JsValue::Boolean(false) => JsString::from("false"),
            JsValue::Number(n) => JsString::from(number_to_string(*n)),
            JsValue::String(s) => s.cheap_clone(),
            JsValue::Object(obj) => obj.borrow().to_js_string(),
        }
    }

    /// Strict equality (===)
    pub fn strict_equals(&self, other: &JsValue) -> bool {
        match (self, other) {
            (JsValue::Undefined, JsValue::Undefined) => true,
            (JsValue::Null, JsValue::Null) => true,
            (JsValue::Boolean(a), JsValue::Boolean(b)) => a == b,
            (JsValue::Number(a), JsValue::Number(b)) => a == b,
            (JsValue::String(a), JsValue::String(b)) => a == b,
            (JsValue::Object(a), JsValue::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

impl PartialEq for JsValue {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl fmt::Debug for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::Undefined => write!(f, "undefined"),
            JsValue::Null => write!(f, "null"),
            JsValue::Boolean(b) => write!(f, "{}", b),
            JsValue::Number(n) => write!(f, "{}", number_to_string(*n)),
            JsValue::String(s) => write!(f, "{:?}", s.as_str()),
            JsValue::Object(obj) => match obj.try_borrow() {
                Ok(obj) => write!(f, "{:?}", obj),
                Err(_) => write!(f, "[object <borrowed>]"),
            },
        }
    }
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::Object(obj) if obj.try_borrow().is_err() => write!(f, "[object Object]"),
            _ => write!(f, "{}", self.to_js_string()),
        }
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        JsValue::Boolean(b)
    }
}

impl From<f64> for JsValue {
    fn from(n: f64) -> Self {
        JsValue::Number(n)
    }
}

impl From<i32> for JsValue {
    fn from(n: i32) -> Self {
        JsValue::Number(n as f64)
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        JsValue::String(JsString::from(s))
    }
}

impl From<String> for JsValue {
    fn from(s: String) -> Self {
        JsValue::String(JsString::from(s))
    }
}

impl From<JsString> for JsValue {
    fn from(s: JsString) -> Self {
        JsValue::String(s)
    }
}

/// Immutable, reference-counted string
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsString(Rc<str>);

impl CheapClone for JsString {}

impl JsString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl AsRef<str> for JsString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for JsString {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for JsString {
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for JsString {
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        JsString(Rc::from(s))
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        JsString(Rc::from(s))
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl Serialize for JsString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for JsString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(JsString::from(s))
    }
}

/// A heap object: named properties plus an internal kind
pub struct JsObject {
    /// Own properties in insertion order
    pub properties: IndexMap<JsString, JsValue>,
    pub kind: ObjectKind,
}

/// Internal slots distinguishing the object kinds the VM knows about
pub enum ObjectKind {
    Ordinary,
    /// Error object created from a [`JsError`]; `name` and `message` live in properties
    Error,
    Array(Vec<JsValue>),
    Function(Callable),
    Generator(Generator),
    /// Iterator over an array snapshot; exposes `next` only
    ArrayIterator { array: JsObjectRef, index: usize },
}

impl JsObject {
    pub fn ordinary() -> Self {
        Self::with_kind(ObjectKind::Ordinary)
    }

    pub fn with_kind(kind: ObjectKind) -> Self {
        Self {
            properties: IndexMap::new(),
            kind,
        }
    }

    /// Create an error object with `name` and `message` properties
    pub fn error(name: JsString, message: JsString) -> Self {
        let mut obj = Self::with_kind(ObjectKind::Error);
        obj.set(JsString::from("name"), JsValue::String(name));
        obj.set(JsString::from("message"), JsValue::String(message));
        obj
    }

    /// Get an own property
    pub fn get(&self, key: &str) -> Option<&JsValue> {
        self.properties.get(key)
    }

    /// Set an own property
    pub fn set(&mut self, key: JsString, value: JsValue) {
        self.properties.insert(key, value);
    }

    fn to_js_string(&self) -> JsString {
        match &self.kind {
            ObjectKind::Array(values) => JsString::from(
                values
                    .iter()
                    .map(|v| {
                        if v.is_null_or_undefined() {
                            String::new()
                        } else {
                            v.to_js_string().as_str().to_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            ObjectKind::Error => {
                let name = self
                    .get("name")
                    .map(JsValue::to_js_string)
                    .unwrap_or_else(|| JsString::from("Error"));
                match self.get("message") {
                    Some(message) if !message.to_js_string().is_empty() => {
                        JsString::from(format!("{}: {}", name, message.to_js_string()))
                    }
                    _ => name,
                }
            }
            ObjectKind::Function(callable) => {
                JsString::from(format!("function {}() {{ [code] }}", callable.name()))
            }
            ObjectKind::Generator(_) => JsString::from("[object Generator]"),
            ObjectKind::ArrayIterator { .. } => JsString::from("[object Array Iterator]"),
            ObjectKind::Ordinary => JsString::from("[object Object]"),
        }
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ObjectKind::Array(values) => f.debug_list().entries(values.iter()).finish(),
            ObjectKind::Function(callable) => write!(f, "[Function {}]", callable.name()),
            ObjectKind::Generator(generator) => write!(f, "[Generator {:?}]", generator.state()),
            ObjectKind::ArrayIterator { index, .. } => write!(f, "[Array Iterator @{}]", index),
            ObjectKind::Error | ObjectKind::Ordinary => {
                f.debug_map().entries(self.properties.iter()).finish()
            }
        }
    }
}

/// Something that can be called
#[derive(Clone)]
pub enum Callable {
    /// A compiled function; generator functions create a generator object when called
    Bytecode(Rc<FunctionChunk>),
    Native(NativeFunction),
}

impl Callable {
    pub fn name(&self) -> &str {
        match self {
            Callable::Bytecode(chunk) => chunk
                .info
                .name
                .as_ref()
                .map(JsString::as_str)
                .unwrap_or("anonymous"),
            Callable::Native(native) => native.name.as_str(),
        }
    }
}

/// Host function signature: `(vm, this, args)`
pub type NativeFn = Rc<dyn Fn(&mut Vm, JsValue, &[JsValue]) -> Result<JsValue, JsError>>;

/// A function implemented by the embedder or by the VM's intrinsics
#[derive(Clone)]
pub struct NativeFunction {
    pub name: JsString,
    pub func: NativeFn,
}

impl NativeFunction {
    pub fn new(
        name: &str,
        func: impl Fn(&mut Vm, JsValue, &[JsValue]) -> Result<JsValue, JsError> + 'static,
    ) -> Self {
        Self {
            name: JsString::from(name),
            func: Rc::new(func),
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}
