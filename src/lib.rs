//! Resumable generator core for an ECMAScript bytecode virtual machine
//!
//! Generator bodies run on a stack-based VM and can suspend at `yield`
//! points, including inside `finally` blocks that are running because of
//! `return()` or `throw()`. A suspended generator owns its frame; it can be
//! resumed from top-level code, from a host callback or from another
//! generator, and always runs on its own saved state.
//!
//! # Example
//!
//! ```
//! use genvm::{FunctionBuilder, JsValue, Vm};
//!
//! // function* task() { try { yield "working" } finally { yield "cleanup" } }
//! let mut b = FunctionBuilder::generator("task", &[]);
//! b.try_finally(
//!     |b| {
//!         b.push_str("working");
//!         b.yield_();
//!         b.pop();
//!     },
//!     |b| {
//!         b.push_str("cleanup");
//!         b.yield_();
//!         b.pop();
//!     },
//! );
//! let task = JsValue::function(b.finish().unwrap());
//!
//! let mut vm = Vm::new();
//! let generator = vm.call_function(&task, JsValue::Undefined, &[]).unwrap();
//!
//! let r = vm.generator_next(&generator, JsValue::Undefined).unwrap();
//! assert_eq!((r.value, r.done), (JsValue::from("working"), false));
//!
//! let r = vm.generator_return(&generator, JsValue::from("cancelled")).unwrap();
//! assert_eq!((r.value, r.done), (JsValue::from("cleanup"), false));
//!
//! let r = vm.generator_next(&generator, JsValue::Undefined).unwrap();
//! assert_eq!((r.value, r.done), (JsValue::from("cancelled"), true));
//! ```

pub mod compiler;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod value;

pub use compiler::{FunctionBuilder, FunctionChunk, Op, Program};
pub use config::VmConfig;
pub use error::JsError;
pub use interpreter::builtins::generator::GeneratorState;
pub use interpreter::builtins::iterator::IterResult;
pub use interpreter::completion::{Completion, CompletionKind};
pub use interpreter::{InterruptHandle, Vm};
pub use value::CheapClone;
pub use value::JsString;
pub use value::JsValue;
