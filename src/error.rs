//! Error types for the virtual machine

use crate::value::{JsObject, JsString, JsValue};
use thiserror::Error;

/// Main error type for the VM
///
/// Every abrupt `throw` completion carries one of these. User-level values
/// travel as [`JsError::Thrown`]; the remaining variants are raised by the
/// VM itself and are converted into script values when a `catch` block
/// observes them.
#[derive(Debug, Clone, Error)]
pub enum JsError {
    /// A value thrown by script code (or injected through `Generator.throw`)
    #[error("Uncaught {0}")]
    Thrown(JsValue),

    /// Protocol violations: re-entrant resumption, missing iterator methods,
    /// calling a non-function
    #[error("TypeError: {message}")]
    TypeError { message: String },

    #[error("ReferenceError: {name} is not defined")]
    ReferenceError { name: String },

    /// Call depth or stack size exceeded
    #[error("RangeError: {message}")]
    RangeError { message: String },

    /// The embedder requested an interrupt through an `InterruptHandle`
    #[error("Interrupted: {reason}")]
    Interrupted { reason: String },

    #[error("Execution timeout: exceeded {timeout_ms}ms (elapsed {elapsed_ms}ms)")]
    Timeout { timeout_ms: u64, elapsed_ms: u64 },

    /// A program or configuration could not be decoded
    #[error("DecodeError: {message}")]
    Decode { message: String },

    /// Malformed bytecode or a broken VM invariant
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JsError {
    pub fn thrown(value: impl Into<JsValue>) -> Self {
        JsError::Thrown(value.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        JsError::TypeError {
            message: message.into(),
        }
    }

    pub fn reference_error(name: impl Into<String>) -> Self {
        JsError::ReferenceError { name: name.into() }
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        JsError::RangeError {
            message: message.into(),
        }
    }

    pub fn decode_error(message: impl Into<String>) -> Self {
        JsError::Decode {
            message: message.into(),
        }
    }

    /// Create an internal error for unexpected VM states.
    /// These should never happen with well-formed bytecode.
    pub fn internal_error(message: impl Into<String>) -> Self {
        JsError::Internal(message.into())
    }

    /// Whether a `catch` handler may observe this error.
    ///
    /// Interrupts, timeouts and internal errors still run `finally` blocks on
    /// their way out but are never absorbed by `catch`.
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self,
            JsError::Interrupted { .. } | JsError::Timeout { .. } | JsError::Internal(_)
        )
    }

    /// Whether this error was raised by the interrupt machinery
    pub fn is_interrupt(&self) -> bool {
        matches!(self, JsError::Interrupted { .. } | JsError::Timeout { .. })
    }

    /// The thrown value, if this error carries a user-level value
    pub fn thrown_value(&self) -> Option<&JsValue> {
        match self {
            JsError::Thrown(value) => Some(value),
            _ => None,
        }
    }

    /// Convert this error to the value a `catch` block receives
    pub fn to_value(&self) -> JsValue {
        let (name, message) = match self {
            JsError::Thrown(value) => return value.clone(),
            JsError::TypeError { message } => ("TypeError", message.clone()),
            JsError::ReferenceError { name } => {
                ("ReferenceError", format!("{} is not defined", name))
            }
            JsError::RangeError { message } => ("RangeError", message.clone()),
            JsError::Interrupted { reason } => ("InterruptedError", reason.clone()),
            JsError::Timeout { timeout_ms, .. } => (
                "TimeoutError",
                format!("execution exceeded {}ms", timeout_ms),
            ),
            JsError::Decode { message } => ("DecodeError", message.clone()),
            JsError::Internal(message) => ("InternalError", message.clone()),
        };
        JsValue::object(JsObject::error(
            JsString::from(name),
            JsString::from(message),
        ))
    }
}
