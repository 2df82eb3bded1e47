//! Completion records
//!
//! A completion describes how a piece of code finished. Abrupt completions
//! travel outward through try contexts and are buffered while finally
//! blocks run; a suspended generator may hold one across resumptions.

use crate::compiler::JumpTarget;
use crate::error::JsError;
use crate::value::JsValue;

/// The tag of a [`Completion`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Normal,
    Return,
    Throw,
    Break,
    Continue,
}

/// Outcome of an execution step
#[derive(Debug, Clone)]
pub enum Completion {
    /// Fall through; as a resumption input, the value `next(v)` sends
    Normal(JsValue),
    Return(JsValue),
    Throw(JsError),
    /// Jump to `target` once the innermost `try_depth` try contexts are unwound
    Break { target: JumpTarget, try_depth: u16 },
    Continue { target: JumpTarget, try_depth: u16 },
}

impl Completion {
    pub fn kind(&self) -> CompletionKind {
        match self {
            Completion::Normal(_) => CompletionKind::Normal,
            Completion::Return(_) => CompletionKind::Return,
            Completion::Throw(_) => CompletionKind::Throw,
            Completion::Break { .. } => CompletionKind::Break,
            Completion::Continue { .. } => CompletionKind::Continue,
        }
    }

    pub fn is_abrupt(&self) -> bool {
        !matches!(self, Completion::Normal(_))
    }

    /// The value carried by this completion, as script code would observe it
    pub fn value(&self) -> JsValue {
        match self {
            Completion::Normal(value) | Completion::Return(value) => value.clone(),
            Completion::Throw(err) => err.to_value(),
            Completion::Break { .. } | Completion::Continue { .. } => JsValue::Undefined,
        }
    }

    /// Jump target and loop try depth of a `break`/`continue`
    pub fn jump(&self) -> Option<(JumpTarget, u16)> {
        match self {
            Completion::Break { target, try_depth } | Completion::Continue { target, try_depth } => {
                Some((*target, *try_depth))
            }
            _ => None,
        }
    }

    /// Whether this is a throw raised by the interrupt machinery
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Completion::Throw(err) if err.is_interrupt())
    }
}
