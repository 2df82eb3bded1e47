//! Bytecode instruction set and chunk format
//!
//! This module defines the program format consumed by the VM.
//! We use a stack-based design: every function invocation owns a window of
//! the value stack holding its locals followed by its operands.
//!
//! Programs are serde-serialisable so an external compiler can hand them
//! over as JSON.

use crate::error::JsError;
use crate::value::JsString;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Constant pool index (0-65535)
pub type ConstantIndex = u16;

/// Local variable slot (0-65535)
pub type LocalSlot = u16;

/// Index into a chunk's handler table
pub type HandlerIndex = u16;

/// Jump target (instruction offset)
pub type JumpTarget = u32;

/// Bytecode instruction
///
/// Each instruction pops its operands from the top of the current frame's
/// operand stack and pushes its result there. The net effect on the operand
/// depth is given by [`Op::stack_effect`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Op {
    // ═══════════════════════════════════════════════════════════════════════════════
    // Constants & Stack Operations
    // ═══════════════════════════════════════════════════════════════════════════════
    /// Push undefined
    PushUndefined,

    /// Push null
    PushNull,

    /// Push boolean
    PushBool { value: bool },

    /// Push integer (small numbers without constant pool)
    PushInt { value: i32 },

    /// Push constant from pool
    PushConst { idx: ConstantIndex },

    /// Discard the top value
    Pop,

    /// Duplicate the top value
    Dup,

    /// Swap the two top values
    Swap,

    // ═══════════════════════════════════════════════════════════════════════════════
    // Variables
    // ═══════════════════════════════════════════════════════════════════════════════
    /// Push local: push locals[slot]
    GetLocal { slot: LocalSlot },

    /// Pop into local: locals[slot] = pop
    SetLocal { slot: LocalSlot },

    /// Push global by name (constant pool string)
    GetGlobal { name: ConstantIndex },

    /// Pop into global by name
    SetGlobal { name: ConstantIndex },

    // ═══════════════════════════════════════════════════════════════════════════════
    // Arithmetic & Comparison
    // ═══════════════════════════════════════════════════════════════════════════════
    /// Add or concatenate: push(left + right)
    Add,

    Sub,

    Mul,

    Div,

    Mod,

    /// Strict equality: push(left === right)
    StrictEq,

    /// Strict inequality: push(left !== right)
    StrictNotEq,

    Lt,

    LtEq,

    Gt,

    /// Logical not: push(!pop)
    Not,

    /// Numeric negation: push(-pop)
    Neg,

    // ═══════════════════════════════════════════════════════════════════════════════
    // Objects & Arrays
    // ═══════════════════════════════════════════════════════════════════════════════
    /// Push a new ordinary object
    NewObject,

    /// Pop `count` values and push an array of them (first popped is last element)
    NewArray { count: u16 },

    /// Property read: push(pop[name])
    GetProp { name: ConstantIndex },

    /// Property write: value = pop, obj = pop, obj[name] = value
    SetProp { name: ConstantIndex },

    // ═══════════════════════════════════════════════════════════════════════════════
    // Control Flow
    // ═══════════════════════════════════════════════════════════════════════════════
    /// Unconditional jump
    Jump { target: JumpTarget },

    /// Jump if pop is truthy
    JumpIfTrue { target: JumpTarget },

    /// Jump if pop is falsy
    JumpIfFalse { target: JumpTarget },

    /// Break out of a loop, running the finally blocks of every try context
    /// entered since the loop began. `try_depth` is the number of try contexts
    /// live at the loop's level.
    Break {
        target: JumpTarget,
        try_depth: u16,
    },

    /// Continue a loop, running intervening finally blocks like `Break`
    Continue {
        target: JumpTarget,
        try_depth: u16,
    },

    // ═══════════════════════════════════════════════════════════════════════════════
    // Functions
    // ═══════════════════════════════════════════════════════════════════════════════
    /// Call: stack is [callee, arg0..argN] -> [result], this = undefined
    Call { argc: u8 },

    /// Method call: stack is [receiver, arg0..argN] -> [result], this = receiver
    CallMethod { name: ConstantIndex, argc: u8 },

    /// Push a function value for a nested chunk in the constant pool
    MakeClosure { idx: ConstantIndex },

    /// Return pop from the current function
    Return,

    /// Throw pop
    Throw,

    // ═══════════════════════════════════════════════════════════════════════════════
    // Exception Handling
    // ═══════════════════════════════════════════════════════════════════════════════
    /// Activate a try context for `handlers[handler]`
    EnterTry { handler: HandlerIndex },

    /// Leave the protected region (or the catch block) of the innermost try
    /// context normally. Runs its finally block if it has one, otherwise
    /// pops the context and jumps to its end.
    LeaveTry { handler: HandlerIndex },

    /// End of a finally block: pop the innermost try context and resume
    /// whatever completion was buffered when the finally block was entered
    EndFinally,

    // ═══════════════════════════════════════════════════════════════════════════════
    // Generators
    // ═══════════════════════════════════════════════════════════════════════════════
    /// Suspend the generator with pop as the yielded value. On resumption the
    /// value sent by `next(v)` is pushed.
    Yield,

    /// Delegate to the iterable on top of the stack. When the delegation
    /// finishes the inner iterator's final value is pushed.
    YieldStar,
}

impl Op {
    /// Net change in operand stack depth when this instruction falls through
    pub fn stack_effect(&self) -> i32 {
        match self {
            Op::PushUndefined
            | Op::PushNull
            | Op::PushBool { .. }
            | Op::PushInt { .. }
            | Op::PushConst { .. }
            | Op::Dup
            | Op::GetLocal { .. }
            | Op::GetGlobal { .. }
            | Op::NewObject
            | Op::MakeClosure { .. } => 1,

            Op::Pop
            | Op::SetLocal { .. }
            | Op::SetGlobal { .. }
            | Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::StrictEq
            | Op::StrictNotEq
            | Op::Lt
            | Op::LtEq
            | Op::Gt
            | Op::JumpIfTrue { .. }
            | Op::JumpIfFalse { .. }
            | Op::Return
            | Op::Throw => -1,

            Op::SetProp { .. } => -2,

            Op::NewArray { count } => 1 - i32::from(*count),
            Op::Call { argc } | Op::CallMethod { argc, .. } => -i32::from(*argc),

            Op::Swap
            | Op::Not
            | Op::Neg
            | Op::GetProp { .. }
            | Op::Jump { .. }
            | Op::Break { .. }
            | Op::Continue { .. }
            | Op::EnterTry { .. }
            | Op::LeaveTry { .. }
            | Op::EndFinally
            | Op::Yield
            | Op::YieldStar => 0,
        }
    }

    /// The jump target of a branching instruction
    pub fn jump_target(&self) -> Option<JumpTarget> {
        match self {
            Op::Jump { target }
            | Op::JumpIfTrue { target }
            | Op::JumpIfFalse { target }
            | Op::Break { target, .. }
            | Op::Continue { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Rewrite the jump target of a branching instruction (used when patching)
    pub fn set_jump_target(&mut self, new_target: JumpTarget) -> bool {
        match self {
            Op::Jump { target }
            | Op::JumpIfTrue { target }
            | Op::JumpIfFalse { target }
            | Op::Break { target, .. }
            | Op::Continue { target, .. } => {
                *target = new_target;
                true
            }
            _ => false,
        }
    }
}

/// Exception-handler table entry for one try statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerEntry {
    /// First instruction of the protected region
    pub start: JumpTarget,

    /// Where control continues once the whole try statement has resolved
    pub end: JumpTarget,

    /// Start of the catch block (receives the exception on the stack)
    pub catch_target: Option<JumpTarget>,

    /// Start of the finally block
    pub finally_target: Option<JumpTarget>,

    /// Operand stack height, relative to the frame's operand base, to restore
    /// before entering the catch or finally block
    pub restore_depth: u32,
}

/// Constants that can be stored in the pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Constant {
    String(JsString),

    Number(f64),

    /// Nested function body
    Function(Rc<FunctionChunk>),
}

/// Function metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Function name (if any)
    pub name: Option<JsString>,

    /// Number of parameters; they occupy the first local slots
    pub param_count: u16,

    /// Whether this is a generator function
    pub is_generator: bool,
}

impl FunctionInfo {
    /// Create info for a regular function
    pub fn regular(name: Option<JsString>, param_count: u16) -> Self {
        Self {
            name,
            param_count,
            is_generator: false,
        }
    }

    /// Create info for a generator function
    pub fn generator(name: Option<JsString>, param_count: u16) -> Self {
        Self {
            name,
            param_count,
            is_generator: true,
        }
    }
}

/// A compiled function body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionChunk {
    pub info: FunctionInfo,

    /// The bytecode instructions
    pub code: Vec<Op>,

    /// Constant pool (strings, numbers, nested functions)
    #[serde(default)]
    pub constants: Vec<Constant>,

    /// Exception-handler table, indexed by `EnterTry`/`LeaveTry`
    #[serde(default)]
    pub handlers: Vec<HandlerEntry>,

    /// Number of local slots, parameters included
    #[serde(default)]
    pub local_count: u16,
}

impl FunctionChunk {
    /// Get a constant from the pool
    pub fn get_constant(&self, idx: ConstantIndex) -> Option<&Constant> {
        self.constants.get(idx as usize)
    }

    /// Get a handler table entry
    pub fn get_handler(&self, idx: HandlerIndex) -> Option<&HandlerEntry> {
        self.handlers.get(idx as usize)
    }

    /// Check the structural contract the VM relies on: jump targets, handler
    /// and constant indices and local slots are in range, and only generator
    /// bodies contain yield instructions. Nested functions are checked too.
    pub fn validate(&self) -> Result<(), JsError> {
        let name = self
            .info
            .name
            .as_ref()
            .map(JsString::as_str)
            .unwrap_or("<anonymous>");
        let len = self.code.len() as u64;

        if self.local_count < self.info.param_count {
            return Err(JsError::decode_error(format!(
                "{}: local_count {} is smaller than param_count {}",
                name, self.local_count, self.info.param_count
            )));
        }

        for (pc, op) in self.code.iter().enumerate() {
            if let Some(target) = op.jump_target()
                && u64::from(target) > len
            {
                return Err(JsError::decode_error(format!(
                    "{}: jump target {} out of range at {}",
                    name, target, pc
                )));
            }
            let bad = match op {
                Op::GetLocal { slot } | Op::SetLocal { slot } => *slot >= self.local_count,
                Op::EnterTry { handler } | Op::LeaveTry { handler } => {
                    self.get_handler(*handler).is_none()
                }
                Op::PushConst { idx } => self.get_constant(*idx).is_none(),
                Op::GetGlobal { name: idx }
                | Op::SetGlobal { name: idx }
                | Op::GetProp { name: idx }
                | Op::SetProp { name: idx }
                | Op::CallMethod { name: idx, .. } => {
                    !matches!(self.get_constant(*idx), Some(Constant::String(_)))
                }
                Op::MakeClosure { idx } => {
                    !matches!(self.get_constant(*idx), Some(Constant::Function(_)))
                }
                Op::Yield | Op::YieldStar => !self.info.is_generator,
                _ => false,
            };
            if bad {
                return Err(JsError::decode_error(format!(
                    "{}: invalid operand in {:?} at {}",
                    name, op, pc
                )));
            }
        }

        for handler in &self.handlers {
            let targets = [Some(handler.start), Some(handler.end)]
                .into_iter()
                .chain([handler.catch_target, handler.finally_target])
                .flatten();
            for target in targets {
                if u64::from(target) > len {
                    return Err(JsError::decode_error(format!(
                        "{}: handler target {} out of range",
                        name, target
                    )));
                }
            }
        }

        for constant in &self.constants {
            if let Constant::Function(chunk) = constant {
                chunk.validate()?;
            }
        }
        Ok(())
    }
}

/// A complete program: the top-level script body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub main: Rc<FunctionChunk>,
}

impl Program {
    pub fn new(main: Rc<FunctionChunk>) -> Self {
        Self { main }
    }

    /// Decode and validate a program produced by an external compiler
    pub fn from_json(json: &str) -> Result<Self, JsError> {
        let program: Program =
            serde_json::from_str(json).map_err(|e| JsError::decode_error(e.to_string()))?;
        program.main.validate()?;
        Ok(program)
    }

    pub fn to_json(&self) -> Result<String, JsError> {
        serde_json::to_string(self).map_err(|e| JsError::decode_error(e.to_string()))
    }
}
