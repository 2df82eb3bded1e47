//! Bytecode format and code generation helpers
//!
//! Source-level compilation is left to an external compiler; this module
//! defines the program format the VM executes and a builder that emits
//! structured control flow (try/catch/finally, loops, yield) with correct
//! handler tables.

mod builder;
mod bytecode;

pub use builder::{FunctionBuilder, Label, LoopLabels};
pub use bytecode::{
    Constant, ConstantIndex, FunctionChunk, FunctionInfo, HandlerEntry, HandlerIndex, JumpTarget,
    LocalSlot, Op, Program,
};
