//! Execution frames
//!
//! A [`Frame`] is the live state of one function invocation, bound to a
//! window of the VM's value stack starting at `base`. A [`SavedFrame`] is
//! the same state detached from the stack: a suspended generator owns one
//! and nothing else refers to it.
//!
//! Saved frames store their stack contents and try contexts relative to
//! the frame itself, so attaching one never reads anything from whatever
//! frame happens to be running when the generator is resumed.

use std::rc::Rc;

use crate::compiler::{FunctionChunk, HandlerEntry, HandlerIndex, JumpTarget};
use crate::error::JsError;
use crate::value::JsValue;

use super::completion::Completion;

/// An active try statement
#[derive(Debug, Clone)]
pub struct TryContext {
    /// Handler table index this context was entered for
    pub handler: HandlerIndex,

    /// Cleared once the catch block has been entered
    pub catch_target: Option<JumpTarget>,

    pub finally_target: Option<JumpTarget>,

    /// Where control continues once the try statement has resolved
    pub end: JumpTarget,

    /// Operand depth (relative to the operand base) handlers start at
    pub restore_depth: u32,

    /// Completion buffered while the finally block runs. `Some` exactly
    /// when control is inside this context's finally block.
    pub pending_completion: Option<Completion>,
}

impl TryContext {
    pub fn enter(handler: HandlerIndex, entry: &HandlerEntry) -> Self {
        Self {
            handler,
            catch_target: entry.catch_target,
            finally_target: entry.finally_target,
            end: entry.end,
            restore_depth: entry.restore_depth,
            pending_completion: None,
        }
    }
}

/// Result of routing an abrupt completion within one frame
#[derive(Debug)]
pub enum Routed {
    /// Control was transferred to a catch block, a finally block, or a loop target
    Handled,
    /// No try context absorbed the completion; it leaves the frame
    Escaped(Completion),
}

/// A live invocation bound to the value stack
#[derive(Debug)]
pub struct Frame {
    pub chunk: Rc<FunctionChunk>,

    /// Next instruction to execute
    pub pc: usize,

    /// Absolute stack index of local slot 0
    pub base: usize,

    pub this: JsValue,

    /// Innermost try context last
    pub try_stack: Vec<TryContext>,
}

impl Frame {
    /// Bind a saved frame to the top of `stack`.
    ///
    /// The base is the current stack height, whoever the caller is; all other
    /// state comes from the saved frame.
    pub fn attach(saved: SavedFrame, stack: &mut Vec<JsValue>) -> Self {
        let base = stack.len();
        stack.extend(saved.stack);
        Self {
            chunk: saved.chunk,
            pc: saved.pc,
            base,
            this: saved.this,
            try_stack: saved.try_stack,
        }
    }

    /// Unbind this frame, moving its stack window out of `stack`.
    /// The stack is left at the height it had before `attach`.
    pub fn detach(self, stack: &mut Vec<JsValue>) -> SavedFrame {
        let frame_stack = if self.base <= stack.len() {
            stack.split_off(self.base)
        } else {
            Vec::new()
        };
        SavedFrame {
            chunk: self.chunk,
            pc: self.pc,
            this: self.this,
            stack: frame_stack,
            try_stack: self.try_stack,
        }
    }

    /// Absolute stack index of the first operand slot
    pub fn operand_base(&self) -> usize {
        self.base + self.chunk.local_count as usize
    }

    /// Whether this frame is a generator body
    pub fn is_generator(&self) -> bool {
        self.chunk.info.is_generator
    }

    /// An interrupt currently unwinding through one of this frame's finally blocks
    pub fn interrupt_in_flight(&self) -> Option<&JsError> {
        self.try_stack
            .iter()
            .rev()
            .find_map(|ctx| match &ctx.pending_completion {
                Some(Completion::Throw(err)) if err.is_interrupt() => Some(err),
                _ => None,
            })
    }

    /// Route an abrupt completion through this frame's try contexts,
    /// innermost first.
    ///
    /// A catchable throw enters the nearest catch block. Any abrupt completion
    /// enters the nearest finally block with the completion buffered on its
    /// context. A context whose finally block is already running is discarded
    /// along with its buffered completion: the new completion replaces it.
    pub fn route(&mut self, stack: &mut Vec<JsValue>, completion: Completion) -> Routed {
        let operand_base = self.operand_base();
        loop {
            if let Some((target, try_depth)) = completion.jump()
                && self.try_stack.len() <= try_depth as usize
            {
                self.pc = target as usize;
                return Routed::Handled;
            }

            let Some(ctx) = self.try_stack.last_mut() else {
                return Routed::Escaped(completion);
            };

            if ctx.pending_completion.is_some() {
                self.try_stack.pop();
                continue;
            }

            let restore = operand_base + ctx.restore_depth as usize;

            if let Completion::Throw(err) = &completion
                && err.is_catchable()
                && let Some(catch) = ctx.catch_target.take()
            {
                stack.truncate(restore);
                stack.push(err.to_value());
                self.pc = catch as usize;
                return Routed::Handled;
            }

            if let Some(finally) = ctx.finally_target {
                ctx.catch_target = None;
                ctx.pending_completion = Some(completion);
                stack.truncate(restore);
                self.pc = finally as usize;
                return Routed::Handled;
            }

            self.try_stack.pop();
        }
    }
}

/// A frame detached from the value stack
#[derive(Debug, Clone)]
pub struct SavedFrame {
    pub chunk: Rc<FunctionChunk>,
    pub pc: usize,
    pub this: JsValue,
    /// Locals followed by operands
    pub stack: Vec<JsValue>,
    pub try_stack: Vec<TryContext>,
}

impl SavedFrame {
    /// A frame positioned at the start of `chunk`, with parameters bound
    /// from `args` and the remaining locals undefined
    pub fn new(chunk: Rc<FunctionChunk>, this: JsValue, args: Vec<JsValue>) -> Self {
        let param_count = chunk.info.param_count as usize;
        let mut stack = args;
        stack.truncate(param_count);
        stack.resize(chunk.local_count as usize, JsValue::Undefined);
        Self {
            chunk,
            pc: 0,
            this,
            stack,
            try_stack: Vec::new(),
        }
    }

    /// The innermost completion buffered by a finally block this frame is
    /// suspended in
    pub fn pending_completion(&self) -> Option<&Completion> {
        self.try_stack
            .iter()
            .rev()
            .find_map(|ctx| ctx.pending_completion.as_ref())
    }
}
