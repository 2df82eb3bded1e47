//! FunctionBuilder - helper for emitting bytecode instructions
//!
//! Provides a convenient API for building function chunks with operand
//! depth tracking, label patching and structured try/catch/finally emission.
//! Handler `restore_depth` values are taken from the tracked depth, so
//! handler tables are correct by construction.

use super::bytecode::{
    Constant, ConstantIndex, FunctionChunk, FunctionInfo, HandlerEntry, HandlerIndex, JumpTarget,
    LocalSlot, Op,
};
use crate::error::JsError;
use crate::value::JsString;
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// A forward or backward jump destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Jump destinations of the innermost loop, handed to the loop body
#[derive(Debug, Clone, Copy)]
pub struct LoopLabels {
    pub break_label: Label,
    pub continue_label: Label,
    /// Try contexts live when the loop started
    try_depth: u16,
    /// Operand depth at the loop head
    depth: u32,
}

/// Boxed code-emitting callback for optional try statement clauses
pub type Clause<'a> = Box<dyn FnOnce(&mut FunctionBuilder) + 'a>;

/// Builder for constructing function chunks
pub struct FunctionBuilder {
    info: FunctionInfo,

    /// Bytecode instructions
    code: Vec<Op>,

    /// Constant pool
    constants: Vec<Constant>,

    /// String constant deduplication map
    string_map: FxHashMap<JsString, ConstantIndex>,

    /// Exception-handler table
    handlers: Vec<HandlerEntry>,

    /// Named local slots
    locals: FxHashMap<JsString, LocalSlot>,
    local_count: u16,

    /// Bound label positions
    labels: Vec<Option<JumpTarget>>,

    /// Jumps waiting for their label: (instruction index, label)
    patches: Vec<(usize, Label)>,

    /// Tracked operand stack depth
    depth: u32,

    /// Try statements currently open
    try_depth: u16,

    /// First misuse encountered, reported by `finish`
    error: Option<JsError>,
}

impl FunctionBuilder {
    /// Create a builder for an ordinary function
    pub fn new(name: &str, params: &[&str]) -> Self {
        Self::with_info(
            FunctionInfo::regular(Some(JsString::from(name)), params.len() as u16),
            params,
        )
    }

    /// Create a builder for a generator function
    pub fn generator(name: &str, params: &[&str]) -> Self {
        Self::with_info(
            FunctionInfo::generator(Some(JsString::from(name)), params.len() as u16),
            params,
        )
    }

    /// Create a builder for a top-level script body
    pub fn script() -> Self {
        Self::with_info(FunctionInfo::regular(None, 0), &[])
    }

    fn with_info(info: FunctionInfo, params: &[&str]) -> Self {
        let mut builder = Self {
            info,
            code: Vec::new(),
            constants: Vec::new(),
            string_map: FxHashMap::default(),
            handlers: Vec::new(),
            locals: FxHashMap::default(),
            local_count: 0,
            labels: Vec::new(),
            patches: Vec::new(),
            depth: 0,
            try_depth: 0,
            error: None,
        };
        for param in params {
            builder.local(param);
        }
        builder
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(JsError::internal_error(message));
        }
    }

    /// Current instruction offset
    pub fn pc(&self) -> JumpTarget {
        self.code.len() as JumpTarget
    }

    /// Current tracked operand depth
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Emit an instruction and return its index
    pub fn emit(&mut self, op: Op) -> usize {
        let index = self.code.len();
        let depth = i64::from(self.depth) + i64::from(op.stack_effect());
        if depth < 0 {
            self.fail(format!("operand stack underflow at {} ({:?})", index, op));
            self.depth = 0;
        } else {
            self.depth = depth as u32;
        }
        if matches!(op, Op::Yield | Op::YieldStar) && !self.info.is_generator {
            self.fail(format!("yield outside of a generator at {}", index));
        }
        self.code.push(op);
        index
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Constants & Locals
    // ═══════════════════════════════════════════════════════════════════════════════

    fn add_constant(&mut self, constant: Constant) -> ConstantIndex {
        let idx = self.constants.len();
        if idx > ConstantIndex::MAX as usize {
            self.fail("too many constants (max 65536)".to_string());
            return 0;
        }
        self.constants.push(constant);
        idx as ConstantIndex
    }

    /// Add a string constant, deduplicated
    pub fn string_constant(&mut self, s: &str) -> ConstantIndex {
        if let Some(&idx) = self.string_map.get(s) {
            return idx;
        }
        let key = JsString::from(s);
        let idx = self.add_constant(Constant::String(key.clone()));
        self.string_map.insert(key, idx);
        idx
    }

    /// Slot of a named local, declaring it on first use
    pub fn local(&mut self, name: &str) -> LocalSlot {
        if let Some(&slot) = self.locals.get(name) {
            return slot;
        }
        let slot = self.local_count;
        match self.local_count.checked_add(1) {
            Some(count) => self.local_count = count,
            None => self.fail("too many locals (max 65535)".to_string()),
        }
        self.locals.insert(JsString::from(name), slot);
        slot
    }

    pub fn push_undefined(&mut self) {
        self.emit(Op::PushUndefined);
    }

    pub fn push_null(&mut self) {
        self.emit(Op::PushNull);
    }

    pub fn push_bool(&mut self, value: bool) {
        self.emit(Op::PushBool { value });
    }

    pub fn push_int(&mut self, value: i32) {
        self.emit(Op::PushInt { value });
    }

    pub fn push_number(&mut self, value: f64) {
        let idx = self.add_constant(Constant::Number(value));
        self.emit(Op::PushConst { idx });
    }

    pub fn push_str(&mut self, s: &str) {
        let idx = self.string_constant(s);
        self.emit(Op::PushConst { idx });
    }

    pub fn pop(&mut self) {
        self.emit(Op::Pop);
    }

    pub fn dup(&mut self) {
        self.emit(Op::Dup);
    }

    pub fn get_local(&mut self, name: &str) {
        let slot = self.local(name);
        self.emit(Op::GetLocal { slot });
    }

    pub fn set_local(&mut self, name: &str) {
        let slot = self.local(name);
        self.emit(Op::SetLocal { slot });
    }

    pub fn get_global(&mut self, name: &str) {
        let name = self.string_constant(name);
        self.emit(Op::GetGlobal { name });
    }

    pub fn set_global(&mut self, name: &str) {
        let name = self.string_constant(name);
        self.emit(Op::SetGlobal { name });
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Objects & Calls
    // ═══════════════════════════════════════════════════════════════════════════════

    pub fn new_object(&mut self) {
        self.emit(Op::NewObject);
    }

    pub fn new_array(&mut self, count: u16) {
        self.emit(Op::NewArray { count });
    }

    pub fn get_prop(&mut self, name: &str) {
        let name = self.string_constant(name);
        self.emit(Op::GetProp { name });
    }

    pub fn set_prop(&mut self, name: &str) {
        let name = self.string_constant(name);
        self.emit(Op::SetProp { name });
    }

    /// Call with `[callee, args..]` on the stack
    pub fn call(&mut self, argc: u8) {
        self.emit(Op::Call { argc });
    }

    /// Call `receiver.name(args..)` with `[receiver, args..]` on the stack
    pub fn call_method(&mut self, name: &str, argc: u8) {
        let name = self.string_constant(name);
        self.emit(Op::CallMethod { name, argc });
    }

    /// Push a function value for a nested chunk
    pub fn make_closure(&mut self, chunk: Rc<FunctionChunk>) {
        let idx = self.add_constant(Constant::Function(chunk));
        self.emit(Op::MakeClosure { idx });
    }

    pub fn ret(&mut self) {
        self.emit(Op::Return);
    }

    pub fn throw(&mut self) {
        self.emit(Op::Throw);
    }

    pub fn yield_(&mut self) {
        self.emit(Op::Yield);
    }

    pub fn yield_star(&mut self) {
        self.emit(Op::YieldStar);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Labels & Jumps
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Create an unbound label
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind a label to the current offset
    pub fn bind(&mut self, label: Label) {
        let pc = self.pc();
        match self.labels.get_mut(label.0) {
            Some(slot @ None) => *slot = Some(pc),
            Some(Some(_)) => self.fail(format!("label {} bound twice", label.0)),
            None => self.fail(format!("unknown label {}", label.0)),
        }
    }

    fn emit_to(&mut self, op: Op, label: Label) {
        let index = self.emit(op);
        self.patches.push((index, label));
    }

    pub fn jump(&mut self, label: Label) {
        self.emit_to(Op::Jump { target: 0 }, label);
    }

    pub fn jump_if_true(&mut self, label: Label) {
        self.emit_to(Op::JumpIfTrue { target: 0 }, label);
    }

    pub fn jump_if_false(&mut self, label: Label) {
        self.emit_to(Op::JumpIfFalse { target: 0 }, label);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Structured Control Flow
    // ═══════════════════════════════════════════════════════════════════════════════

    /// `if (pop) { then }`
    pub fn if_(&mut self, then: impl FnOnce(&mut Self)) {
        let end = self.label();
        self.jump_if_false(end);
        let before = self.depth;
        then(self);
        self.expect_depth(before, "if branch");
        self.bind(end);
    }

    /// `if (pop) { then } else { otherwise }`
    pub fn if_else(&mut self, then: impl FnOnce(&mut Self), otherwise: impl FnOnce(&mut Self)) {
        let else_label = self.label();
        let end = self.label();
        self.jump_if_false(else_label);
        let before = self.depth;
        then(self);
        let after_then = self.depth;
        self.jump(end);
        self.bind(else_label);
        self.depth = before;
        otherwise(self);
        self.expect_depth(after_then, "else branch");
        self.bind(end);
    }

    /// `while (cond) { body }`; `cond` must push exactly one value
    pub fn while_(
        &mut self,
        cond: impl FnOnce(&mut Self),
        body: impl FnOnce(&mut Self, &LoopLabels),
    ) {
        let labels = LoopLabels {
            break_label: self.label(),
            continue_label: self.label(),
            try_depth: self.try_depth,
            depth: self.depth,
        };
        self.bind(labels.continue_label);
        cond(self);
        self.jump_if_false(labels.break_label);
        body(self, &labels);
        self.expect_depth(labels.depth, "loop body");
        self.jump(labels.continue_label);
        self.bind(labels.break_label);
    }

    /// `break` out of the loop described by `labels`
    pub fn break_(&mut self, labels: &LoopLabels) {
        self.loop_exit(labels, "break");
        self.emit_to(
            Op::Break {
                target: 0,
                try_depth: labels.try_depth,
            },
            labels.break_label,
        );
    }

    /// `continue` the loop described by `labels`
    pub fn continue_(&mut self, labels: &LoopLabels) {
        self.loop_exit(labels, "continue");
        self.emit_to(
            Op::Continue {
                target: 0,
                try_depth: labels.try_depth,
            },
            labels.continue_label,
        );
    }

    fn loop_exit(&mut self, labels: &LoopLabels, what: &str) {
        if self.try_depth < labels.try_depth {
            self.fail(format!("{} outside of its loop", what));
        }
        self.expect_depth(labels.depth, what);
    }

    fn expect_depth(&mut self, expected: u32, what: &str) {
        if self.depth != expected {
            let message = format!(
                "{} leaves operand depth {} (expected {})",
                what, self.depth, expected
            );
            self.fail(message);
            self.depth = expected;
        }
    }

    /// `try { body } catch (e) { catch }`; the exception is on the stack when
    /// `catch` starts and must be consumed by it
    pub fn try_catch<'a>(
        &mut self,
        body: impl FnOnce(&mut Self) + 'a,
        catch: impl FnOnce(&mut Self) + 'a,
    ) {
        self.try_statement(Box::new(body), Some(Box::new(catch)), None);
    }

    /// `try { body } finally { finally }`
    pub fn try_finally<'a>(
        &mut self,
        body: impl FnOnce(&mut Self) + 'a,
        finally: impl FnOnce(&mut Self) + 'a,
    ) {
        self.try_statement(Box::new(body), None, Some(Box::new(finally)));
    }

    /// `try { body } catch (e) { catch } finally { finally }`
    pub fn try_catch_finally<'a>(
        &mut self,
        body: impl FnOnce(&mut Self) + 'a,
        catch: impl FnOnce(&mut Self) + 'a,
        finally: impl FnOnce(&mut Self) + 'a,
    ) {
        self.try_statement(
            Box::new(body),
            Some(Box::new(catch)),
            Some(Box::new(finally)),
        );
    }

    /// Emit a try statement and its handler table entry
    pub fn try_statement<'a>(
        &mut self,
        body: Clause<'a>,
        catch: Option<Clause<'a>>,
        finally: Option<Clause<'a>>,
    ) {
        if catch.is_none() && finally.is_none() {
            self.fail("try statement without catch or finally".to_string());
        }
        let Ok(handler) = HandlerIndex::try_from(self.handlers.len()) else {
            self.fail("too many try statements (max 65536)".to_string());
            return;
        };
        let restore = self.depth;
        self.handlers.push(HandlerEntry {
            start: 0,
            end: 0,
            catch_target: None,
            finally_target: None,
            restore_depth: restore,
        });

        self.emit(Op::EnterTry { handler });
        let start = self.pc();
        self.update_handler(handler, |entry| entry.start = start);
        self.try_depth += 1;

        body(self);
        self.expect_depth(restore, "try block");
        self.emit(Op::LeaveTry { handler });

        if let Some(catch) = catch {
            let target = self.pc();
            self.update_handler(handler, |entry| entry.catch_target = Some(target));
            self.depth = restore + 1;
            catch(self);
            self.expect_depth(restore, "catch block");
            self.emit(Op::LeaveTry { handler });
        }

        if let Some(finally) = finally {
            let target = self.pc();
            self.update_handler(handler, |entry| entry.finally_target = Some(target));
            self.depth = restore;
            finally(self);
            self.expect_depth(restore, "finally block");
            self.emit(Op::EndFinally);
        }

        self.try_depth -= 1;
        let end = self.pc();
        self.update_handler(handler, |entry| entry.end = end);
    }

    fn update_handler(&mut self, handler: HandlerIndex, f: impl FnOnce(&mut HandlerEntry)) {
        match self.handlers.get_mut(handler as usize) {
            Some(entry) => f(entry),
            None => self.fail(format!("unknown handler {}", handler)),
        }
    }

    /// Finish the function: append an implicit `return undefined`, patch
    /// jumps and report the first misuse, if any
    pub fn finish(mut self) -> Result<Rc<FunctionChunk>, JsError> {
        self.emit(Op::PushUndefined);
        self.emit(Op::Return);

        for &(index, label) in &self.patches {
            let target = match self.labels.get(label.0) {
                Some(Some(target)) => *target,
                _ => {
                    return Err(JsError::internal_error(format!(
                        "unbound label {} used at {}",
                        label.0, index
                    )));
                }
            };
            let patched = self
                .code
                .get_mut(index)
                .is_some_and(|op| op.set_jump_target(target));
            if !patched {
                return Err(JsError::internal_error(format!(
                    "instruction {} is not a jump",
                    index
                )));
            }
        }

        if let Some(error) = self.error {
            return Err(error);
        }

        Ok(Rc::new(FunctionChunk {
            info: self.info,
            code: self.code,
            constants: self.constants,
            handlers: self.handlers,
            local_count: self.local_count,
        }))
    }
}
