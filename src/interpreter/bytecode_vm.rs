//! Bytecode interpreter loop
//!
//! Executes instructions against the active frame, performs calls and
//! returns, and routes abrupt completions (`return`, `throw`, `break`,
//! `continue`) through try contexts and finally blocks. A generator body
//! is always the entry frame of a `Vm::execute` call, so suspending it
//! simply detaches that frame and hands it back to the caller.

use std::rc::Rc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::compiler::{Constant, ConstantIndex, FunctionChunk, JumpTarget, Op};
use crate::error::JsError;
use crate::value::{Callable, JsObject, JsString, JsValue, ObjectKind};

use super::builtins::generator;
use super::completion::Completion;
use super::frame::{Frame, Routed, SavedFrame, TryContext};
use super::{ExecOutcome, Vm};

/// Result of executing one instruction
enum Flow {
    /// Continue with the next instruction
    Next,
    /// An abrupt completion to route through try contexts
    Abrupt(Completion),
    /// Leave the run loop
    Exit(ExecOutcome),
}

/// The callable behind a function value
pub(crate) fn callable_of(value: &JsValue) -> Option<Callable> {
    match value {
        JsValue::Object(obj) => match &obj.borrow().kind {
            ObjectKind::Function(callable) => Some(callable.clone()),
            _ => None,
        },
        _ => None,
    }
}

impl Vm {
    /// Attach `saved` on top of the stack and run it until it returns,
    /// suspends, or throws.
    ///
    /// `input` is `None` to start a frame at its first instruction. When
    /// resuming a suspended generator, a normal completion delivers its value
    /// as the result of the pending `yield`; an abrupt one is routed from the
    /// suspension point as if the `yield` had produced it.
    pub(crate) fn execute(
        &mut self,
        saved: SavedFrame,
        input: Option<Completion>,
    ) -> Result<ExecOutcome, JsError> {
        let outermost = self.frames.is_empty();
        if outermost {
            self.execution_start = Some(Instant::now());
        }
        let result = self.reenter(|vm| vm.execute_attached(saved, input));
        if outermost {
            self.execution_start = None;
        }
        result
    }

    fn execute_attached(
        &mut self,
        saved: SavedFrame,
        input: Option<Completion>,
    ) -> Result<ExecOutcome, JsError> {
        if self.frames.len() >= self.config.max_call_depth {
            return Err(JsError::range_error("Maximum call stack size exceeded"));
        }
        if self.stack.len() + saved.stack.len() > self.config.max_stack_size {
            return Err(JsError::range_error("Maximum stack size exceeded"));
        }

        let entry_depth = self.frames.len();
        let frame = Frame::attach(saved, &mut self.stack);
        trace!(
            target: "genvm::generator",
            base = frame.base,
            pc = frame.pc,
            try_depth = frame.try_stack.len(),
            "frame attached"
        );
        self.frames.push(frame);

        let first = match input {
            None => self.check_interrupt().err().map(Completion::Throw),
            Some(Completion::Normal(value)) => {
                self.stack.push(value);
                None
            }
            Some(abrupt) => Some(abrupt),
        };

        let result = self.run(entry_depth, first);
        if result.is_err() {
            self.abandon(entry_depth);
        }
        result
    }

    /// Drop every frame above `entry_depth`, restoring the stack beneath them
    fn abandon(&mut self, entry_depth: usize) {
        while self.frames.len() > entry_depth {
            if let Some(frame) = self.frames.pop() {
                self.stack.truncate(frame.base);
            }
        }
    }

    fn run(
        &mut self,
        entry_depth: usize,
        first: Option<Completion>,
    ) -> Result<ExecOutcome, JsError> {
        let mut pending = first;
        loop {
            if let Some(completion) = pending.take() {
                if let Some(outcome) = self.unwind(completion, entry_depth)? {
                    return Ok(outcome);
                }
                continue;
            }

            match self.step(entry_depth) {
                Ok(Flow::Next) => {}
                Ok(Flow::Abrupt(completion)) => pending = Some(completion),
                Ok(Flow::Exit(outcome)) => return Ok(outcome),
                Err(err) => pending = Some(Completion::Throw(err)),
            }
        }
    }

    /// Route an abrupt completion outward, frame by frame, until a try
    /// context absorbs it or it leaves the entry frame
    fn unwind(
        &mut self,
        completion: Completion,
        entry_depth: usize,
    ) -> Result<Option<ExecOutcome>, JsError> {
        let mut completion = completion;
        loop {
            let frame = self
                .frames
                .last_mut()
                .ok_or_else(|| JsError::internal_error("no active frame"))?;
            completion = match frame.route(&mut self.stack, completion) {
                Routed::Handled => return Ok(None),
                Routed::Escaped(completion) => completion,
            };

            let frame = self
                .frames
                .pop()
                .ok_or_else(|| JsError::internal_error("no active frame"))?;
            self.stack.truncate(frame.base);
            let at_entry = self.frames.len() <= entry_depth;

            match completion {
                Completion::Return(value) | Completion::Normal(value) => {
                    if at_entry {
                        return Ok(Some(ExecOutcome::Returned(value)));
                    }
                    self.stack.push(value);
                    return Ok(None);
                }
                Completion::Throw(err) => {
                    if at_entry {
                        return Err(err);
                    }
                    completion = Completion::Throw(err);
                }
                Completion::Break { .. } | Completion::Continue { .. } => {
                    let err = JsError::internal_error("break or continue outside of a loop");
                    if at_entry {
                        return Err(err);
                    }
                    completion = Completion::Throw(err);
                }
            }
        }
    }

    /// Deliver a pending interrupt request or an expired timeout
    pub(crate) fn check_interrupt(&self) -> Result<(), JsError> {
        if let Some(reason) = self.interrupt.take() {
            debug!(target: "genvm::vm", %reason, "interrupt delivered");
            return Err(JsError::Interrupted { reason });
        }

        // Skip check if timeout is disabled
        if self.config.timeout_ms == 0 {
            return Ok(());
        }

        if let Some(start) = self.execution_start {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            if elapsed_ms > self.config.timeout_ms {
                debug!(target: "genvm::vm", elapsed_ms, "timeout delivered");
                return Err(JsError::Timeout {
                    timeout_ms: self.config.timeout_ms,
                    elapsed_ms,
                });
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Stack helpers
    // ═══════════════════════════════════════════════════════════════════════════════

    fn frame(&self) -> Result<&Frame, JsError> {
        self.frames
            .last()
            .ok_or_else(|| JsError::internal_error("no active frame"))
    }

    fn frame_mut(&mut self) -> Result<&mut Frame, JsError> {
        self.frames
            .last_mut()
            .ok_or_else(|| JsError::internal_error("no active frame"))
    }

    fn push(&mut self, value: JsValue) -> Result<(), JsError> {
        if self.stack.len() >= self.config.max_stack_size {
            return Err(JsError::range_error("Maximum stack size exceeded"));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<JsValue, JsError> {
        let floor = self.frame()?.operand_base();
        if self.stack.len() <= floor {
            return Err(JsError::internal_error("operand stack underflow"));
        }
        self.stack
            .pop()
            .ok_or_else(|| JsError::internal_error("operand stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<JsValue>, JsError> {
        let floor = self.frame()?.operand_base();
        if self.stack.len() < floor + n {
            return Err(JsError::internal_error("operand stack underflow"));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    fn peek(&self) -> Result<&JsValue, JsError> {
        let floor = self.frame()?.operand_base();
        if self.stack.len() <= floor {
            return Err(JsError::internal_error("operand stack underflow"));
        }
        self.stack
            .last()
            .ok_or_else(|| JsError::internal_error("operand stack underflow"))
    }

    fn local_index(&self, slot: u16) -> Result<usize, JsError> {
        let frame = self.frame()?;
        if slot >= frame.chunk.local_count {
            return Err(JsError::internal_error(format!(
                "local slot {} out of range",
                slot
            )));
        }
        Ok(frame.base + slot as usize)
    }

    fn constant(&self, idx: ConstantIndex) -> Result<Constant, JsError> {
        self.frame()?
            .chunk
            .get_constant(idx)
            .cloned()
            .ok_or_else(|| JsError::internal_error(format!("constant {} out of range", idx)))
    }

    fn name_constant(&self, idx: ConstantIndex) -> Result<JsString, JsError> {
        match self.constant(idx)? {
            Constant::String(name) => Ok(name),
            _ => Err(JsError::internal_error(format!(
                "constant {} is not a name",
                idx
            ))),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Instruction dispatch
    // ═══════════════════════════════════════════════════════════════════════════════

    fn step(&mut self, entry_depth: usize) -> Result<Flow, JsError> {
        let frame = self.frame_mut()?;
        let pc = frame.pc;
        let Some(&op) = frame.chunk.code.get(pc) else {
            // Running off the end of the code returns undefined
            return Ok(Flow::Abrupt(Completion::Return(JsValue::Undefined)));
        };
        frame.pc = pc + 1;

        match op {
            Op::PushUndefined => self.push(JsValue::Undefined)?,
            Op::PushNull => self.push(JsValue::Null)?,
            Op::PushBool { value } => self.push(JsValue::Boolean(value))?,
            Op::PushInt { value } => self.push(JsValue::Number(f64::from(value)))?,
            Op::PushConst { idx } => {
                let value = match self.constant(idx)? {
                    Constant::String(s) => JsValue::String(s),
                    Constant::Number(n) => JsValue::Number(n),
                    Constant::Function(chunk) => JsValue::function(chunk),
                };
                self.push(value)?;
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::Dup => {
                let value = self.peek()?.clone();
                self.push(value)?;
            }
            Op::Swap => {
                let top = self.pop()?;
                let below = self.pop()?;
                self.stack.push(top);
                self.stack.push(below);
            }

            Op::GetLocal { slot } => {
                let idx = self.local_index(slot)?;
                let value = self
                    .stack
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| JsError::internal_error("local slot missing"))?;
                self.push(value)?;
            }
            Op::SetLocal { slot } => {
                let idx = self.local_index(slot)?;
                let value = self.pop()?;
                let slot = self
                    .stack
                    .get_mut(idx)
                    .ok_or_else(|| JsError::internal_error("local slot missing"))?;
                *slot = value;
            }
            Op::GetGlobal { name } => {
                let name = self.name_constant(name)?;
                let value = self
                    .get_global(name.as_str())
                    .ok_or_else(|| JsError::reference_error(name.as_str()))?;
                self.push(value)?;
            }
            Op::SetGlobal { name } => {
                let name = self.name_constant(name)?;
                let value = self.pop()?;
                self.set_global(name.as_str(), value);
            }

            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::StrictEq
            | Op::StrictNotEq
            | Op::Lt
            | Op::LtEq
            | Op::Gt => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.push(binary_op(op, &left, &right))?;
            }
            Op::Not => {
                let value = self.pop()?;
                self.push(JsValue::Boolean(!value.to_boolean()))?;
            }
            Op::Neg => {
                let value = self.pop()?;
                self.push(JsValue::Number(-value.to_number()))?;
            }

            Op::NewObject => self.push(JsValue::object(JsObject::ordinary()))?,
            Op::NewArray { count } => {
                let values = self.pop_n(count as usize)?;
                self.push(JsValue::array(values))?;
            }
            Op::GetProp { name } => {
                let name = self.name_constant(name)?;
                let target = self.pop()?;
                let value = self.get_property(&target, name.as_str())?;
                self.push(value)?;
            }
            Op::SetProp { name } => {
                let name = self.name_constant(name)?;
                let value = self.pop()?;
                let target = self.pop()?;
                self.set_property(&target, name, value)?;
            }

            Op::Jump { target } => self.jump(pc, target)?,
            Op::JumpIfTrue { target } => {
                if self.pop()?.to_boolean() {
                    self.jump(pc, target)?;
                }
            }
            Op::JumpIfFalse { target } => {
                if !self.pop()?.to_boolean() {
                    self.jump(pc, target)?;
                }
            }
            Op::Break { target, try_depth } => {
                return Ok(Flow::Abrupt(Completion::Break { target, try_depth }));
            }
            Op::Continue { target, try_depth } => {
                self.check_interrupt()?;
                return Ok(Flow::Abrupt(Completion::Continue { target, try_depth }));
            }

            Op::Call { argc } => {
                let args = self.pop_n(argc as usize)?;
                let callee = self.pop()?;
                self.call_value(callee, JsValue::Undefined, args)?;
            }
            Op::CallMethod { name, argc } => {
                let name = self.name_constant(name)?;
                let args = self.pop_n(argc as usize)?;
                let receiver = self.pop()?;
                let method = self.get_property(&receiver, name.as_str())?;
                if !method.is_callable() {
                    return Err(JsError::type_error(format!(
                        "{}.{} is not a function",
                        receiver, name
                    )));
                }
                self.call_value(method, receiver, args)?;
            }
            Op::MakeClosure { idx } => match self.constant(idx)? {
                Constant::Function(chunk) => self.push(JsValue::function(chunk))?,
                _ => {
                    return Err(JsError::internal_error(format!(
                        "constant {} is not a function",
                        idx
                    )));
                }
            },
            Op::Return => {
                let value = self.pop()?;
                return Ok(Flow::Abrupt(Completion::Return(value)));
            }
            Op::Throw => {
                let value = self.pop()?;
                return Ok(Flow::Abrupt(Completion::Throw(JsError::Thrown(value))));
            }

            Op::EnterTry { handler } => {
                let frame = self.frame_mut()?;
                let entry = frame.chunk.get_handler(handler).copied().ok_or_else(|| {
                    JsError::internal_error(format!("handler {} out of range", handler))
                })?;
                frame.try_stack.push(TryContext::enter(handler, &entry));
            }
            Op::LeaveTry { handler } => {
                let frame = self.frame_mut()?;
                let Some(ctx) = frame.try_stack.last_mut() else {
                    return Err(JsError::internal_error("LeaveTry without a try context"));
                };
                if ctx.handler != handler || ctx.pending_completion.is_some() {
                    return Err(JsError::internal_error(format!(
                        "LeaveTry for handler {} does not match the active try context",
                        handler
                    )));
                }
                match ctx.finally_target {
                    Some(finally) => {
                        ctx.catch_target = None;
                        ctx.pending_completion = Some(Completion::Normal(JsValue::Undefined));
                        frame.pc = finally as usize;
                    }
                    None => {
                        let end = ctx.end;
                        frame.try_stack.pop();
                        frame.pc = end as usize;
                    }
                }
            }
            Op::EndFinally => {
                let frame = self.frame_mut()?;
                let ctx = frame
                    .try_stack
                    .pop()
                    .ok_or_else(|| JsError::internal_error("EndFinally without a try context"))?;
                match ctx.pending_completion {
                    Some(Completion::Normal(_)) => frame.pc = ctx.end as usize,
                    Some(completion) => return Ok(Flow::Abrupt(completion)),
                    None => {
                        return Err(JsError::internal_error(
                            "EndFinally outside of a finally block",
                        ));
                    }
                }
            }

            Op::Yield => {
                let value = self.pop()?;
                let frame = self.suspend(entry_depth)?;
                return Ok(Flow::Exit(ExecOutcome::Yielded { value, frame }));
            }
            Op::YieldStar => {
                let iterable = self.pop()?;
                let frame = self.suspend(entry_depth)?;
                return Ok(Flow::Exit(ExecOutcome::Delegating { iterable, frame }));
            }
        }

        Ok(Flow::Next)
    }

    fn jump(&mut self, from: usize, target: JumpTarget) -> Result<(), JsError> {
        // Backward jumps are interrupt safe points
        if target as usize <= from {
            self.check_interrupt()?;
        }
        self.frame_mut()?.pc = target as usize;
        Ok(())
    }

    /// Detach the entry frame at a yield point
    fn suspend(&mut self, entry_depth: usize) -> Result<SavedFrame, JsError> {
        let frame = self.frame()?;
        if self.frames.len() != entry_depth + 1 || !frame.is_generator() {
            return Err(JsError::internal_error("yield outside of a generator body"));
        }
        // An interrupt unwinding through a finally block is not suspended
        if let Some(err) = frame.interrupt_in_flight() {
            return Err(err.clone());
        }

        let frame = self
            .frames
            .pop()
            .ok_or_else(|| JsError::internal_error("no active frame"))?;
        let saved = frame.detach(&mut self.stack);
        trace!(
            target: "genvm::generator",
            pc = saved.pc,
            stack = saved.stack.len(),
            try_depth = saved.try_stack.len(),
            "frame detached"
        );
        Ok(saved)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Calls
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Call from bytecode: bytecode functions run inline on a new frame,
    /// everything else leaves its result on the caller's operand stack
    fn call_value(
        &mut self,
        callee: JsValue,
        this: JsValue,
        args: Vec<JsValue>,
    ) -> Result<(), JsError> {
        let callable = callable_of(&callee)
            .ok_or_else(|| JsError::type_error(format!("{} is not a function", callee)))?;
        match callable {
            Callable::Native(native) => {
                let result = (native.func)(self, this, &args)?;
                self.push(result)
            }
            Callable::Bytecode(chunk) if chunk.info.is_generator => {
                let generator = generator::create(chunk, this, args);
                self.push(generator)
            }
            Callable::Bytecode(chunk) => self.push_frame(chunk, this, args),
        }
    }

    fn push_frame(
        &mut self,
        chunk: Rc<FunctionChunk>,
        this: JsValue,
        args: Vec<JsValue>,
    ) -> Result<(), JsError> {
        if self.frames.len() >= self.config.max_call_depth {
            return Err(JsError::range_error("Maximum call stack size exceeded"));
        }
        if self.stack.len() + chunk.local_count as usize > self.config.max_stack_size {
            return Err(JsError::range_error("Maximum stack size exceeded"));
        }
        let frame = Frame::attach(SavedFrame::new(chunk, this, args), &mut self.stack);
        self.frames.push(frame);
        // Function entry is an interrupt safe point
        self.check_interrupt()
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Properties
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Read a property: own properties first, then the methods and
    /// attributes built into the object's kind
    pub fn get_property(&self, target: &JsValue, key: &str) -> Result<JsValue, JsError> {
        let obj = match target {
            JsValue::Undefined | JsValue::Null => {
                return Err(JsError::type_error(format!(
                    "Cannot read properties of {} (reading '{}')",
                    target, key
                )));
            }
            JsValue::String(s) if key == "length" => {
                return Ok(JsValue::Number(s.as_str().chars().count() as f64));
            }
            JsValue::Object(obj) => obj,
            _ => return Ok(JsValue::Undefined),
        };

        let obj = obj.borrow();
        if let Some(value) = obj.get(key) {
            return Ok(value.clone());
        }

        let intrinsics = &self.intrinsics;
        let value = match (&obj.kind, key) {
            (ObjectKind::Array(values), "length") => JsValue::Number(values.len() as f64),
            (ObjectKind::Array(_), "push") => intrinsics.array_push.clone(),
            (ObjectKind::Array(values), _) => key
                .parse::<usize>()
                .ok()
                .and_then(|index| values.get(index).cloned())
                .unwrap_or_default(),
            (ObjectKind::Generator(_), "next") => intrinsics.generator_next.clone(),
            (ObjectKind::Generator(_), "return") => intrinsics.generator_return.clone(),
            (ObjectKind::Generator(_), "throw") => intrinsics.generator_throw.clone(),
            (ObjectKind::ArrayIterator { .. }, "next") => intrinsics.array_iterator_next.clone(),
            (ObjectKind::Function(callable), "name") => JsValue::from(callable.name()),
            _ => JsValue::Undefined,
        };
        Ok(value)
    }

    /// Write an own property
    pub fn set_property(
        &mut self,
        target: &JsValue,
        key: JsString,
        value: JsValue,
    ) -> Result<(), JsError> {
        match target {
            JsValue::Undefined | JsValue::Null => Err(JsError::type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                target, key
            ))),
            JsValue::Object(obj) => {
                obj.borrow_mut().set(key, value);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn binary_op(op: Op, left: &JsValue, right: &JsValue) -> JsValue {
    match op {
        Op::Add => {
            let stringy = |v: &JsValue| matches!(v, JsValue::String(_) | JsValue::Object(_));
            if stringy(left) || stringy(right) {
                JsValue::from(format!("{}{}", left.to_js_string(), right.to_js_string()))
            } else {
                JsValue::Number(left.to_number() + right.to_number())
            }
        }
        Op::Sub => JsValue::Number(left.to_number() - right.to_number()),
        Op::Mul => JsValue::Number(left.to_number() * right.to_number()),
        Op::Div => JsValue::Number(left.to_number() / right.to_number()),
        Op::Mod => JsValue::Number(libm::fmod(left.to_number(), right.to_number())),
        Op::StrictEq => JsValue::Boolean(left.strict_equals(right)),
        Op::StrictNotEq => JsValue::Boolean(!left.strict_equals(right)),
        Op::Lt => JsValue::Boolean(compare(left, right, |o| o.is_lt())),
        Op::LtEq => JsValue::Boolean(compare(left, right, |o| o.is_le())),
        Op::Gt => JsValue::Boolean(compare(left, right, |o| o.is_gt())),
        _ => JsValue::Undefined,
    }
}

/// Relational comparison; strings compare by code units, anything else numerically
fn compare(left: &JsValue, right: &JsValue, test: fn(std::cmp::Ordering) -> bool) -> bool {
    match (left, right) {
        (JsValue::String(a), JsValue::String(b)) => test(a.as_str().cmp(b.as_str())),
        _ => left
            .to_number()
            .partial_cmp(&right.to_number())
            .is_some_and(test),
    }
}
