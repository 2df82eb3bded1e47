//! Virtual machine for executing bytecode programs
//!
//! The [`Vm`] owns one value stack shared by every live frame. Ordinary
//! calls push frames on top of the caller; generator bodies are attached
//! to the top of the stack when resumed and detached again when they
//! suspend, so a suspended generator never shares stack slots with anyone.

// Builtin function implementations (split into separate files)
pub mod builtins;

mod bytecode_vm;
pub mod completion;
pub mod frame;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::compiler::Program;
use crate::config::VmConfig;
use crate::error::JsError;
use crate::value::{Callable, JsString, JsValue};

use builtins::Intrinsics;
use builtins::generator::{self, GeneratorState};
use builtins::iterator::IterResult;
use completion::Completion;
use frame::{Frame, SavedFrame};

/// How a call to `Vm::execute` ended
pub(crate) enum ExecOutcome {
    /// The entry frame returned
    Returned(JsValue),
    /// The entry frame (a generator body) suspended at `Yield`
    Yielded { value: JsValue, frame: SavedFrame },
    /// The entry frame suspended at `YieldStar`, delegating to `iterable`
    Delegating { iterable: JsValue, frame: SavedFrame },
}

/// Thread-safe handle for asking a running VM to stop.
///
/// The request is observed at the next safe point (a backward jump or a
/// function entry) and raised there as [`JsError::Interrupted`]. It unwinds
/// like a throw that no `catch` can absorb, running every `finally` block it
/// passes through.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    inner: Arc<InterruptState>,
}

#[derive(Debug, Default)]
struct InterruptState {
    requested: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl InterruptHandle {
    /// Request an interrupt; may be called from any thread
    pub fn interrupt(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.inner.reason.lock() {
            *slot = Some(reason.into());
        }
        self.inner.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Withdraw a request that has not been delivered yet
    pub fn clear(&self) {
        self.inner.requested.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.inner.reason.lock() {
            *slot = None;
        }
    }

    /// Consume a pending request
    fn take(&self) -> Option<String> {
        if !self.inner.requested.swap(false, Ordering::SeqCst) {
            return None;
        }
        let reason = self
            .inner
            .reason
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        Some(reason.unwrap_or_else(|| "interrupted".to_string()))
    }
}

/// The virtual machine
///
/// Objects are reference counted without a cycle collector. A generator
/// whose saved frame holds a reference back to the generator itself, for
/// example in one of its locals, is never freed unless the script clears
/// that reference. This holds even after the `Vm` is dropped.
pub struct Vm {
    /// Value stack shared by all attached frames
    pub(crate) stack: Vec<JsValue>,

    /// Attached frames, innermost last
    pub(crate) frames: Vec<Frame>,

    globals: FxHashMap<JsString, JsValue>,

    /// Methods of built-in object kinds
    pub(crate) intrinsics: Intrinsics,

    config: VmConfig,

    interrupt: InterruptHandle,

    /// Interpreter entries currently nested on the native stack
    reentry_depth: usize,

    // ═══════════════════════════════════════════════════════════════
    // Timeout tracking
    // ═══════════════════════════════════════════════════════════════
    /// Execution start time (set when the outermost execution begins)
    execution_start: Option<Instant>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Create a VM with the default configuration
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: FxHashMap::default(),
            intrinsics: Intrinsics::new(),
            config,
            interrupt: InterruptHandle::default(),
            reentry_depth: 0,
            execution_start: None,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Set the execution timeout in milliseconds
    ///
    /// Default is 3000ms (3 seconds). Set to 0 to disable timeout.
    pub fn set_timeout_ms(&mut self, timeout_ms: u64) {
        self.config.timeout_ms = timeout_ms;
    }

    /// Get the current execution timeout in milliseconds
    pub fn timeout_ms(&self) -> u64 {
        self.config.timeout_ms
    }

    /// A handle the host can use to interrupt execution, possibly from another thread
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Current height of the value stack
    pub fn stack_height(&self) -> usize {
        self.stack.len()
    }

    /// Number of attached frames
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Run `f` one native re-entry deeper. Suspended generators forwarding
    /// through `yield*` have no attached frame, so frame depth alone does
    /// not bound this recursion.
    pub(crate) fn reenter<T>(
        &mut self,
        f: impl FnOnce(&mut Vm) -> Result<T, JsError>,
    ) -> Result<T, JsError> {
        if self.reentry_depth >= self.config.max_reentry_depth {
            return Err(JsError::range_error("Maximum call stack size exceeded"));
        }
        self.reentry_depth += 1;
        let result = f(self);
        self.reentry_depth -= 1;
        result
    }

    // ═══════════════════════════════════════════════════════════════
    // Globals & host functions
    // ═══════════════════════════════════════════════════════════════

    pub fn set_global(&mut self, name: &str, value: JsValue) {
        self.globals.insert(JsString::from(name), value);
    }

    pub fn get_global(&self, name: &str) -> Option<JsValue> {
        self.globals.get(name).cloned()
    }

    /// Expose a host function to scripts as a global
    pub fn register_function(
        &mut self,
        name: &str,
        func: impl Fn(&mut Vm, JsValue, &[JsValue]) -> Result<JsValue, JsError> + 'static,
    ) {
        self.set_global(name, JsValue::native(name, func));
    }

    // ═══════════════════════════════════════════════════════════════
    // Execution entry points
    // ═══════════════════════════════════════════════════════════════

    /// Run a program's top-level body and return its completion value
    pub fn run_program(&mut self, program: &Program) -> Result<JsValue, JsError> {
        let frame = SavedFrame::new(program.main.clone(), JsValue::Undefined, Vec::new());
        match self.execute(frame, None)? {
            ExecOutcome::Returned(value) => Ok(value),
            ExecOutcome::Yielded { .. } | ExecOutcome::Delegating { .. } => Err(
                JsError::internal_error("top-level program suspended"),
            ),
        }
    }

    /// Call any callable value. Calling a generator function returns a new
    /// generator object without running its body.
    pub fn call_function(
        &mut self,
        callee: &JsValue,
        this: JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, JsError> {
        let callable = bytecode_vm::callable_of(callee)
            .ok_or_else(|| JsError::type_error(format!("{} is not a function", callee)))?;
        match callable {
            Callable::Native(native) => (native.func)(self, this, args),
            Callable::Bytecode(chunk) if chunk.info.is_generator => {
                Ok(generator::create(chunk, this, args.to_vec()))
            }
            Callable::Bytecode(chunk) => {
                let frame = SavedFrame::new(chunk, this, args.to_vec());
                match self.execute(frame, None)? {
                    ExecOutcome::Returned(value) => Ok(value),
                    ExecOutcome::Yielded { .. } | ExecOutcome::Delegating { .. } => Err(
                        JsError::internal_error("ordinary function suspended"),
                    ),
                }
            }
        }
    }

    /// Call `receiver[name](...args)` with `this` bound to the receiver
    pub fn call_method(
        &mut self,
        receiver: &JsValue,
        name: &str,
        args: &[JsValue],
    ) -> Result<JsValue, JsError> {
        let method = self.get_property(receiver, name)?;
        if !method.is_callable() {
            return Err(JsError::type_error(format!(
                "{}.{} is not a function",
                receiver, name
            )));
        }
        self.call_function(&method, receiver.clone(), args)
    }

    // ═══════════════════════════════════════════════════════════════
    // Generator protocol for embedders
    // ═══════════════════════════════════════════════════════════════

    /// `generator.next(value)`
    pub fn generator_next(
        &mut self,
        generator: &JsValue,
        value: JsValue,
    ) -> Result<IterResult, JsError> {
        generator::resume(self, generator, Completion::Normal(value))
    }

    /// `generator.return(value)`
    pub fn generator_return(
        &mut self,
        generator: &JsValue,
        value: JsValue,
    ) -> Result<IterResult, JsError> {
        generator::resume(self, generator, Completion::Return(value))
    }

    /// `generator.throw(value)`
    pub fn generator_throw(
        &mut self,
        generator: &JsValue,
        value: JsValue,
    ) -> Result<IterResult, JsError> {
        generator::resume(self, generator, Completion::Throw(JsError::Thrown(value)))
    }

    /// State of a generator object, `None` for any other value
    pub fn generator_state(&self, generator: &JsValue) -> Option<GeneratorState> {
        generator::state_of(generator)
    }
}
