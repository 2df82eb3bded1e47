//! Generator objects
//!
//! A generator owns the [`SavedFrame`] of its body while suspended, plus the
//! state of an active `yield*` delegation. Each resumption (`next`, `return`,
//! `throw`) takes the frame out, lets the VM run it on top of whatever is
//! currently executing, and stores the detached frame again if the body
//! suspends. Any completion buffered by a finally block the body is
//! suspended in travels inside the saved frame's try contexts.

use std::rc::Rc;

use tracing::trace;

use crate::compiler::FunctionChunk;
use crate::error::JsError;
use crate::interpreter::completion::Completion;
use crate::interpreter::frame::SavedFrame;
use crate::interpreter::{ExecOutcome, Vm};
use crate::value::{JsObject, JsObjectRef, JsValue, ObjectKind};

use super::delegate::{self, DelegateStep, Delegation};
use super::iterator::IterResult;

/// Generator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Created, body not entered yet
    SuspendedStart,
    /// Suspended at a yield (or inside a delegation)
    SuspendedYield,
    /// Body running; resumption is rejected
    Executing,
    /// Terminal
    Completed,
}

/// Internal state of a generator object
pub struct Generator {
    state: GeneratorState,
    /// Present exactly while suspended
    frame: Option<SavedFrame>,
    /// Active `yield*` delegation, if the body is suspended in one
    delegation: Option<Delegation>,
}

impl Generator {
    fn new(frame: SavedFrame) -> Self {
        Self {
            state: GeneratorState::SuspendedStart,
            frame: Some(frame),
            delegation: None,
        }
    }

    pub fn state(&self) -> GeneratorState {
        self.state
    }

    /// The completion a finally block of the suspended body is holding
    pub fn pending_completion(&self) -> Option<&Completion> {
        self.frame.as_ref().and_then(SavedFrame::pending_completion)
    }

    pub fn is_delegating(&self) -> bool {
        self.delegation.is_some()
    }

    fn complete(&mut self) {
        trace!(target: "genvm::generator", from = ?self.state, "generator completed");
        self.state = GeneratorState::Completed;
        self.frame = None;
        self.delegation = None;
    }
}

/// Create a generator object for a call to a generator function.
/// The body does not run until the first resumption.
pub fn create(chunk: Rc<FunctionChunk>, this: JsValue, args: Vec<JsValue>) -> JsValue {
    let frame = SavedFrame::new(chunk, this, args);
    JsValue::object(JsObject::with_kind(ObjectKind::Generator(Generator::new(
        frame,
    ))))
}

/// State of a generator object
pub fn state_of(value: &JsValue) -> Option<GeneratorState> {
    let obj = value.as_object()?;
    match &obj.borrow().kind {
        ObjectKind::Generator(generator) => Some(generator.state()),
        _ => None,
    }
}

fn generator_object<'a>(value: &'a JsValue, method: &str) -> Result<&'a JsObjectRef, JsError> {
    match value {
        JsValue::Object(obj) if matches!(obj.borrow().kind, ObjectKind::Generator(_)) => Ok(obj),
        _ => Err(JsError::type_error(format!(
            "Generator.prototype.{} called on incompatible receiver {}",
            method, value
        ))),
    }
}

/// Where the body starts when it is (re)entered
enum Entry {
    /// Run the body from its first instruction
    Start(SavedFrame),
    /// Resume a suspended body, forwarding to its delegation first if any
    Resume(SavedFrame, Option<Delegation>, Completion),
}

/// How a resumption left the body
enum Suspension {
    Yielded {
        value: JsValue,
        frame: SavedFrame,
        delegation: Option<Delegation>,
    },
    Returned(JsValue),
}

/// Resume a generator with `input` and report the iterator result.
///
/// This is the single entry point for `next`, `return` and `throw`,
/// whether called from script, from a host function or by the embedder.
pub fn resume(vm: &mut Vm, value: &JsValue, input: Completion) -> Result<IterResult, JsError> {
    let method = match &input {
        Completion::Return(_) => "return",
        Completion::Throw(_) => "throw",
        _ => "next",
    };
    let obj = generator_object(value, method)?;

    let entry = {
        let mut borrowed = obj.borrow_mut();
        let ObjectKind::Generator(generator) = &mut borrowed.kind else {
            return Err(JsError::type_error("not a generator"));
        };
        trace!(
            target: "genvm::generator",
            state = ?generator.state,
            input = ?input.kind(),
            "resume"
        );

        match (generator.state, input) {
            (GeneratorState::Executing, _) => {
                return Err(JsError::type_error("Generator is already running"));
            }
            (GeneratorState::Completed, Completion::Throw(err)) => return Err(err),
            (GeneratorState::Completed, Completion::Return(value)) => {
                return Ok(IterResult::done(value));
            }
            (GeneratorState::Completed, _) => return Ok(IterResult::done(JsValue::Undefined)),

            // Return or throw before the body was entered: no cleanup to run
            (GeneratorState::SuspendedStart, Completion::Return(value)) => {
                generator.complete();
                return Ok(IterResult::done(value));
            }
            (GeneratorState::SuspendedStart, Completion::Throw(err)) => {
                generator.complete();
                return Err(err);
            }
            (GeneratorState::SuspendedStart, _) => {
                let frame = generator
                    .frame
                    .take()
                    .ok_or_else(|| JsError::internal_error("generator lost its frame"))?;
                generator.state = GeneratorState::Executing;
                Entry::Start(frame)
            }
            (GeneratorState::SuspendedYield, input) => {
                let frame = generator
                    .frame
                    .take()
                    .ok_or_else(|| JsError::internal_error("generator lost its frame"))?;
                generator.state = GeneratorState::Executing;
                Entry::Resume(frame, generator.delegation.take(), input)
            }
        }
    };

    // The object is not borrowed while the body runs, so the body may read
    // it and re-entrant resumption fails with a TypeError instead of a panic
    let result = vm.reenter(|vm| drive(vm, entry));

    let mut borrowed = obj.borrow_mut();
    let ObjectKind::Generator(generator) = &mut borrowed.kind else {
        return Err(JsError::internal_error("generator object changed kind"));
    };
    match result {
        Ok(Suspension::Yielded {
            value,
            frame,
            delegation,
        }) => {
            generator.state = GeneratorState::SuspendedYield;
            generator.frame = Some(frame);
            generator.delegation = delegation;
            trace!(
                target: "genvm::generator",
                delegating = generator.delegation.is_some(),
                pending = ?generator.pending_completion().map(Completion::kind),
                "generator suspended"
            );
            Ok(IterResult::yielded(value))
        }
        Ok(Suspension::Returned(value)) => {
            generator.complete();
            Ok(IterResult::done(value))
        }
        Err(err) => {
            generator.complete();
            Err(err)
        }
    }
}

/// Run the body until it suspends outside a delegation or finishes
fn drive(vm: &mut Vm, entry: Entry) -> Result<Suspension, JsError> {
    let (mut frame, mut delegation, mut input) = match entry {
        Entry::Start(frame) => (frame, None, None),
        Entry::Resume(frame, delegation, input) => (frame, delegation, Some(input)),
    };

    loop {
        if let Some(active) = delegation.take() {
            let forwarded = input.take().unwrap_or(Completion::Normal(JsValue::Undefined));
            match delegate::forward(vm, active, forwarded) {
                DelegateStep::Yield(value, active) => {
                    return Ok(Suspension::Yielded {
                        value,
                        frame,
                        delegation: Some(active),
                    });
                }
                DelegateStep::Resume(completion) => input = Some(completion),
            }
        }

        match vm.execute(frame, input.take())? {
            ExecOutcome::Returned(value) => return Ok(Suspension::Returned(value)),
            ExecOutcome::Yielded { value, frame } => {
                return Ok(Suspension::Yielded {
                    value,
                    frame,
                    delegation: None,
                });
            }
            ExecOutcome::Delegating {
                iterable,
                frame: suspended,
            } => {
                frame = suspended;
                match delegate::open(vm, &iterable) {
                    DelegateStep::Yield(value, active) => {
                        return Ok(Suspension::Yielded {
                            value,
                            frame,
                            delegation: Some(active),
                        });
                    }
                    DelegateStep::Resume(completion) => input = Some(completion),
                }
            }
        }
    }
}

/// Generator.prototype.next(value)
pub fn generator_next(vm: &mut Vm, this: JsValue, args: &[JsValue]) -> Result<JsValue, JsError> {
    let value = args.first().cloned().unwrap_or_default();
    resume(vm, &this, Completion::Normal(value)).map(|result| result.to_value())
}

/// Generator.prototype.return(value)
pub fn generator_return(
    vm: &mut Vm,
    this: JsValue,
    args: &[JsValue],
) -> Result<JsValue, JsError> {
    let value = args.first().cloned().unwrap_or_default();
    resume(vm, &this, Completion::Return(value)).map(|result| result.to_value())
}

/// Generator.prototype.throw(exception)
pub fn generator_throw(
    vm: &mut Vm,
    this: JsValue,
    args: &[JsValue],
) -> Result<JsValue, JsError> {
    let value = args.first().cloned().unwrap_or_default();
    resume(vm, &this, Completion::Throw(JsError::Thrown(value))).map(|result| result.to_value())
}
