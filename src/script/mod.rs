//! Script execution.
//!
//! A run loads the source as one Lua chunk, swaps its `_ENV` for the
//! restricted table from [`env`], executes the body, then drains any timers
//! the script registered before the run is considered settled. All mutations
//! stay staged in the [`ExecutionContext`]; the caller gets a
//! [`ScriptResult`] to apply, or a classified [`MacroError`].

mod env;
pub mod source;

use mlua::{Function, Lua};
use std::cell::RefCell;
use std::rc::Rc;

use crate::context::{ExecutionContext, RunState, ScriptResult, register_run};
use crate::error::MacroError;
use crate::host::{DocumentSink, FileTree, HostDocument, Prompter};
use crate::timers::{self, CancelSignal, TimerStore};

pub(crate) const CANCELLED_MESSAGE: &str = "macro cancelled";

/// The host seams one run needs: workspace reads, document writes, and
/// interactive prompts.
pub struct RunHost {
    pub tree: Rc<dyn FileTree>,
    pub sink: Rc<RefCell<dyn DocumentSink>>,
    pub prompter: Rc<dyn Prompter>,
}

/// Run `source` against `doc` with a fresh cancel signal.
pub fn run_script(
    source: &str,
    doc: &HostDocument,
    host: &RunHost,
) -> Result<ScriptResult, MacroError> {
    run_script_with_cancel(source, doc, host, &CancelSignal::new())
}

/// Run `source` against `doc`, observing an externally-owned cancel signal
/// (the CLI wires this to Ctrl-C). A cancelled run discards every staged
/// change and reports a soft exit.
pub fn run_script_with_cancel(
    source: &str,
    doc: &HostDocument,
    host: &RunHost,
    cancel: &CancelSignal,
) -> Result<ScriptResult, MacroError> {
    let context = Rc::new(RefCell::new(ExecutionContext::new(doc)));
    {
        let mut ctx = context.borrow_mut();
        ctx.cancel = cancel.clone();
        ctx.state = RunState::Running;
    }
    let _guard = register_run(cancel);

    let timers: Rc<RefCell<TimerStore<Function>>> = Rc::new(RefCell::new(TimerStore::new()));
    let lua = Lua::new();
    let script_env = env::build_env(&lua, &context, &timers, host)
        .map_err(|e| MacroError::hard(format!("failed to build the script environment: {}", e)))?;

    let body = lua
        .load(source)
        .set_name(source::CHUNK_NAME)
        .set_environment(script_env)
        .exec();

    // the run is not settled until every timer has fired or been cleared
    let settled = match body {
        Ok(()) => {
            let mut first_fault: Option<MacroError> = None;
            timers::settle(
                &timers,
                cancel,
                |callback: Function| callback.call::<()>(()),
                |err| {
                    if first_fault.is_none() {
                        first_fault = Some(classify(&err));
                    }
                },
            );
            match first_fault {
                None => Ok(()),
                Some(fault) => Err(fault),
            }
        }
        Err(err) => Err(classify(&err)),
    };

    if cancel.is_cancelled() {
        context.borrow_mut().state = RunState::Cancelled;
        return Err(MacroError::soft(CANCELLED_MESSAGE));
    }
    match settled {
        Ok(()) => {
            let mut ctx = context.borrow_mut();
            ctx.state = RunState::Completed;
            Ok(ctx.take_result())
        }
        Err(err) => {
            context.borrow_mut().state = if err.is_soft() {
                RunState::Completed
            } else {
                RunState::Failed
            };
            Err(err)
        }
    }
}

/// Map an interpreter error to the run taxonomy. Structured errors raised by
/// capabilities travel through Lua as external errors and are recovered by
/// downcast; everything else is a script fault with a compacted traceback.
fn classify(err: &mlua::Error) -> MacroError {
    match err {
        mlua::Error::CallbackError { traceback, cause } => match classify(cause) {
            MacroError::Script { message, trace } if trace.is_empty() => MacroError::Script {
                message,
                trace: source::split_fault(traceback).1,
            },
            other => other,
        },
        mlua::Error::WithContext { cause, .. } => classify(cause),
        mlua::Error::ExternalError(external) => match external.downcast_ref::<MacroError>() {
            Some(structured) => structured.clone(),
            None => MacroError::hard(external.to_string()),
        },
        mlua::Error::BadArgument { .. } => MacroError::hard(err.to_string()),
        other => {
            let (message, trace) = source::split_fault(&other.to_string());
            MacroError::Script { message, trace }
        }
    }
}
