//! Error & recovery driver
//!
//! [`Interpreter`] owns a [`Context`] and runs objects to completion by
//! calling the dispatcher in a loop. Each [`Fault`] the dispatcher returns is
//! either absorbed here (stack growth, block pops, collection, time slices)
//! or turned into a call of the matching `errordict` handler. Only errors that
//! no handler can take reach the caller, as a [`RunError`].
//!
//! ## Runs
//!
//! A run pushes the `%interp_exit` sentinel and then the object to execute:
//!
//! ```text
//!   estack:  ... │ %interp_exit │ obj ...
//!                  ▲ base
//! ```
//!
//! Executing the sentinel ends the run successfully. A run that ends in an
//! error unwinds the execution stack back through the sentinel with
//! [`pop_estack`], so every mark passed on the way restores the operand and
//! dictionary stacks it protects.
//!
//! ## Transitions
//!
//! | Fault                         | Action                                        |
//! |-------------------------------|-----------------------------------------------|
//! | `InterpreterExit`             | run complete                                  |
//! | `Fatal`, `Quit`               | unwind, report with an exit code              |
//! | `ExecStackUnderflow`          | pop a block and retry; else report            |
//! | `VMreclaim`                   | collect, re-enter                             |
//! | `TimeSlice`, `NeedInput`      | suspend; [`Interpreter::step_slice`] resumes  |
//! | stack overflow (all three)    | grow a block and retry; else handler          |
//! | stack underflow (ostack, dstack) | pop a block and retry; else handler        |
//! | `Interrupt`                   | push the object back, report                  |
//! | any other error               | `errordict` handler, or report                |

use crate::config::{ES_HEADROOM, InterpConfig, MIN_BLOCK_ESTACK};
use crate::context::Context;
use crate::estack::{
    ExecEntry, MarkKind, errorexec_find, handler_active, pop_estack, push_exec, push_mark,
};
use crate::interp::{Fault, interp};
use crate::operators::io::open_file;
use crate::operators::{OP_INTERP_EXIT, OpDef, OpProc};
use crate::print::cvs_text;
use crate::stats::InterpStats;
use psi_core::{DictKey, ErrorCode, FileObj, Payload, ReclaimScope, Space, Value};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::debug;

/// A run that ended in an error no handler took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    pub code: ErrorCode,
    /// The offending object, as `=` would print it.
    pub object: String,
    pub exit_code: i32,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: /{} in {}", self.code.name(), self.object)
    }
}

impl std::error::Error for RunError {}

/// How a dispatcher session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The run's sentinel executed.
    Finished,
    /// The time slice ran out.
    Yielded,
    /// A file source has no data yet.
    Blocked,
}

pub struct Interpreter {
    ctx: Context,
    /// Object to enter with on the next session of the current run.
    pending: Option<Value>,
    /// Execution stack depth below the current run's sentinel.
    base: usize,
    /// The error whose handler is running, as reported if it recurs.
    recent: Option<(ErrorCode, Value)>,
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("ctx", &self.ctx)
            .field("pending", &self.pending)
            .field("base", &self.base)
            .finish()
    }
}

impl Interpreter {
    pub fn new(config: InterpConfig) -> Self {
        Self::from_context(Context::new(config))
    }

    /// An interpreter whose output operators write to `out`.
    pub fn with_output(config: InterpConfig, out: Box<dyn Write>) -> Self {
        Self::from_context(Context::with_output(config, out))
    }

    pub fn from_context(ctx: Context) -> Self {
        Interpreter {
            ctx,
            pending: None,
            base: 0,
            recent: None,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn stats(&self) -> &InterpStats {
        &self.ctx.stats
    }

    /// Setting the returned flag interrupts the interpreter at its next
    /// checkpoint.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ctx.interrupt)
    }

    // =========================================================================
    // Operand stack introspection
    // =========================================================================

    /// The operand stack, bottom first.
    pub fn ostack_values(&self) -> Vec<Value> {
        self.ctx.ostack.to_vec()
    }

    pub fn count(&self) -> usize {
        self.ctx.ostack.count()
    }

    pub fn index_from_top(&self, i: usize) -> Option<Value> {
        self.ctx.ostack.index(i)
    }

    /// Add a native operator and define it in `systemdict` under `name`.
    pub fn define_operator(&mut self, name: &'static str, proc: OpProc) -> Result<Value, ErrorCode> {
        let index = self.ctx.ops.register(OpDef { name, proc })?;
        let value = self.ctx.ops.make_operator_value(proc, index);
        let key = DictKey::Name(self.ctx.names.intern(name.as_bytes()));
        let systemdict = self.ctx.systemdict();
        self.ctx.force_put(systemdict, key, value)?;
        Ok(value)
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Execute `obj` to completion.
    pub fn run(&mut self, obj: Value) -> Result<(), RunError> {
        self.begin(obj)?;
        self.finish()
    }

    /// Execute PostScript source text.
    pub fn run_string(&mut self, src: &str) -> Result<(), RunError> {
        let s = self.ctx.alloc_string(src.as_bytes().to_vec()).cvx();
        self.run(s)
    }

    /// Execute the file at `path`.
    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<(), RunError> {
        let name = path.as_ref().to_string_lossy().into_owned();
        let file = open_file(&mut self.ctx, &name).map_err(|code| RunError {
            code,
            object: name.clone(),
            exit_code: code.exit_code(),
        })?;
        self.run(file.cvx())
    }

    /// Execute everything `reader` yields.
    pub fn run_reader(&mut self, name: &str, reader: Box<dyn Read>) -> Result<(), RunError> {
        let chunk = self.ctx.config.file_chunk;
        let id = self.ctx.heap.alloc_file(FileObj::from_reader(name, reader, chunk));
        self.run(Value::file(id).cvx())
    }

    /// Continue a run suspended by an interrupt or a time slice.
    pub fn resume(&mut self) -> Result<(), RunError> {
        if self.pending.is_none() {
            return Ok(());
        }
        self.finish()
    }

    /// Start a run of `obj` without executing anything yet. A run still
    /// suspended is abandoned.
    pub fn begin(&mut self, obj: Value) -> Result<(), RunError> {
        if self.pending.take().is_some() {
            self.unwind();
        }
        self.recent = None;
        self.base = self.ctx.estack.count();
        let sentinel = Value::operator(OP_INTERP_EXIT, None);
        if self.ctx.estack.check_room(1).is_err() {
            self.ctx
                .estack
                .extend(1)
                .map_err(|code| self.report(code, obj))?;
        }
        push_exec(&mut self.ctx, sentinel).map_err(|code| self.report(code, obj))?;
        self.pending = Some(obj);
        Ok(())
    }

    /// Whether a run has been started and not yet finished.
    pub fn is_running(&self) -> bool {
        self.pending.is_some()
    }

    /// Run the current run for one dispatcher session.
    pub fn step_slice(&mut self) -> Result<Step, RunError> {
        let Some(start) = self.pending.take() else {
            return Ok(Step::Finished);
        };
        let step = self.call_interp(start);
        if step.is_err() && self.pending.is_none() {
            self.recent = None;
        }
        step
    }

    fn finish(&mut self) -> Result<(), RunError> {
        loop {
            match self.step_slice()? {
                Step::Finished => return Ok(()),
                Step::Yielded => {}
                Step::Blocked => std::thread::yield_now(),
            }
        }
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Run the dispatcher until the run finishes, suspends or fails.
    fn call_interp(&mut self, start: Value) -> Result<Step, RunError> {
        let mut object = start;
        loop {
            let Fault { code, object: faulted } = interp(&mut self.ctx, object);
            object = match code {
                ErrorCode::InterpreterExit => {
                    self.recent = None;
                    return Ok(Step::Finished);
                }
                ErrorCode::Fatal | ErrorCode::Quit => {
                    let exit_code = if code == ErrorCode::Quit {
                        self.ctx.quit_code
                    } else {
                        code.exit_code()
                    };
                    self.unwind();
                    let mut err = self.report(code, faulted);
                    err.exit_code = exit_code;
                    return Err(err);
                }
                ErrorCode::ExecStackUnderflow => {
                    if self.ctx.estack.pop_block().is_err() {
                        self.unwind();
                        return Err(self.report(code, faulted));
                    }
                    self.ctx.stats.block_pops += 1;
                    debug!("execution stack block popped");
                    Value::NO_OP
                }
                ErrorCode::VmReclaim => {
                    let scope = self.ctx.reclaim_request.take().unwrap_or(ReclaimScope::All);
                    let mut extra = [faulted];
                    self.ctx.reclaim(scope, &mut extra);
                    Value::NO_OP
                }
                ErrorCode::TimeSlice => {
                    self.pending = Some(Value::NO_OP);
                    return Ok(Step::Yielded);
                }
                ErrorCode::NeedInput => {
                    self.pending = Some(Value::NO_OP);
                    return Ok(Step::Blocked);
                }
                ErrorCode::Interrupt => {
                    self.push_back(faulted)?;
                    self.pending = Some(Value::NO_OP);
                    return Err(self.report(code, faulted));
                }
                ErrorCode::StackOverflow => self.ostack_overflow(faulted)?,
                ErrorCode::ExecStackOverflow => self.estack_overflow(faulted)?,
                ErrorCode::DictStackOverflow => self.dstack_overflow(faulted)?,
                ErrorCode::StackUnderflow => {
                    // A pop only helps while it can add operands to the block.
                    // Inside its own handler the error is reported instead.
                    let room = self.ctx.ostack.count_in_block() < self.ctx.ostack.params().block_size
                        && !handler_active(&self.ctx, code);
                    if room && self.ctx.ostack.pop_block().is_ok() {
                        self.ctx.stats.block_pops += 1;
                        debug!("operand stack block popped");
                        faulted
                    } else {
                        self.enter_handler(code, faulted)?
                    }
                }
                ErrorCode::DictStackUnderflow => {
                    let room = self.ctx.dstack.count_in_block() < self.ctx.dstack.params().block_size
                        && !handler_active(&self.ctx, code);
                    if room && self.ctx.dstack.pop_block().is_ok() {
                        self.ctx.stats.block_pops += 1;
                        self.ctx.dstack_epoch += 1;
                        debug!("dictionary stack block popped");
                        faulted
                    } else {
                        self.enter_handler(code, faulted)?
                    }
                }
                _ => self.enter_handler(code, faulted)?,
            };
        }
    }

    fn ostack_overflow(&mut self, faulted: Value) -> Result<Value, RunError> {
        let request = self.ctx.ostack.requested().max(1);
        if self.ctx.ostack.extend(request).is_ok() {
            self.ctx.stats.ostack_growths += 1;
            debug!(count = self.ctx.ostack.count(), "operand stack grown");
            if faulted.is_executable() && faulted.array_ref().is_some() {
                // A procedure being pushed, not executed.
                if self.ctx.push(faulted).is_ok() {
                    return Ok(Value::NO_OP);
                }
            }
            return Ok(faulted);
        }
        let saved = self.ctx.ostack.to_vec();
        self.ctx.ostack.clear();
        let r = self.ctx.heap.alloc_array(saved, Space::Local);
        self.ctx
            .push(Value::array(r, Space::Local))
            .map_err(|_| self.fatal(faulted))?;
        self.enter_handler(ErrorCode::StackOverflow, faulted)
    }

    fn estack_overflow(&mut self, faulted: Value) -> Result<Value, RunError> {
        let request = self.ctx.estack.requested().max(1);
        if self.ctx.estack.extend(request).is_ok() {
            self.ctx.stats.estack_growths += 1;
            debug!(count = self.ctx.estack.count(), "execution stack grown");
            return Ok(faulted);
        }
        let saved: Vec<Value> = self
            .ctx
            .estack
            .to_vec()
            .into_iter()
            .map(|e| e.value().unwrap_or(Value::mark()))
            .collect();
        let skip = self.estack_cut();
        pop_estack(&mut self.ctx, skip).map_err(|_| self.fatal(faulted))?;
        let r = self.ctx.heap.alloc_array(saved, Space::Local);
        self.push_operand(Value::array(r, Space::Local), faulted)?;
        self.enter_handler(ErrorCode::ExecStackOverflow, faulted)
    }

    /// Entries to pop so the handler has `ES_HEADROOM` entries to run in.
    ///
    /// The cut is taken off the top. A mark lying just under the cut goes
    /// with it, so no half-removed loop or call frame is left behind.
    fn estack_cut(&self) -> usize {
        let estack = &self.ctx.estack;
        let count = estack.count();
        let capacity = if estack.params().allow_expansion {
            estack.max_count()
        } else {
            (count - estack.count_in_block() + estack.params().block_size).min(estack.max_count())
        };
        let limit = capacity.saturating_sub(ES_HEADROOM);
        if count <= limit {
            return 0;
        }
        let mut skip = count - limit;
        for i in skip..skip + MIN_BLOCK_ESTACK {
            if let Some(ExecEntry::Mark(_)) = estack.index(i) {
                skip = i + 1;
                break;
            }
        }
        skip.min(count.saturating_sub(self.base + 1))
    }

    /// The recovery path itself failed.
    fn fatal(&mut self, faulted: Value) -> RunError {
        self.unwind();
        self.report(ErrorCode::Fatal, faulted)
    }

    fn dstack_overflow(&mut self, faulted: Value) -> Result<Value, RunError> {
        let request = self.ctx.dstack.requested().max(1);
        if self.ctx.dstack.extend(request).is_ok() {
            self.ctx.stats.dstack_growths += 1;
            debug!(count = self.ctx.dstack.count(), "dictionary stack grown");
            return Ok(faulted);
        }
        let saved = self.ctx.dstack.to_vec();
        self.ctx.dstack.pop_to(self.ctx.min_dstack);
        self.ctx.dstack_epoch += 1;
        let r = self.ctx.heap.alloc_array(saved, Space::Local);
        self.push_operand(Value::array(r, Space::Local), faulted)?;
        self.enter_handler(ErrorCode::DictStackOverflow, faulted)
    }

    /// Push onto the operand stack, growing it if it is full.
    fn push_operand(&mut self, v: Value, faulted: Value) -> Result<(), RunError> {
        if self.ctx.ostack.check_room(1).is_err() && self.ctx.ostack.extend(1).is_err() {
            self.unwind();
            return Err(self.report(ErrorCode::StackOverflow, faulted));
        }
        self.ctx.push(v).map_err(|code| self.report(code, faulted))
    }

    /// Prepare the `errordict` handler for `code` and return it as the next
    /// object to execute.
    fn enter_handler(&mut self, code: ErrorCode, faulted: Value) -> Result<Value, RunError> {
        let key = DictKey::Name(self.ctx.names.intern(code.name().as_bytes()));
        let errordict = self.ctx.errordict();
        let handler = self
            .ctx
            .heap
            .dict_get(errordict, &key)
            .filter(|h| h.is_proc());
        let Some(handler) = handler else {
            self.unwind();
            return Err(self.report(code, faulted));
        };
        let reentered = handler_active(&self.ctx, code)
            || (code == ErrorCode::ExecStackOverflow && faulted == handler);
        if reentered {
            let (code, object) = match self.recent {
                Some((c, obj)) if c == code => (c, obj),
                _ => (code, faulted),
            };
            self.unwind();
            return Err(self.report(code, object));
        }
        let printable = self.printable_object(faulted);
        if self.ctx.estack.check_room(1).is_err() && self.ctx.estack.extend(1).is_err() {
            self.unwind();
            return Err(self.report(code, printable));
        }
        self.push_operand(printable, printable)?;
        push_mark(&mut self.ctx, MarkKind::Handler { code }).map_err(|c| self.report(c, printable))?;
        self.recent = Some((code, printable));
        self.ctx.stats.errors_handled += 1;
        debug!(error = code.name(), object = %cvs_text(&self.ctx, &printable), "running handler");
        Ok(handler)
    }

    /// The object handed to a handler: the protected call's error object when
    /// one is running, and never an opaque or internal value.
    fn printable_object(&mut self, faulted: Value) -> Value {
        if let Some(v) = errorexec_find(&self.ctx) {
            return v;
        }
        let opaque = match faulted.payload {
            Payload::Struct(o) | Payload::AStruct(o) => Some(o.type_name.to_string()),
            Payload::Device(_) => Some("device".to_string()),
            Payload::Save(_) => Some("save".to_string()),
            Payload::Operator { .. } => self.internal_operator_name(&faulted),
            _ => None,
        };
        match opaque {
            Some(text) => {
                let n = self.ctx.names.intern(format!("--{}--", text).as_bytes());
                Value::name(n)
            }
            None => faulted,
        }
    }

    /// Name of an operator that cannot be found under its name in `systemdict`.
    fn internal_operator_name(&mut self, op: &Value) -> Option<String> {
        let name = self.ctx.operator_name(op)?;
        let key = DictKey::Name(self.ctx.names.intern(name.as_bytes()));
        let systemdict = self.ctx.systemdict();
        match self.ctx.heap.dict_get(systemdict, &key) {
            Some(v) if v == *op => None,
            _ => Some(name),
        }
    }

    /// Put an interrupted object back so that resuming retries it.
    fn push_back(&mut self, faulted: Value) -> Result<(), RunError> {
        if faulted.payload == Payload::Null {
            return Ok(());
        }
        if self.ctx.estack.check_room(1).is_err() && self.ctx.estack.extend(1).is_err() {
            return Err(self.fatal(faulted));
        }
        push_exec(&mut self.ctx, faulted).map_err(|_| self.fatal(faulted))
    }

    /// Pop the execution stack through the current run's sentinel.
    fn unwind(&mut self) {
        let excess = self.ctx.estack.count().saturating_sub(self.base);
        if excess > 0 {
            debug!(entries = excess, "unwinding run");
        }
        let _ = pop_estack(&mut self.ctx, excess);
        self.pending = None;
    }

    fn report(&self, code: ErrorCode, object: Value) -> RunError {
        RunError {
            code,
            object: cvs_text(&self.ctx, &object),
            exit_code: code.exit_code(),
        }
    }
}
