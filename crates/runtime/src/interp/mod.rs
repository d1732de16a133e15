//! Dispatcher
//!
//! [`interp`] runs the execution stack until something it cannot handle
//! itself happens, and returns that as a [`Fault`]. Everything that is not a
//! plain error is also a fault: the time slice ran out, a collection is due,
//! the run's base sentinel executed. The recovery driver decides what each
//! one means.
//!
//! ## State
//!
//! The dispatcher works on local mirrors of the two hot stack pointers
//! (`osp`, `esp`) and a cursor into the procedure being executed:
//!
//! ```text
//!   cursor = Element { proc, index }     icount = elements left after index
//!
//!   estack[esp] ─► proc (or, after store_state, proc[index+1 ..])
//! ```
//!
//! The mirrors are written back (`sync_out`) before anything that can look at
//! the stacks from outside (operators, the scanner, a fault) and re-read
//! (`sync_in`) afterwards. `store_state` replaces the procedure slot with its
//! unexecuted tail so that the execution stack alone describes where to
//! resume.
//!
//! ## Labels
//!
//! | Label   | Meaning                                                    |
//! |---------|------------------------------------------------------------|
//! | `Top`   | classify and execute the object under the cursor           |
//! | `Next`  | advance the cursor; at the end of a procedure go `Up`       |
//! | `Up`    | take the next entry off the execution stack (checkpoint)   |
//! | `Slice` | quantum exhausted or collection signalled                  |
//!
//! Entering the last element of a procedure pops the procedure's slot first,
//! so tail calls do not grow the execution stack.

pub mod fast;
pub mod slot;

use crate::context::{Context, GC_SIGNAL};
use crate::estack::{ExecEntry, MarkKind, push_exec, push_mark};
use crate::operators::{OP_OPARRAY_POP, OP_REMAP_COLOR, OpStatus};
use crate::scanner::{ScanOptions, ScanStatus};
use psi_core::{
    ErrorCode, Fetched, FileId, NameIndex, OpIndex, Payload, ReclaimScope, SpecialOp, StrRef,
    Value,
};
use slot::{Class, PackedSlot, PlainSlot, Slot, classify_value};
use std::rc::Rc;
use std::sync::atomic::Ordering;
use tracing::{debug, trace};

/// Why the dispatcher stopped, and the object to report or retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fault {
    pub code: ErrorCode,
    pub object: Value,
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Single(Value),
    Element { proc: Value, index: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Top,
    Next,
    Up,
    Slice,
}

type Step = Result<Label, Fault>;

pub(crate) struct Machine<'c> {
    ctx: &'c mut Context,
    osp: usize,
    esp: usize,
    cursor: Cursor,
    icount: u32,
}

/// Execute `start`, then whatever the execution stack holds, until a fault.
pub fn interp(ctx: &mut Context, start: Value) -> Fault {
    let mut m = Machine {
        osp: ctx.ostack.pointer(),
        esp: ctx.estack.pointer(),
        ctx,
        cursor: Cursor::Single(Value::NO_OP),
        icount: 0,
    };
    m.run(start)
}

impl<'c> Machine<'c> {
    fn run(&mut self, start: Value) -> Fault {
        if self.esp >= self.ctx.estack.top_limit() {
            self.ctx.estack.set_requested(1);
            return Fault {
                code: ErrorCode::ExecStackOverflow,
                object: start,
            };
        }
        self.esp += 1;
        self.ctx.estack.set_at(self.esp, ExecEntry::Value(start));
        let mut label = Label::Up;
        loop {
            let step = match label {
                Label::Top => self.top(),
                Label::Next => self.next(),
                Label::Up => self.up(),
                Label::Slice => self.slice(),
            };
            match step {
                Ok(l) => label = l,
                Err(fault) => return fault,
            }
        }
    }

    // =========================================================================
    // State handling
    // =========================================================================

    fn sync_out(&mut self) {
        self.ctx.ostack.set_pointer(self.osp);
        self.ctx.estack.set_pointer(self.esp);
    }

    fn sync_in(&mut self) {
        self.osp = self.ctx.ostack.pointer();
        self.esp = self.ctx.estack.pointer();
    }

    /// Save the unexecuted tail of the current procedure in its slot.
    fn store_state(&mut self) {
        if self.icount == 0 {
            return;
        }
        if let Cursor::Element { proc, index } = self.cursor {
            let tail = proc.interval(index + 1, self.icount);
            self.ctx.estack.set_at(self.esp, ExecEntry::Value(tail));
        }
    }

    /// Leave with a fault raised before anything was handed off.
    fn fail(&mut self, code: ErrorCode, object: Value) -> Step {
        self.store_state();
        self.icount = 0;
        self.sync_out();
        Err(Fault { code, object })
    }

    // =========================================================================
    // Labels
    // =========================================================================

    fn top(&mut self) -> Step {
        self.ctx.stats.dispatched += 1;
        match self.cursor {
            Cursor::Single(v) => self.dispatch(PlainSlot(v)),
            Cursor::Element { proc, index } => {
                let Some(r) = proc.array_ref() else {
                    return self.fail(ErrorCode::Fatal, proc);
                };
                match self.ctx.heap.fetch(r.id, r.start + index) {
                    Fetched::Plain(v) => self.dispatch(PlainSlot(v)),
                    Fetched::Packed(packed) => self.dispatch(PackedSlot { id: r.id, packed }),
                }
            }
        }
    }

    fn next(&mut self) -> Step {
        if self.icount == 0 {
            return Ok(Label::Up);
        }
        if let Cursor::Element { index, .. } = &mut self.cursor {
            *index += 1;
        }
        self.icount -= 1;
        if self.icount == 0 {
            self.esp -= 1;
        }
        Ok(Label::Top)
    }

    fn up(&mut self) -> Step {
        // Every path here has already saved or finished the cursor.
        self.icount = 0;
        self.ctx.ticks_left -= 1;
        if self.ctx.ticks_left < 0 {
            return Ok(Label::Slice);
        }
        match self.ctx.estack.at(self.esp) {
            // Marks are inert on a normal return.
            ExecEntry::Mark(_) => {
                self.esp -= 1;
                Ok(Label::Up)
            }
            ExecEntry::Value(v) if v.is_executable() && v.array_ref().is_some() => {
                self.esp -= 1;
                if !v.has_access(psi_core::EXECUTE) {
                    return self.fail(ErrorCode::InvalidAccess, v);
                }
                let len = v.size();
                if len == 0 {
                    return Ok(Label::Up);
                }
                self.ctx.stats.proc_entries += 1;
                self.cursor = Cursor::Element { proc: v, index: 0 };
                self.icount = len - 1;
                if self.icount > 0 {
                    // Keep the slot until the last element is entered.
                    self.esp += 1;
                }
                Ok(Label::Top)
            }
            ExecEntry::Value(v) => {
                self.esp -= 1;
                self.cursor = Cursor::Single(v);
                Ok(Label::Top)
            }
        }
    }

    fn slice(&mut self) -> Step {
        self.sync_out();
        self.ctx.stats.slices += 1;
        let collect = self.ctx.ticks_left <= GC_SIGNAL || self.ctx.config.gc_every_slice;
        self.ctx.ticks_left = self.ctx.quantum;
        let code = if collect {
            self.ctx.reclaim_request.get_or_insert(ReclaimScope::All);
            ErrorCode::VmReclaim
        } else if self.ctx.interrupt.swap(false, Ordering::SeqCst) {
            ErrorCode::Interrupt
        } else {
            ErrorCode::TimeSlice
        };
        Err(Fault {
            code,
            object: Value::NO_OP,
        })
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn dispatch<S: Slot>(&mut self, slot: S) -> Step {
        match slot.class(&self.ctx.heap) {
            Class::Literal => {
                let v = slot.value(&self.ctx.heap);
                self.push_literal(v)
            }
            Class::ExecName(n) => self.exec_name(n),
            Class::ExecOperator { index, special } => self.exec_operator(index, special, None),
            Class::Other => {
                let v = slot.value(&self.ctx.heap);
                self.exec_other(v)
            }
        }
    }

    fn push_literal(&mut self, v: Value) -> Step {
        if self.osp >= self.ctx.ostack.top_limit() {
            self.ctx.ostack.set_requested(1);
            return self.fail(ErrorCode::StackOverflow, v);
        }
        self.osp += 1;
        self.ctx.ostack.set_at(self.osp, v);
        self.ctx.stats.literals += 1;
        Ok(Label::Next)
    }

    fn exec_name(&mut self, n: NameIndex) -> Step {
        let name = Value::exec_name(n);
        let Some(v) = self.ctx.lookup_name(n) else {
            return self.fail(ErrorCode::Undefined, name);
        };
        if v.is_executable() && v.array_ref().is_some() {
            if !v.has_access(psi_core::EXECUTE) {
                return self.fail(ErrorCode::InvalidAccess, name);
            }
            self.store_state();
            return self.call_proc(v, name);
        }
        match classify_value(&v) {
            Class::Literal => self.push_literal(v),
            Class::ExecOperator { index, special } => self.exec_operator(index, special, Some(v)),
            Class::ExecName(_) => self.reinterpret(v),
            Class::Other => match v.payload {
                Payload::Null => Ok(Label::Next),
                Payload::OpArray(index) => self.call_oparray(index, v),
                _ => self.reinterpret(v),
            },
        }
    }

    /// Execute `v` as if it had been the current element.
    fn reinterpret(&mut self, v: Value) -> Step {
        self.store_state();
        self.icount = 0;
        self.cursor = Cursor::Single(v);
        Ok(Label::Top)
    }

    /// Push a procedure and enter it. The caller has stored its state.
    fn call_proc(&mut self, proc: Value, object: Value) -> Step {
        if self.esp >= self.ctx.estack.top_limit() {
            self.ctx.estack.set_requested(1);
            return self.fail(ErrorCode::ExecStackOverflow, object);
        }
        self.esp += 1;
        self.ctx.estack.set_at(self.esp, ExecEntry::Value(proc));
        self.icount = 0;
        Ok(Label::Up)
    }

    fn exec_operator(&mut self, index: OpIndex, special: Option<SpecialOp>, via: Option<Value>) -> Step {
        match special {
            Some(op) => self.fast(op, index, via),
            None => self.call_operator(index, via),
        }
    }

    /// Call an operator through the table and act on its status.
    fn call_operator(&mut self, index: OpIndex, via: Option<Value>) -> Step {
        let op_value = via.unwrap_or_else(|| self.ctx.ops.operator_value(index));
        let Some(def) = self.ctx.ops.def(index) else {
            return self.fail(ErrorCode::Undefined, op_value);
        };
        self.store_state();
        self.sync_out();
        if self.ctx.config.trace_operators {
            trace!(operator = def.name, ostack = self.ctx.ostack.count(), "call");
        }
        self.ctx.stats.operator_calls += 1;
        let esp_before = self.esp;
        let status = (def.proc)(self.ctx);
        self.sync_in();
        match status {
            Ok(OpStatus::Normal | OpStatus::AltSuccess) => Ok(Label::Next),
            Ok(OpStatus::PushEstack) => {
                self.icount = 0;
                Ok(Label::Up)
            }
            Ok(OpStatus::PopEstack) => {
                if self.esp == esp_before {
                    Ok(Label::Next)
                } else {
                    self.icount = 0;
                    Ok(Label::Up)
                }
            }
            Ok(OpStatus::RemapColor) => {
                self.icount = 0;
                if let Err(code) = self.ctx.estack.check_room(2) {
                    return Err(Fault {
                        code,
                        object: op_value,
                    });
                }
                let spliced = push_exec(self.ctx, op_value)
                    .and_then(|_| push_exec(self.ctx, Value::operator(OP_REMAP_COLOR, None)));
                if let Err(code) = spliced {
                    return Err(Fault {
                        code,
                        object: op_value,
                    });
                }
                self.sync_in();
                Ok(Label::Up)
            }
            Err(code) => {
                self.icount = 0;
                Err(Fault {
                    code,
                    object: op_value,
                })
            }
        }
    }

    /// Run a user-defined operator's body under a protection mark.
    fn call_oparray(&mut self, index: OpIndex, object: Value) -> Step {
        let Some(def) = self.ctx.ops.oparray(index).copied() else {
            return self.fail(ErrorCode::Undefined, object);
        };
        if self.esp + 3 > self.ctx.estack.top_limit() {
            self.ctx.estack.set_requested(3);
            return self.fail(ErrorCode::ExecStackOverflow, object);
        }
        self.store_state();
        self.icount = 0;
        self.sync_out();
        let pushed = push_mark(self.ctx, MarkKind::Oparray { index, protect: true })
            .and_then(|_| push_exec(self.ctx, Value::operator(OP_OPARRAY_POP, None)));
        self.sync_in();
        if let Err(code) = pushed {
            return Err(Fault { code, object });
        }
        self.ctx.stats.proc_entries += 1;
        self.call_proc(def.body, object)
    }

    fn exec_other(&mut self, v: Value) -> Step {
        match v.payload {
            Payload::OpArray(index) => self.call_oparray(index, v),
            Payload::Null => Ok(Label::Next),
            Payload::File(_) | Payload::String(_) if !v.has_access(psi_core::EXECUTE) => {
                self.fail(ErrorCode::InvalidAccess, v)
            }
            Payload::File(id) => self.scan_file(v, id),
            Payload::String(s) => self.scan_string(v, s),
            _ => self.push_literal(v),
        }
    }

    // =========================================================================
    // Token sources
    // =========================================================================

    fn scan_string(&mut self, src: Value, s: StrRef) -> Step {
        self.store_state();
        self.icount = 0;
        self.sync_out();
        let scanner = Rc::clone(&self.ctx.scanner);
        let bytes = self.ctx.heap.take_string(s.id);
        let end = (s.start as usize + s.len as usize).min(bytes.len());
        let start = (s.start as usize).min(end);
        let (status, used) = scanner.scan(self.ctx, &bytes[start..end], true, ScanOptions::default());
        self.ctx.heap.restore_string(s.id, bytes);
        self.sync_in();
        let rest = src.tail_from(used as u32);
        match status {
            ScanStatus::Token(tok) => {
                self.push_rest(rest, src)?;
                self.cursor = Cursor::Single(tok);
                Ok(Label::Top)
            }
            ScanStatus::Eof => Ok(Label::Next),
            ScanStatus::Comment(_) => {
                self.push_rest(rest, src)?;
                Ok(Label::Up)
            }
            ScanStatus::BinarySequence(proc) => {
                self.push_rest(rest, src)?;
                self.call_proc(proc, src)
            }
            ScanStatus::Refill => self.fail(ErrorCode::SyntaxError, src),
            ScanStatus::Error(code) => self.fail(code, src),
        }
    }

    /// Re-push the unscanned remainder of a string source.
    fn push_rest(&mut self, rest: Value, src: Value) -> Result<(), Fault> {
        if rest.size() == 0 {
            return Ok(());
        }
        if self.esp >= self.ctx.estack.top_limit() {
            self.ctx.estack.set_requested(1);
            self.fail(ErrorCode::ExecStackOverflow, src)?;
        }
        self.esp += 1;
        self.ctx.estack.set_at(self.esp, ExecEntry::Value(rest));
        Ok(())
    }

    fn scan_file(&mut self, src: Value, id: FileId) -> Step {
        if self.ctx.heap.file(id).is_closed() {
            return Ok(Label::Next);
        }
        self.store_state();
        self.icount = 0;
        self.sync_out();
        let step = self.scan_file_loop(src, id);
        self.sync_in();
        step
    }

    /// Scan tokens off a file until one needs executing. Works on the
    /// context's stacks directly; the caller re-syncs the mirrors.
    fn scan_file_loop(&mut self, src: Value, id: FileId) -> Step {
        let scanner = Rc::clone(&self.ctx.scanner);
        let report_comments =
            self.ctx.config.process_comments && self.ctx.lookup_text("ProcessComment").is_some();
        let options = ScanOptions { report_comments };
        let fault = |code: ErrorCode| Err(Fault { code, object: src });
        loop {
            if let Err(code) = self.ctx.ostack.check_room(1) {
                return fault(code);
            }
            if let Err(code) = self.ctx.estack.check_room(2) {
                return fault(code);
            }
            let at_eof = self.ctx.heap.file(id).at_eof();
            let (buf, pos) = self.ctx.heap.take_file_buffer(id);
            let (status, used) = scanner.scan(self.ctx, &buf[pos.min(buf.len())..], at_eof, options);
            self.ctx.heap.restore_file_buffer(id, buf);
            self.ctx.heap.file_mut(id).advance(used);
            let resume = ExecEntry::Value(src);
            match status {
                ScanStatus::Token(tok) if !tok.is_executable() || tok.array_ref().is_some() => {
                    self.ctx.stats.literals += 1;
                    if let Err(code) = self.ctx.push(tok) {
                        return fault(code);
                    }
                }
                ScanStatus::Token(tok) => {
                    if let Err(code) = self.ctx.estack.push(resume) {
                        return fault(code);
                    }
                    self.cursor = Cursor::Single(tok);
                    self.esp = self.ctx.estack.pointer();
                    return Ok(Label::Top);
                }
                ScanStatus::Eof => {
                    self.ctx.heap.file_mut(id).close();
                    return Ok(Label::Next);
                }
                ScanStatus::Refill => match self.ctx.heap.file_mut(id).fill() {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        if let Err(code) = self.ctx.estack.push(resume) {
                            return fault(code);
                        }
                        return Err(Fault {
                            code: ErrorCode::NeedInput,
                            object: Value::NO_OP,
                        });
                    }
                    Err(e) => {
                        debug!(file = %self.ctx.heap.file(id).name, error = %e, "read failed");
                        return fault(ErrorCode::IoError);
                    }
                },
                ScanStatus::Comment(text) => {
                    let Some(handler) = self.ctx.lookup_text("ProcessComment") else {
                        continue;
                    };
                    let comment = self.ctx.alloc_string(text);
                    let pushed = self
                        .ctx
                        .estack
                        .push(resume)
                        .and_then(|_| self.ctx.push(comment))
                        .and_then(|_| self.ctx.estack.push(ExecEntry::Value(handler)));
                    if let Err(code) = pushed {
                        return fault(code);
                    }
                    return Ok(Label::Up);
                }
                ScanStatus::BinarySequence(proc) => {
                    let pushed = self
                        .ctx
                        .estack
                        .push(resume)
                        .and_then(|_| self.ctx.estack.push(ExecEntry::Value(proc)));
                    if let Err(code) = pushed {
                        return fault(code);
                    }
                    return Ok(Label::Up);
                }
                ScanStatus::Error(code) => return fault(code),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpConfig;
    use crate::operators::OP_INTERP_EXIT;

    fn ctx() -> Context {
        Context::new(InterpConfig::default())
    }

    /// Run `src` above an exit sentinel and return the final fault.
    fn run_source(ctx: &mut Context, src: &[u8]) -> Fault {
        push_exec(ctx, Value::operator(OP_INTERP_EXIT, None)).unwrap();
        let s = ctx.alloc_string(src.to_vec()).cvx();
        let fault = interp(ctx, s);
        if fault.code == ErrorCode::TimeSlice {
            return finish(ctx);
        }
        fault
    }

    fn finish(ctx: &mut Context) -> Fault {
        loop {
            let fault = interp(ctx, Value::NO_OP);
            if fault.code != ErrorCode::TimeSlice {
                return fault;
            }
        }
    }

    fn ints(ctx: &Context) -> Vec<i64> {
        ctx.ostack.to_vec().iter().filter_map(|v| v.as_int()).collect()
    }

    #[test]
    fn test_arithmetic_and_names() {
        let mut ctx = ctx();
        let fault = run_source(&mut ctx, b"/x 3 def x x add 1 sub");
        assert_eq!(fault.code, ErrorCode::InterpreterExit);
        assert_eq!(ints(&ctx), vec![5]);
    }

    #[test]
    fn test_procedures_and_control() {
        let mut ctx = ctx();
        let fault = run_source(&mut ctx, b"/sq { dup mul } def 0 1 1 4 { sq add } for true { 7 } if");
        assert_eq!(fault.code, ErrorCode::InterpreterExit);
        assert_eq!(ints(&ctx), vec![30, 7]);
    }

    #[test]
    fn test_undefined_name_reports_name() {
        let mut ctx = ctx();
        let fault = run_source(&mut ctx, b"1 nosuch");
        assert_eq!(fault.code, ErrorCode::Undefined);
        let n = fault.object.as_name().unwrap();
        assert_eq!(ctx.names.display(n), "nosuch");
        assert!(fault.object.is_executable());
        assert_eq!(ints(&ctx), vec![1]);
    }

    #[test]
    fn test_fast_path_error_object_is_operator() {
        let mut ctx = ctx();
        let fault = run_source(&mut ctx, b"exch");
        assert_eq!(fault.code, ErrorCode::StackUnderflow);
        assert_eq!(fault.object, ctx.lookup_text("exch").unwrap());
    }

    #[test]
    fn test_tail_call_does_not_grow_estack() {
        let config = InterpConfig {
            max_estack: 40,
            estack_block: 40,
            estack_expansion: false,
            ..Default::default()
        };
        let mut ctx = Context::new(config);
        let fault = run_source(
            &mut ctx,
            b"/n 0 def /f { /n n 1 add def n 2000 lt { f } if } def f n",
        );
        assert_eq!(fault.code, ErrorCode::InterpreterExit);
        assert_eq!(ints(&ctx), vec![2000]);
    }

    #[test]
    fn test_time_slice_yields_and_resumes() {
        let config = InterpConfig {
            time_slice: 5,
            ..Default::default()
        };
        let mut ctx = Context::new(config);
        push_exec(&mut ctx, Value::operator(OP_INTERP_EXIT, None)).unwrap();
        let s = ctx.alloc_string(b"0 100 { 1 add } repeat".to_vec()).cvx();
        let mut fault = interp(&mut ctx, s);
        let mut slices = 0;
        while fault.code == ErrorCode::TimeSlice {
            slices += 1;
            fault = interp(&mut ctx, Value::NO_OP);
        }
        assert_eq!(fault.code, ErrorCode::InterpreterExit);
        assert!(slices > 10);
        assert_eq!(ints(&ctx), vec![100]);
        assert_eq!(ctx.stats.slices, slices);
    }

    #[test]
    fn test_allocation_signal_returns_vm_reclaim() {
        let mut ctx = ctx();
        push_exec(&mut ctx, Value::operator(OP_INTERP_EXIT, None)).unwrap();
        ctx.ticks_left = GC_SIGNAL;
        let fault = interp(&mut ctx, Value::NO_OP);
        assert_eq!(fault.code, ErrorCode::VmReclaim);
        assert_eq!(ctx.reclaim_request, Some(ReclaimScope::All));
        assert_eq!(ctx.ticks_left, ctx.quantum);
    }

    #[test]
    fn test_interrupt_at_checkpoint() {
        let mut ctx = ctx();
        push_exec(&mut ctx, Value::operator(OP_INTERP_EXIT, None)).unwrap();
        ctx.interrupt.store(true, Ordering::SeqCst);
        ctx.ticks_left = 0;
        let fault = interp(&mut ctx, Value::NO_OP);
        assert_eq!(fault.code, ErrorCode::Interrupt);
        assert_eq!(finish(&mut ctx).code, ErrorCode::InterpreterExit);
    }

    #[test]
    fn test_literal_overflow_keeps_state() {
        let config = InterpConfig {
            max_ostack: 3,
            ostack_block: 3,
            ..Default::default()
        };
        let mut ctx = Context::new(config);
        let fault = run_source(&mut ctx, b"1 2 3 4 5");
        assert_eq!(fault.code, ErrorCode::StackOverflow);
        assert_eq!(fault.object, Value::integer(4));
        assert_eq!(ints(&ctx), vec![1, 2, 3]);
    }

    #[test]
    fn test_oparray_runs_under_mark() {
        let mut ctx = ctx();
        let depth = ctx.estack.count() as i64;
        let fault = run_source(
            &mut ctx,
            b"/inc { 1 add countexecstack } .makeoperator /inc exch def 41 inc countexecstack",
        );
        assert_eq!(fault.code, ErrorCode::InterpreterExit);
        // Inside: sentinel, mark, %oparray_pop. After: sentinel only.
        assert_eq!(ints(&ctx), vec![42, depth + 3, depth + 1]);
    }

    #[test]
    fn test_remap_color_splice() {
        let mut ctx = ctx();
        let fault = run_source(&mut ctx, b"0.5 setgray currentgray");
        assert_eq!(fault.code, ErrorCode::InterpreterExit);
        assert_eq!(ctx.ostack.to_vec(), vec![Value::real(0.5)]);
        assert_eq!(ctx.color.remaps, 1);
    }

    #[test]
    fn test_file_source_with_small_chunks() {
        let config = InterpConfig {
            file_chunk: 3,
            ..Default::default()
        };
        let mut ctx = Context::new(config);
        let reader = std::io::Cursor::new(b"10 20 add (abc) length add".to_vec());
        let id = ctx
            .heap
            .alloc_file(psi_core::FileObj::from_reader("mem", Box::new(reader), 3));
        push_exec(&mut ctx, Value::operator(OP_INTERP_EXIT, None)).unwrap();
        let mut fault = interp(&mut ctx, Value::file(id).cvx());
        while fault.code == ErrorCode::TimeSlice {
            fault = interp(&mut ctx, Value::NO_OP);
        }
        assert_eq!(fault.code, ErrorCode::InterpreterExit);
        assert_eq!(ints(&ctx), vec![33]);
    }
}
