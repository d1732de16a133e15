//! Control operators
//!
//! Every looping construct is built on the continuation protocol: the
//! operator pushes a `For` mark, its saved state and a continuation operator,
//! then runs the continuation once itself. The continuation re-pushes itself
//! and the body for each iteration and pops the whole frame when done.
//!
//! ```text
//!   repeat:  Mark(For)  count  proc            %repeat_continue  proc
//!   for:     Mark(For)  next  incr  limit  proc  %for_*_continue   proc
//!   loop:    Mark(For)  proc                   %loop_continue    proc
//!   stopped: Mark(Stopped)  false  %stopped_push  obj
//! ```
//!
//! Continuations run with their own entry already popped, so the saved state
//! sits at the top of the execution stack. They check for room before
//! touching anything.

use super::{
    OP_FOR_INT_CONTINUE, OP_FOR_REAL_CONTINUE, OP_LOOP_CONTINUE, OP_REPEAT_CONTINUE,
    OP_STOPPED_PUSH, OpDef, OpResult, OpStatus,
};
use crate::context::{Context, check_proc};
use crate::estack::{
    ExecEntry, MarkKind, count_exec_stack, count_to_mark, count_to_stopped, exec_value, pop_estack,
    push_exec, push_mark, set_exec_value,
};
use psi_core::{ErrorCode, Payload, Value};

pub const OPS: &[OpDef] = &[
    OpDef { name: "exec", proc: op_exec },
    OpDef { name: "repeat", proc: op_repeat },
    OpDef { name: "loop", proc: op_loop },
    OpDef { name: "for", proc: op_for },
    OpDef { name: "exit", proc: op_exit },
    OpDef { name: "stop", proc: op_stop },
    OpDef { name: "stopped", proc: op_stopped },
    OpDef { name: "countexecstack", proc: op_countexecstack },
    OpDef { name: "quit", proc: op_quit },
    OpDef { name: "currentfile", proc: op_currentfile },
];

fn continuation(index: psi_core::OpIndex) -> Value {
    Value::operator(index, None)
}

/// `any exec -`
pub fn op_exec(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let v = ctx.operand(0);
    if !v.is_executable() {
        return Ok(OpStatus::Normal);
    }
    let needs_execute = matches!(
        v.payload,
        Payload::Array(_) | Payload::PackedArray(_) | Payload::String(_) | Payload::File(_)
    );
    if needs_execute && !v.has_access(psi_core::EXECUTE) {
        return Err(ErrorCode::InvalidAccess);
    }
    push_exec(ctx, v)?;
    ctx.pop(1)?;
    Ok(OpStatus::PushEstack)
}

/// `bool proc if -`
pub fn op_if(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let proc = check_proc(ctx.operand(0))?;
    let cond = ctx.bool_operand(1)?;
    if !cond {
        ctx.pop(2)?;
        return Ok(OpStatus::Normal);
    }
    push_exec(ctx, proc)?;
    ctx.pop(2)?;
    Ok(OpStatus::PushEstack)
}

/// `bool proc1 proc2 ifelse -`
pub fn op_ifelse(ctx: &mut Context) -> OpResult {
    ctx.check_ops(3)?;
    let else_proc = check_proc(ctx.operand(0))?;
    let then_proc = check_proc(ctx.operand(1))?;
    let cond = ctx.bool_operand(2)?;
    push_exec(ctx, if cond { then_proc } else { else_proc })?;
    ctx.pop(3)?;
    Ok(OpStatus::PushEstack)
}

// =============================================================================
// Loops
// =============================================================================

/// `int proc repeat -`
pub fn op_repeat(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let proc = check_proc(ctx.operand(0))?;
    let count = ctx.int_operand(1)?;
    if count < 0 {
        return Err(ErrorCode::RangeCheck);
    }
    ctx.estack.check_room(5)?;
    push_mark(ctx, MarkKind::For)?;
    push_exec(ctx, Value::integer(count))?;
    push_exec(ctx, proc)?;
    ctx.pop(2)?;
    op_repeat_continue(ctx)
}

/// Estack: `Mark(For) count proc`.
pub fn op_repeat_continue(ctx: &mut Context) -> OpResult {
    let count = exec_value(ctx, 1)?.as_int().ok_or(ErrorCode::Fatal)?;
    if count <= 0 {
        ctx.estack.pop(3)?;
        return Ok(OpStatus::PopEstack);
    }
    ctx.estack.check_room(2)?;
    let proc = exec_value(ctx, 0)?;
    set_exec_value(ctx, 1, Value::integer(count - 1))?;
    push_exec(ctx, continuation(OP_REPEAT_CONTINUE))?;
    push_exec(ctx, proc)?;
    Ok(OpStatus::PushEstack)
}

/// `proc loop -`
pub fn op_loop(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let proc = check_proc(ctx.operand(0))?;
    ctx.estack.check_room(4)?;
    push_mark(ctx, MarkKind::For)?;
    push_exec(ctx, proc)?;
    ctx.pop(1)?;
    op_loop_continue(ctx)
}

/// Estack: `Mark(For) proc`.
pub fn op_loop_continue(ctx: &mut Context) -> OpResult {
    ctx.estack.check_room(2)?;
    let proc = exec_value(ctx, 0)?;
    push_exec(ctx, continuation(OP_LOOP_CONTINUE))?;
    push_exec(ctx, proc)?;
    Ok(OpStatus::PushEstack)
}

/// `initial increment limit proc for -`
///
/// All-integer operands count with integers; anything else counts in reals.
pub fn op_for(ctx: &mut Context) -> OpResult {
    ctx.check_ops(4)?;
    let proc = check_proc(ctx.operand(0))?;
    let limit = ctx.operand(1);
    let incr = ctx.operand(2);
    let init = ctx.operand(3);
    let cont = match (init.payload, incr.payload, limit.payload) {
        (Payload::Integer(_), Payload::Integer(_), Payload::Integer(_)) => OP_FOR_INT_CONTINUE,
        _ => {
            ctx.real_operand(1)?;
            ctx.real_operand(2)?;
            ctx.real_operand(3)?;
            OP_FOR_REAL_CONTINUE
        }
    };
    let as_real = |i: usize| ctx.real_operand(i).map(Value::real);
    let (init, incr, limit) = if cont == OP_FOR_INT_CONTINUE {
        (init, incr, limit)
    } else {
        (as_real(3)?, as_real(2)?, as_real(1)?)
    };
    ctx.estack.check_room(7)?;
    push_mark(ctx, MarkKind::For)?;
    push_exec(ctx, init)?;
    push_exec(ctx, incr)?;
    push_exec(ctx, limit)?;
    push_exec(ctx, proc)?;
    ctx.pop(4)?;
    if cont == OP_FOR_INT_CONTINUE {
        op_for_int_continue(ctx)
    } else {
        op_for_real_continue(ctx)
    }
}

/// Estack: `Mark(For) next incr limit proc`.
pub fn op_for_int_continue(ctx: &mut Context) -> OpResult {
    let int = |v: Value| v.as_int().ok_or(ErrorCode::Fatal);
    let next = int(exec_value(ctx, 3)?)?;
    let incr = int(exec_value(ctx, 2)?)?;
    let limit = int(exec_value(ctx, 1)?)?;
    let done = if incr >= 0 { next > limit } else { next < limit };
    if done {
        ctx.estack.pop(5)?;
        return Ok(OpStatus::PopEstack);
    }
    ctx.ostack.check_room(1)?;
    ctx.estack.check_room(2)?;
    let proc = exec_value(ctx, 0)?;
    ctx.push(Value::integer(next))?;
    set_exec_value(ctx, 3, Value::integer(next.saturating_add(incr)))?;
    push_exec(ctx, Value::operator(OP_FOR_INT_CONTINUE, None))?;
    push_exec(ctx, proc)?;
    Ok(OpStatus::PushEstack)
}

/// Real-valued variant of [`op_for_int_continue`].
pub fn op_for_real_continue(ctx: &mut Context) -> OpResult {
    let real = |v: Value| match v.payload {
        Payload::Real(r) => Ok(r),
        _ => Err(ErrorCode::Fatal),
    };
    let next = real(exec_value(ctx, 3)?)?;
    let incr = real(exec_value(ctx, 2)?)?;
    let limit = real(exec_value(ctx, 1)?)?;
    let done = if incr >= 0.0 { next > limit } else { next < limit };
    if done {
        ctx.estack.pop(5)?;
        return Ok(OpStatus::PopEstack);
    }
    ctx.ostack.check_room(1)?;
    ctx.estack.check_room(2)?;
    let proc = exec_value(ctx, 0)?;
    ctx.push(Value::real(next))?;
    set_exec_value(ctx, 3, Value::real(next + incr))?;
    push_exec(ctx, continuation(OP_FOR_REAL_CONTINUE))?;
    push_exec(ctx, proc)?;
    Ok(OpStatus::PushEstack)
}

/// Leave the innermost loop. With no loop to leave, or a `stopped` mark in
/// the way, this is an `invalidexit` error.
pub fn op_exit(ctx: &mut Context) -> OpResult {
    let target = count_to_mark(ctx, |k| matches!(k, MarkKind::For | MarkKind::Stopped { .. }));
    let Some(count) = target else {
        return Err(ErrorCode::InvalidExit);
    };
    let is_loop = matches!(
        ctx.estack.index(count - 1),
        Some(ExecEntry::Mark(m)) if m.kind == MarkKind::For
    );
    if !is_loop {
        return Err(ErrorCode::InvalidExit);
    }
    pop_estack(ctx, count)?;
    Ok(OpStatus::PopEstack)
}

/// `stop` with no `stopped` to catch it ends the run.
fn unmatched_stop(ctx: &mut Context) -> OpResult {
    ctx.quit_code = ErrorCode::InvalidExit.code();
    Err(ErrorCode::Quit)
}

/// Unwind to the innermost `stopped` and make it push `true`.
pub(crate) fn stop_to_stopped(ctx: &mut Context, count: usize) -> OpResult {
    ctx.ostack.check_room(1)?;
    pop_estack(ctx, count)?;
    ctx.push(Value::boolean(true))?;
    Ok(OpStatus::PopEstack)
}

pub fn op_stop(ctx: &mut Context) -> OpResult {
    match count_to_stopped(ctx, 1) {
        Some(count) => stop_to_stopped(ctx, count),
        None => unmatched_stop(ctx),
    }
}

/// `any stopped bool`
pub fn op_stopped(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let obj = ctx.operand(0);
    ctx.estack.check_room(4)?;
    push_mark(ctx, MarkKind::Stopped { mask: 1 })?;
    push_exec(ctx, Value::boolean(false))?;
    push_exec(ctx, continuation(OP_STOPPED_PUSH))?;
    push_exec(ctx, obj)?;
    ctx.pop(1)?;
    Ok(OpStatus::PushEstack)
}

/// Normal completion of `stopped`. Estack: `Mark(Stopped) false`.
pub fn op_stopped_push(ctx: &mut Context) -> OpResult {
    ctx.ostack.check_room(1)?;
    let result = exec_value(ctx, 0)?;
    ctx.push(result)?;
    ctx.estack.pop(2)?;
    Ok(OpStatus::PopEstack)
}

pub fn op_countexecstack(ctx: &mut Context) -> OpResult {
    let n = count_exec_stack(ctx) as i64;
    ctx.push(Value::integer(n))?;
    Ok(OpStatus::Normal)
}

pub fn op_quit(ctx: &mut Context) -> OpResult {
    ctx.quit_code = 0;
    Err(ErrorCode::Quit)
}

/// The file being executed, or null when no file is.
pub fn op_currentfile(ctx: &mut Context) -> OpResult {
    let file = ctx
        .estack
        .iter_from_top()
        .filter_map(|e| e.value())
        .find(|v| matches!(v.payload, Payload::File(_)) && v.is_executable())
        .map(|v| v.cvlit())
        .unwrap_or(Value::NULL);
    ctx.push(file)?;
    Ok(OpStatus::Normal)
}

/// Bottom sentinel of every run.
pub fn op_interp_exit(_ctx: &mut Context) -> OpResult {
    Err(ErrorCode::InterpreterExit)
}

/// Planted in the execution stack's guard slot.
pub fn op_estack_underflow(_ctx: &mut Context) -> OpResult {
    Err(ErrorCode::ExecStackUnderflow)
}
