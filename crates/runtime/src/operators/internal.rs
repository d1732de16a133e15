//! Protected-call and error-reporting operators
//!
//! These are the pieces the error machinery is written in:
//!
//! - `.errorexec` runs an object under an `ErrorExec` mark, so that errors
//!   inside it are reported against a caller-chosen object;
//! - `.makeoperator` turns a procedure into an oparray (a user-defined
//!   operator whose body runs under a protection mark);
//! - `.error` is what the default `errordict` handlers call: it records the
//!   error in `$error` and unwinds to the innermost `stopped`.

use super::control::stop_to_stopped;
use super::{OP_ERROREXEC_POP, OpDef, OpResult, OpStatus, OparrayDef};
use crate::context::Context;
use crate::estack::{
    ExecEntry, Mark, MarkKind, count_to_stopped, errorexec_find, oparray_find, push_exec,
    push_mark,
};
use psi_core::{DictKey, ErrorCode, Payload, Value};
use tracing::debug;

pub const OPS: &[OpDef] = &[
    OpDef { name: ".errorexec", proc: op_errorexec },
    OpDef { name: ".finderrorobject", proc: op_finderrorobject },
    OpDef { name: ".setstackprotect", proc: op_setstackprotect },
    OpDef { name: ".currentstackprotect", proc: op_currentstackprotect },
    OpDef { name: ".makeoperator", proc: op_makeoperator },
    OpDef { name: ".error", proc: op_error },
];

/// `obj errobj .errorexec -`
pub fn op_errorexec(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let obj = ctx.operand(1);
    let errobj = ctx.operand(0);
    ctx.estack.check_room(4)?;
    ctx.pop(2)?;
    push_mark(ctx, MarkKind::ErrorExec)?;
    push_exec(ctx, errobj)?;
    push_exec(ctx, Value::operator(OP_ERROREXEC_POP, None))?;
    push_exec(ctx, obj)?;
    Ok(OpStatus::PushEstack)
}

/// Normal completion of `.errorexec`. Estack: `Mark(ErrorExec) errobj`.
pub fn op_errorexec_pop(ctx: &mut Context) -> OpResult {
    ctx.estack.pop(2)?;
    Ok(OpStatus::PopEstack)
}

/// Normal completion of an oparray body. Estack: `Mark(Oparray)`.
pub fn op_oparray_pop(ctx: &mut Context) -> OpResult {
    ctx.estack.pop(1)?;
    Ok(OpStatus::PopEstack)
}

/// `- .finderrorobject obj true | false`
pub fn op_finderrorobject(ctx: &mut Context) -> OpResult {
    match errorexec_find(ctx) {
        Some(obj) => {
            ctx.ostack.check_room(2)?;
            ctx.push(obj)?;
            ctx.push(Value::boolean(true))?;
        }
        None => ctx.push(Value::boolean(false))?,
    }
    Ok(OpStatus::Normal)
}

/// `bool .setstackprotect -`: turn stack restoration on or off for the
/// innermost running oparray.
pub fn op_setstackprotect(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let protect = ctx.bool_operand(0)?;
    let depth = oparray_find(ctx).ok_or(ErrorCode::RangeCheck)?;
    match ctx.estack.index_mut(depth) {
        Some(ExecEntry::Mark(Mark {
            kind: MarkKind::Oparray { protect: p, .. },
            ..
        })) => *p = protect,
        _ => return Err(ErrorCode::Fatal),
    }
    ctx.pop(1)?;
    Ok(OpStatus::Normal)
}

pub fn op_currentstackprotect(ctx: &mut Context) -> OpResult {
    let depth = oparray_find(ctx).ok_or(ErrorCode::RangeCheck)?;
    let protect = match ctx.estack.index(depth) {
        Some(ExecEntry::Mark(Mark {
            kind: MarkKind::Oparray { protect, .. },
            ..
        })) => protect,
        _ => return Err(ErrorCode::Fatal),
    };
    ctx.push(Value::boolean(protect))?;
    Ok(OpStatus::Normal)
}

/// `name proc .makeoperator operator`
pub fn op_makeoperator(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let body = ctx.proc_operand(0)?;
    let name = ctx.name_operand(1)?;
    let index = ctx.ops.add_oparray(OparrayDef { name, body })?;
    debug!(name = %ctx.names.display(name), index, "operator defined");
    ctx.pop(1)?;
    ctx.set_operand(0, Value::oparray(index));
    Ok(OpStatus::Normal)
}

fn record_error(ctx: &mut Context, command: Value, errorname: Value) -> Result<(), ErrorCode> {
    let dollar = ctx.dollar_error();
    let entries = [
        ("newerror", Value::boolean(true)),
        ("errorname", errorname),
        ("command", command),
    ];
    for (key, v) in entries {
        let key = DictKey::Name(ctx.names.intern(key.as_bytes()));
        ctx.force_put(dollar, key, v)?;
    }
    Ok(())
}

/// `obj /errorname .error -`
///
/// Record the error in `$error`, then behave like `stop`. With no `stopped`
/// to catch it the error ends the run.
pub fn op_error(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let errorname = ctx.operand(0);
    let Payload::Name(n) = errorname.payload else {
        return Err(ErrorCode::TypeCheck);
    };
    let command = ctx.operand(1);
    record_error(ctx, command, errorname)?;
    ctx.pop(2)?;
    if let Some(count) = count_to_stopped(ctx, 1) {
        return stop_to_stopped(ctx, count);
    }
    let text = ctx.names.display(n);
    Err(ErrorCode::from_name(&text).unwrap_or(ErrorCode::UnknownError))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpConfig;
    use crate::estack::exec_value;

    fn ctx() -> Context {
        Context::new(InterpConfig::default())
    }

    #[test]
    fn test_errorexec_shape() {
        let mut ctx = ctx();
        let depth = ctx.estack.count();
        ctx.push(Value::integer(1)).unwrap();
        ctx.push(Value::integer(99)).unwrap();
        assert_eq!(op_errorexec(&mut ctx), Ok(OpStatus::PushEstack));
        assert_eq!(ctx.estack.count(), depth + 4);
        assert_eq!(exec_value(&ctx, 0), Ok(Value::integer(1)));
        ctx.estack.pop(1).unwrap();
        assert_eq!(errorexec_find(&ctx), Some(Value::integer(99)));
        ctx.estack.pop(1).unwrap();
        op_errorexec_pop(&mut ctx).unwrap();
        assert_eq!(ctx.estack.count(), depth);
    }

    #[test]
    fn test_finderrorobject() {
        let mut ctx = ctx();
        op_finderrorobject(&mut ctx).unwrap();
        assert_eq!(ctx.ostack.to_vec(), vec![Value::boolean(false)]);
    }

    #[test]
    fn test_stackprotect_needs_oparray() {
        let mut ctx = ctx();
        assert_eq!(op_currentstackprotect(&mut ctx), Err(ErrorCode::RangeCheck));
        push_mark(&mut ctx, MarkKind::Oparray { index: 4096, protect: true }).unwrap();
        push_exec(&mut ctx, Value::NO_OP).unwrap();
        ctx.push(Value::boolean(false)).unwrap();
        op_setstackprotect(&mut ctx).unwrap();
        op_currentstackprotect(&mut ctx).unwrap();
        assert_eq!(ctx.ostack.to_vec(), vec![Value::boolean(false)]);
    }

    #[test]
    fn test_makeoperator() {
        let mut ctx = ctx();
        let name = Value::name(ctx.names.intern(b"double"));
        let body = ctx.alloc_proc(vec![Value::integer(2)]).unwrap();
        ctx.push(name).unwrap();
        ctx.push(body).unwrap();
        op_makeoperator(&mut ctx).unwrap();
        let op = ctx.operand(0);
        assert_eq!(op, Value::oparray(psi_core::OPARRAY_BASE));
        assert_eq!(ctx.operator_name(&op).as_deref(), Some("double"));
    }

    #[test]
    fn test_error_records_and_returns_code() {
        let mut ctx = ctx();
        let errorname = Value::name(ctx.names.intern(b"rangecheck"));
        ctx.push(Value::integer(5)).unwrap();
        ctx.push(errorname).unwrap();
        assert_eq!(op_error(&mut ctx), Err(ErrorCode::RangeCheck));
        assert_eq!(ctx.ostack.count(), 0);
        let dollar = ctx.dollar_error();
        let key = DictKey::Name(ctx.names.intern(b"errorname"));
        assert_eq!(ctx.heap.dict_get(dollar, &key), Some(errorname));
    }
}
