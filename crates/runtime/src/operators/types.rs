//! Type, attribute and conversion operators

use super::{OpDef, OpResult, OpStatus};
use crate::context::Context;
use crate::print::cvs_text;
use psi_core::{ErrorCode, Payload, Value};

pub const OPS: &[OpDef] = &[
    OpDef { name: "type", proc: op_type },
    OpDef { name: "cvx", proc: op_cvx },
    OpDef { name: "cvlit", proc: op_cvlit },
    OpDef { name: "xcheck", proc: op_xcheck },
    OpDef { name: "executeonly", proc: op_executeonly },
    OpDef { name: "noaccess", proc: op_noaccess },
    OpDef { name: "readonly", proc: op_readonly },
    OpDef { name: "rcheck", proc: op_rcheck },
    OpDef { name: "wcheck", proc: op_wcheck },
    OpDef { name: "cvs", proc: op_cvs },
    OpDef { name: "cvi", proc: op_cvi },
    OpDef { name: "cvn", proc: op_cvn },
];

/// `any type name`
pub fn op_type(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let name = ctx.operand(0).kind().type_name();
    let n = ctx.names.intern(name.as_bytes());
    ctx.set_operand(0, Value::exec_name(n));
    Ok(OpStatus::Normal)
}

pub fn op_cvx(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let v = ctx.operand(0).cvx();
    ctx.set_operand(0, v);
    Ok(OpStatus::Normal)
}

pub fn op_cvlit(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let v = ctx.operand(0).cvlit();
    ctx.set_operand(0, v);
    Ok(OpStatus::Normal)
}

pub fn op_xcheck(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let x = ctx.operand(0).is_executable();
    ctx.set_operand(0, Value::boolean(x));
    Ok(OpStatus::Normal)
}

/// Reduce access. Dictionary access lives with the dictionary; everything
/// else carries it in the value.
fn restrict(ctx: &mut Context, access: u8) -> OpResult {
    ctx.check_ops(1)?;
    let v = ctx.operand(0);
    match v.payload {
        Payload::Dict(d) => {
            let current = ctx.heap.dict(d).access;
            ctx.heap.set_dict_access(d, current & access);
        }
        Payload::Array(_) | Payload::PackedArray(_) | Payload::String(_) | Payload::File(_) => {
            let reduced = v.with_access(v.attrs.access & access);
            ctx.set_operand(0, reduced);
        }
        _ => return Err(ErrorCode::TypeCheck),
    }
    Ok(OpStatus::Normal)
}

pub fn op_executeonly(ctx: &mut Context) -> OpResult {
    if matches!(ctx.ostack.top().map(|v| v.payload), Some(Payload::Dict(_))) {
        return Err(ErrorCode::TypeCheck);
    }
    restrict(ctx, psi_core::EXECUTE)
}

pub fn op_noaccess(ctx: &mut Context) -> OpResult {
    restrict(ctx, 0)
}

pub fn op_readonly(ctx: &mut Context) -> OpResult {
    restrict(ctx, psi_core::READ | psi_core::EXECUTE)
}

fn access_check(ctx: &mut Context, bits: u8) -> OpResult {
    ctx.check_ops(1)?;
    let v = ctx.operand(0);
    let ok = match v.payload {
        Payload::Dict(d) => ctx.heap.dict(d).access & bits == bits,
        Payload::Array(_) | Payload::PackedArray(_) | Payload::String(_) | Payload::File(_) => {
            v.has_access(bits)
        }
        _ => return Err(ErrorCode::TypeCheck),
    };
    ctx.set_operand(0, Value::boolean(ok));
    Ok(OpStatus::Normal)
}

pub fn op_rcheck(ctx: &mut Context) -> OpResult {
    access_check(ctx, psi_core::READ)
}

pub fn op_wcheck(ctx: &mut Context) -> OpResult {
    access_check(ctx, psi_core::WRITE)
}

/// `any string cvs substring`
pub fn op_cvs(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let dest = ctx.operand(0);
    let Payload::String(s) = dest.payload else {
        return Err(ErrorCode::TypeCheck);
    };
    if !dest.has_access(psi_core::WRITE) {
        return Err(ErrorCode::InvalidAccess);
    }
    let text = cvs_text(ctx, &ctx.operand(1));
    if text.len() > s.len as usize {
        return Err(ErrorCode::RangeCheck);
    }
    ctx.heap.string_bytes_mut(s)[..text.len()].copy_from_slice(text.as_bytes());
    ctx.pop(1)?;
    ctx.set_operand(0, dest.interval(0, text.len() as u32));
    Ok(OpStatus::Normal)
}

/// `num cvi int`
pub fn op_cvi(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let n = match ctx.operand(0).payload {
        Payload::Integer(i) => i,
        Payload::Real(r) if r.is_finite() && r.abs() < 9.0e18 => r.trunc() as i64,
        Payload::Real(_) => return Err(ErrorCode::RangeCheck),
        _ => return Err(ErrorCode::TypeCheck),
    };
    ctx.set_operand(0, Value::integer(n));
    Ok(OpStatus::Normal)
}

/// `string cvn name`, keeping the string's executability.
pub fn op_cvn(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let v = ctx.operand(0);
    let bytes = ctx.string_operand(0)?;
    let n = ctx.names.intern(&bytes);
    let name = if v.is_executable() {
        Value::exec_name(n)
    } else {
        Value::name(n)
    };
    ctx.set_operand(0, name);
    Ok(OpStatus::Normal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpConfig;

    fn ctx() -> Context {
        Context::new(InterpConfig::default())
    }

    #[test]
    fn test_type_is_executable_name() {
        let mut ctx = ctx();
        ctx.push(Value::real(1.5)).unwrap();
        op_type(&mut ctx).unwrap();
        let v = ctx.operand(0);
        assert!(v.is_executable());
        assert_eq!(ctx.names.display(v.as_name().unwrap()), "realtype");
    }

    #[test]
    fn test_readonly_array_fails_wcheck() {
        let mut ctx = ctx();
        let arr = ctx.alloc_array(vec![]).unwrap();
        ctx.push(arr).unwrap();
        op_readonly(&mut ctx).unwrap();
        op_wcheck(&mut ctx).unwrap();
        assert_eq!(ctx.operand(0), Value::boolean(false));
    }

    #[test]
    fn test_noaccess_dict() {
        let mut ctx = ctx();
        let d = ctx.alloc_dict(1);
        ctx.push(d).unwrap();
        op_noaccess(&mut ctx).unwrap();
        op_rcheck(&mut ctx).unwrap();
        assert_eq!(ctx.operand(0), Value::boolean(false));
    }

    #[test]
    fn test_cvs_writes_into_prefix() {
        let mut ctx = ctx();
        let s = ctx.alloc_string(vec![b' '; 10]);
        ctx.push(Value::integer(-42)).unwrap();
        ctx.push(s).unwrap();
        op_cvs(&mut ctx).unwrap();
        let Payload::String(r) = ctx.operand(0).payload else {
            panic!("expected string");
        };
        assert_eq!(ctx.heap.string_bytes(r), b"-42");

        let small = ctx.alloc_string(vec![0; 1]);
        ctx.push(Value::integer(100)).unwrap();
        ctx.push(small).unwrap();
        assert_eq!(op_cvs(&mut ctx), Err(ErrorCode::RangeCheck));
    }

    #[test]
    fn test_cvi_truncates() {
        let mut ctx = ctx();
        ctx.push(Value::real(-3.7)).unwrap();
        op_cvi(&mut ctx).unwrap();
        assert_eq!(ctx.operand(0), Value::integer(-3));
    }
}
