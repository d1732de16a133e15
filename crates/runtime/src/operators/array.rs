//! Array and packed array operators
//!
//! Packed arrays are read-only. `packedarray` fails with `limitcheck` when an
//! element cannot be represented (see `psi_core::packed`); procedures built
//! by the scanner fall back to plain arrays instead.

use super::stack::find_mark;
use super::{OpDef, OpResult, OpStatus};
use crate::context::Context;
use psi_core::{DictKey, ErrorCode, Payload, Value};

pub const OPS: &[OpDef] = &[
    OpDef { name: "[", proc: op_mark_begin },
    OpDef { name: "]", proc: op_array_from_mark },
    OpDef { name: "array", proc: op_array },
    OpDef { name: "astore", proc: op_astore },
    OpDef { name: "aload", proc: op_aload },
    OpDef { name: "packedarray", proc: op_packedarray },
    OpDef { name: "setpacking", proc: op_setpacking },
    OpDef { name: "currentpacking", proc: op_currentpacking },
    OpDef { name: "<<", proc: op_mark_begin },
    OpDef { name: ">>", proc: op_dict_from_mark },
];

pub fn op_mark_begin(ctx: &mut Context) -> OpResult {
    ctx.push(Value::mark())?;
    Ok(OpStatus::Normal)
}

/// Values above the topmost mark, bottom first.
fn values_to_mark(ctx: &Context) -> Result<Vec<Value>, ErrorCode> {
    let depth = find_mark(ctx)?;
    Ok((0..depth).rev().map(|i| ctx.operand(i)).collect())
}

/// `mark obj0 ... objn-1 ] array`
pub fn op_array_from_mark(ctx: &mut Context) -> OpResult {
    let values = values_to_mark(ctx)?;
    let n = values.len();
    let arr = ctx.alloc_array(values)?;
    ctx.pop(n)?;
    ctx.set_operand(0, arr);
    Ok(OpStatus::Normal)
}

/// `mark key0 value0 ... >> dict`
pub fn op_dict_from_mark(ctx: &mut Context) -> OpResult {
    let values = values_to_mark(ctx)?;
    if values.len() % 2 != 0 {
        return Err(ErrorCode::RangeCheck);
    }
    let mut entries: Vec<(DictKey, Value)> = Vec::with_capacity(values.len() / 2);
    for pair in values.chunks(2) {
        let key = ctx.heap.dict_key(&mut ctx.names, &pair[0])?;
        entries.push((key, pair[1]));
    }
    let n = values.len();
    let d = ctx.alloc_dict(entries.len());
    let id = d.as_dict().ok_or(ErrorCode::Fatal)?;
    for (key, v) in entries {
        ctx.heap.dict_put(id, key, v)?;
    }
    ctx.pop(n)?;
    ctx.set_operand(0, d);
    Ok(OpStatus::Normal)
}

/// `int array array` of nulls
pub fn op_array(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let n = ctx.int_operand(0)?;
    if n < 0 {
        return Err(ErrorCode::RangeCheck);
    }
    let arr = ctx.alloc_array(vec![Value::NULL; n as usize])?;
    ctx.set_operand(0, arr);
    Ok(OpStatus::Normal)
}

/// `any0 ... anyn-1 array astore array`
pub fn op_astore(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let arr = ctx.operand(0);
    let r = match arr.payload {
        Payload::Array(r) => r,
        Payload::PackedArray(_) => return Err(ErrorCode::InvalidAccess),
        _ => return Err(ErrorCode::TypeCheck),
    };
    if !arr.has_access(psi_core::WRITE) {
        return Err(ErrorCode::InvalidAccess);
    }
    let n = r.len as usize;
    ctx.check_count(n + 1)?;
    let values: Vec<Value> = (1..=n).rev().map(|i| ctx.operand(i)).collect();
    for v in &values {
        psi_core::check_store(ctx.heap.array(r.id).space, v)?;
    }
    for (i, v) in values.into_iter().enumerate() {
        ctx.heap.array_put(r, i as u32, v)?;
    }
    ctx.pop(n)?;
    ctx.set_operand(0, arr);
    Ok(OpStatus::Normal)
}

/// `array aload any0 ... anyn-1 array`
pub fn op_aload(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let arr = ctx.operand(0);
    let r = arr.array_ref().ok_or(ErrorCode::TypeCheck)?;
    if !arr.has_access(psi_core::READ) {
        return Err(ErrorCode::InvalidAccess);
    }
    let mut values = ctx.heap.array_values(r);
    ctx.check_push_room(values.len())?;
    values.push(arr);
    ctx.pop(1)?;
    ctx.push_all(&values)?;
    Ok(OpStatus::Normal)
}

/// `any0 ... anyn-1 n packedarray packedarray`
pub fn op_packedarray(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let n = ctx.int_operand(0)?;
    if n < 0 {
        return Err(ErrorCode::RangeCheck);
    }
    let n = n as usize;
    ctx.check_count(n + 1)?;
    let values: Vec<Value> = (1..=n).rev().map(|i| ctx.operand(i)).collect();
    let packed = ctx.alloc_packed(values)?;
    ctx.pop(n)?;
    ctx.set_operand(0, packed);
    Ok(OpStatus::Normal)
}

pub fn op_setpacking(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    ctx.packing = ctx.bool_operand(0)?;
    ctx.pop(1)?;
    Ok(OpStatus::Normal)
}

pub fn op_currentpacking(ctx: &mut Context) -> OpResult {
    let packing = ctx.packing;
    ctx.push(Value::boolean(packing))?;
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
    fn test_brackets_build_array() {
        let mut ctx = ctx();
        ctx.push(Value::integer(0)).unwrap();
        op_mark_begin(&mut ctx).unwrap();
        ctx.push(Value::integer(1)).unwrap();
        ctx.push(Value::integer(2)).unwrap();
        op_array_from_mark(&mut ctx).unwrap();
        assert_eq!(ctx.ostack.count(), 2);
        let r = ctx.operand(0).array_ref().unwrap();
        assert_eq!(ctx.heap.array_values(r), vec![Value::integer(1), Value::integer(2)]);
    }

    #[test]
    fn test_odd_dict_construction_is_rangecheck() {
        let mut ctx = ctx();
        op_mark_begin(&mut ctx).unwrap();
        let k = Value::name(ctx.names.intern(b"k"));
        ctx.push(k).unwrap();
        assert_eq!(op_dict_from_mark(&mut ctx), Err(ErrorCode::RangeCheck));
        ctx.push(Value::integer(7)).unwrap();
        op_dict_from_mark(&mut ctx).unwrap();
        let d = ctx.operand(0).as_dict().unwrap();
        assert_eq!(ctx.heap.dict_get(d, &DictKey::Name(k.as_name().unwrap())), Some(Value::integer(7)));
    }

    #[test]
    fn test_aload_astore() {
        let mut ctx = ctx();
        let arr = ctx.alloc_array(vec![Value::NULL; 2]).unwrap();
        ctx.push(Value::integer(1)).unwrap();
        ctx.push(Value::integer(2)).unwrap();
        ctx.push(arr).unwrap();
        op_astore(&mut ctx).unwrap();
        assert_eq!(ctx.ostack.count(), 1);
        op_aload(&mut ctx).unwrap();
        assert_eq!(ctx.ostack.to_vec(), vec![Value::integer(1), Value::integer(2), arr]);
    }

    #[test]
    fn test_packedarray_is_read_only() {
        let mut ctx = ctx();
        ctx.push(Value::integer(3)).unwrap();
        ctx.push(Value::boolean(true)).unwrap();
        ctx.push(Value::integer(2)).unwrap();
        op_packedarray(&mut ctx).unwrap();
        let packed = ctx.operand(0);
        assert!(matches!(packed.payload, Payload::PackedArray(_)));
        assert!(!packed.has_access(psi_core::WRITE));
        let r = packed.array_ref().unwrap();
        assert_eq!(ctx.heap.array_values(r), vec![Value::integer(3), Value::boolean(true)]);
        assert_eq!(op_astore(&mut ctx), Err(ErrorCode::InvalidAccess));
    }

    #[test]
    fn test_setpacking() {
        let mut ctx = ctx();
        ctx.push(Value::boolean(true)).unwrap();
        op_setpacking(&mut ctx).unwrap();
        op_currentpacking(&mut ctx).unwrap();
        assert_eq!(ctx.ostack.to_vec(), vec![Value::boolean(true)]);
    }
}
