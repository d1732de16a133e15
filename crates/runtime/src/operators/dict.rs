//! Dictionary operators

use super::{OpDef, OpResult, OpStatus};
use crate::context::Context;
use psi_core::{DictKey, ErrorCode, Payload, Value};

pub const OPS: &[OpDef] = &[
    OpDef { name: "dict", proc: op_dict },
    OpDef { name: "begin", proc: op_begin },
    OpDef { name: "end", proc: op_end },
    OpDef { name: "currentdict", proc: op_currentdict },
    OpDef { name: "load", proc: op_load },
    OpDef { name: "store", proc: op_store },
    OpDef { name: "where", proc: op_where },
    OpDef { name: "known", proc: op_known },
    OpDef { name: "get", proc: op_get },
    OpDef { name: "put", proc: op_put },
    OpDef { name: "length", proc: op_length },
    OpDef { name: "undef", proc: op_undef },
    OpDef { name: "countdictstack", proc: op_countdictstack },
    OpDef { name: "userdict", proc: op_userdict },
    OpDef { name: "systemdict", proc: op_systemdict },
    OpDef { name: "errordict", proc: op_errordict },
    OpDef { name: "$error", proc: op_dollar_error },
];

fn key_operand(ctx: &mut Context, i: usize) -> Result<DictKey, ErrorCode> {
    let key = ctx.operand(i);
    ctx.heap.dict_key(&mut ctx.names, &key)
}

fn readable_dict(ctx: &Context, i: usize) -> Result<psi_core::DictId, ErrorCode> {
    let d = ctx.dict_operand(i)?;
    if ctx.heap.dict_readable(d) {
        Ok(d)
    } else {
        Err(ErrorCode::InvalidAccess)
    }
}

/// `key value def -`
pub fn op_def(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let key = ctx.operand(1);
    let value = ctx.operand(0);
    ctx.def(key, value)?;
    ctx.pop(2)?;
    Ok(OpStatus::Normal)
}

/// `int dict dict`
pub fn op_dict(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let n = ctx.int_operand(0)?;
    if n < 0 {
        return Err(ErrorCode::RangeCheck);
    }
    let d = ctx.alloc_dict(n as usize);
    ctx.set_operand(0, d);
    Ok(OpStatus::Normal)
}

pub fn op_begin(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let d = ctx.operand(0);
    ctx.begin(d)?;
    ctx.pop(1)?;
    Ok(OpStatus::Normal)
}

pub fn op_end(ctx: &mut Context) -> OpResult {
    ctx.end()?;
    Ok(OpStatus::Normal)
}

pub fn op_currentdict(ctx: &mut Context) -> OpResult {
    let d = ctx.dstack.top().unwrap_or(ctx.perm.userdict);
    ctx.push(d)?;
    Ok(OpStatus::Normal)
}

/// `key load value`
pub fn op_load(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let key = key_operand(ctx, 0)?;
    let (_, v) = ctx.lookup_key(&key).ok_or(ErrorCode::Undefined)?;
    ctx.set_operand(0, v);
    Ok(OpStatus::Normal)
}

/// `key value store -`: replace the topmost binding, or define in the
/// current dictionary.
pub fn op_store(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let key = key_operand(ctx, 1)?;
    let value = ctx.operand(0);
    let dict = ctx
        .lookup_key(&key)
        .map(|(d, _)| d)
        .unwrap_or_else(|| ctx.current_dict());
    ctx.heap.dict_put(dict, key, value)?;
    ctx.pop(2)?;
    Ok(OpStatus::Normal)
}

/// `key where dict true | false`
pub fn op_where(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let key = key_operand(ctx, 0)?;
    match ctx.lookup_key(&key) {
        Some((d, _)) => {
            ctx.ostack.check_room(1)?;
            let space = ctx.heap.dict(d).space;
            ctx.set_operand(0, Value::dict(d, space));
            ctx.push(Value::boolean(true))?;
        }
        None => ctx.set_operand(0, Value::boolean(false)),
    }
    Ok(OpStatus::Normal)
}

/// `dict key known bool`
pub fn op_known(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let d = readable_dict(ctx, 1)?;
    let key = key_operand(ctx, 0)?;
    let known = ctx.heap.dict_get(d, &key).is_some();
    ctx.pop(1)?;
    ctx.set_operand(0, Value::boolean(known));
    Ok(OpStatus::Normal)
}

/// `dict key get any`, `array index get any`, `string index get int`
pub fn op_get(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let container = ctx.operand(1);
    let v = match container.payload {
        Payload::Dict(d) => {
            if !ctx.heap.dict_readable(d) {
                return Err(ErrorCode::InvalidAccess);
            }
            let key = key_operand(ctx, 0)?;
            ctx.heap.dict_get(d, &key).ok_or(ErrorCode::Undefined)?
        }
        Payload::Array(r) | Payload::PackedArray(r) => {
            if !container.has_access(psi_core::READ) {
                return Err(ErrorCode::InvalidAccess);
            }
            let i = ctx.int_operand(0)?;
            let i = u32::try_from(i).map_err(|_| ErrorCode::RangeCheck)?;
            ctx.heap.array_get(r, i).ok_or(ErrorCode::RangeCheck)?
        }
        Payload::String(s) => {
            if !container.has_access(psi_core::READ) {
                return Err(ErrorCode::InvalidAccess);
            }
            let i = ctx.int_operand(0)?;
            let i = usize::try_from(i).map_err(|_| ErrorCode::RangeCheck)?;
            let byte = *ctx.heap.string_bytes(s).get(i).ok_or(ErrorCode::RangeCheck)?;
            Value::integer(byte as i64)
        }
        _ => return Err(ErrorCode::TypeCheck),
    };
    ctx.pop(1)?;
    ctx.set_operand(0, v);
    Ok(OpStatus::Normal)
}

/// `dict key value put -`, `array index value put -`, `string index int put -`
pub fn op_put(ctx: &mut Context) -> OpResult {
    ctx.check_ops(3)?;
    let container = ctx.operand(2);
    let value = ctx.operand(0);
    match container.payload {
        Payload::Dict(d) => {
            let key = key_operand(ctx, 1)?;
            ctx.heap.dict_put(d, key, value)?;
        }
        Payload::Array(r) | Payload::PackedArray(r) => {
            if !container.has_access(psi_core::WRITE) {
                return Err(ErrorCode::InvalidAccess);
            }
            let i = ctx.int_operand(1)?;
            let i = u32::try_from(i).map_err(|_| ErrorCode::RangeCheck)?;
            ctx.heap.array_put(r, i, value)?;
        }
        Payload::String(s) => {
            if !container.has_access(psi_core::WRITE) {
                return Err(ErrorCode::InvalidAccess);
            }
            let i = ctx.int_operand(1)?;
            let byte = ctx.int_operand(0)?;
            let byte = u8::try_from(byte).map_err(|_| ErrorCode::RangeCheck)?;
            let i = usize::try_from(i).map_err(|_| ErrorCode::RangeCheck)?;
            let slot = ctx
                .heap
                .string_bytes_mut(s)
                .get_mut(i)
                .ok_or(ErrorCode::RangeCheck)?;
            *slot = byte;
        }
        _ => return Err(ErrorCode::TypeCheck),
    }
    ctx.pop(3)?;
    Ok(OpStatus::Normal)
}

/// Length of a dictionary, array, string or name.
pub fn op_length(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let v = ctx.operand(0);
    let n = match v.payload {
        Payload::Dict(d) => {
            if !ctx.heap.dict_readable(d) {
                return Err(ErrorCode::InvalidAccess);
            }
            ctx.heap.dict(d).len()
        }
        Payload::Array(_) | Payload::PackedArray(_) | Payload::String(_) => {
            if !v.has_access(psi_core::READ) {
                return Err(ErrorCode::InvalidAccess);
            }
            v.size() as usize
        }
        Payload::Name(n) => ctx.names.text(n).len(),
        _ => return Err(ErrorCode::TypeCheck),
    };
    ctx.set_operand(0, Value::integer(n as i64));
    Ok(OpStatus::Normal)
}

/// `dict key undef -`
pub fn op_undef(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let d = ctx.dict_operand(1)?;
    let key = key_operand(ctx, 0)?;
    ctx.heap.dict_undef(d, &key)?;
    ctx.pop(2)?;
    Ok(OpStatus::Normal)
}

pub fn op_countdictstack(ctx: &mut Context) -> OpResult {
    let n = ctx.dstack.count() as i64;
    ctx.push(Value::integer(n))?;
    Ok(OpStatus::Normal)
}

pub fn op_userdict(ctx: &mut Context) -> OpResult {
    let d = ctx.perm.userdict;
    ctx.push(d)?;
    Ok(OpStatus::Normal)
}

pub fn op_systemdict(ctx: &mut Context) -> OpResult {
    let d = ctx.perm.systemdict;
    ctx.push(d)?;
    Ok(OpStatus::Normal)
}

pub fn op_errordict(ctx: &mut Context) -> OpResult {
    let d = ctx.perm.errordict;
    ctx.push(d)?;
    Ok(OpStatus::Normal)
}

pub fn op_dollar_error(ctx: &mut Context) -> OpResult {
    let d = ctx.perm.dollar_error;
    ctx.push(d)?;
    Ok(OpStatus::Normal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpConfig;

    fn ctx() -> Context {
        Context::new(InterpConfig::default())
    }

    fn name(ctx: &mut Context, text: &str) -> Value {
        Value::name(ctx.names.intern(text.as_bytes()))
    }

    #[test]
    fn test_def_then_load() {
        let mut ctx = ctx();
        let x = name(&mut ctx, "x");
        ctx.push(x).unwrap();
        ctx.push(Value::integer(5)).unwrap();
        op_def(&mut ctx).unwrap();
        assert_eq!(ctx.ostack.count(), 0);
        ctx.push(x).unwrap();
        op_load(&mut ctx).unwrap();
        assert_eq!(ctx.ostack.to_vec(), vec![Value::integer(5)]);
    }

    #[test]
    fn test_load_undefined_leaves_operand() {
        let mut ctx = ctx();
        let y = name(&mut ctx, "nope");
        ctx.push(y).unwrap();
        assert_eq!(op_load(&mut ctx), Err(ErrorCode::Undefined));
        assert_eq!(ctx.ostack.to_vec(), vec![y]);
    }

    #[test]
    fn test_store_replaces_lower_binding() {
        let mut ctx = ctx();
        let x = name(&mut ctx, "x");
        ctx.def(x, Value::integer(1)).unwrap();
        let inner = ctx.alloc_dict(4);
        ctx.begin(inner).unwrap();
        ctx.push(x).unwrap();
        ctx.push(Value::integer(2)).unwrap();
        op_store(&mut ctx).unwrap();
        assert_eq!(ctx.heap.dict(inner.as_dict().unwrap()).len(), 0);
        ctx.end().unwrap();
        assert_eq!(ctx.lookup_name(x.as_name().unwrap()), Some(Value::integer(2)));
    }

    #[test]
    fn test_where_and_known() {
        let mut ctx = ctx();
        let add = name(&mut ctx, "add");
        ctx.push(add).unwrap();
        op_where(&mut ctx).unwrap();
        assert_eq!(ctx.operand(0), Value::boolean(true));
        assert_eq!(ctx.operand(1).as_dict(), Some(ctx.systemdict()));

        ctx.ostack.clear();
        let sys = ctx.perm.systemdict;
        ctx.push(sys).unwrap();
        ctx.push(add).unwrap();
        op_known(&mut ctx).unwrap();
        assert_eq!(ctx.ostack.to_vec(), vec![Value::boolean(true)]);
    }

    #[test]
    fn test_put_get_on_array_and_string() {
        let mut ctx = ctx();
        let arr = ctx.alloc_array(vec![Value::NULL; 3]).unwrap();
        ctx.push(arr).unwrap();
        ctx.push(Value::integer(1)).unwrap();
        ctx.push(Value::integer(42)).unwrap();
        op_put(&mut ctx).unwrap();
        ctx.push(arr).unwrap();
        ctx.push(Value::integer(1)).unwrap();
        op_get(&mut ctx).unwrap();
        assert_eq!(ctx.ostack.to_vec(), vec![Value::integer(42)]);

        ctx.ostack.clear();
        let s = ctx.alloc_string(b"abc".to_vec());
        ctx.push(s).unwrap();
        ctx.push(Value::integer(3)).unwrap();
        assert_eq!(op_get(&mut ctx), Err(ErrorCode::RangeCheck));
        assert_eq!(ctx.ostack.count(), 2);
    }

    #[test]
    fn test_put_into_systemdict_is_invalid_access() {
        let mut ctx = ctx();
        let sys = ctx.perm.systemdict;
        let k = name(&mut ctx, "k");
        ctx.push(sys).unwrap();
        ctx.push(k).unwrap();
        ctx.push(Value::integer(1)).unwrap();
        assert_eq!(op_put(&mut ctx), Err(ErrorCode::InvalidAccess));
        assert_eq!(ctx.ostack.count(), 3);
    }

    #[test]
    fn test_end_at_permanent_floor() {
        let mut ctx = ctx();
        assert_eq!(op_end(&mut ctx), Err(ErrorCode::DictStackUnderflow));
        assert_eq!(ctx.dstack.count(), 2);
    }
}
