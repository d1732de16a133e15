//! Arithmetic, comparison and logical operators
//!
//! Integer results that overflow are promoted to reals, as PostScript
//! requires. `add` and `sub` are fast-path specials.

use super::{OpDef, OpResult, OpStatus};
use crate::context::Context;
use psi_core::{ErrorCode, Payload, Value};
use std::cmp::Ordering;

pub const OPS: &[OpDef] = &[
    OpDef { name: "mul", proc: op_mul },
    OpDef { name: "div", proc: op_div },
    OpDef { name: "idiv", proc: op_idiv },
    OpDef { name: "mod", proc: op_mod },
    OpDef { name: "neg", proc: op_neg },
    OpDef { name: "abs", proc: op_abs },
    OpDef { name: "eq", proc: op_eq },
    OpDef { name: "ne", proc: op_ne },
    OpDef { name: "gt", proc: op_gt },
    OpDef { name: "ge", proc: op_ge },
    OpDef { name: "lt", proc: op_lt },
    OpDef { name: "le", proc: op_le },
    OpDef { name: "not", proc: op_not },
    OpDef { name: "and", proc: op_and },
    OpDef { name: "or", proc: op_or },
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Real(f64),
}

impl Num {
    fn of(v: Value) -> Result<Num, ErrorCode> {
        match v.payload {
            Payload::Integer(i) => Ok(Num::Int(i)),
            Payload::Real(r) => Ok(Num::Real(r)),
            _ => Err(ErrorCode::TypeCheck),
        }
    }

    fn real(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Real(r) => r,
        }
    }

    fn value(self) -> Value {
        match self {
            Num::Int(i) => Value::integer(i),
            Num::Real(r) => Value::real(r),
        }
    }
}

/// Pop two numbers and push `int_op` or `real_op` of them.
fn binary(
    ctx: &mut Context,
    int_op: fn(i64, i64) -> Option<i64>,
    real_op: fn(f64, f64) -> f64,
) -> OpResult {
    ctx.check_ops(2)?;
    let a = Num::of(ctx.operand(1))?;
    let b = Num::of(ctx.operand(0))?;
    let result = match (a, b) {
        (Num::Int(x), Num::Int(y)) => match int_op(x, y) {
            Some(r) => Num::Int(r),
            None => Num::Real(real_op(x as f64, y as f64)),
        },
        _ => Num::Real(real_op(a.real(), b.real())),
    };
    ctx.pop(1)?;
    ctx.set_operand(0, result.value());
    Ok(OpStatus::Normal)
}

/// `num1 num2 add sum`
pub fn op_add(ctx: &mut Context) -> OpResult {
    binary(ctx, i64::checked_add, |x, y| x + y)
}

/// `num1 num2 sub difference`
pub fn op_sub(ctx: &mut Context) -> OpResult {
    binary(ctx, i64::checked_sub, |x, y| x - y)
}

pub fn op_mul(ctx: &mut Context) -> OpResult {
    binary(ctx, i64::checked_mul, |x, y| x * y)
}

/// `num1 num2 div quotient`, always real.
pub fn op_div(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let a = Num::of(ctx.operand(1))?.real();
    let b = Num::of(ctx.operand(0))?.real();
    if b == 0.0 {
        return Err(ErrorCode::UndefinedResult);
    }
    ctx.pop(1)?;
    ctx.set_operand(0, Value::real(a / b));
    Ok(OpStatus::Normal)
}

fn int_pair(ctx: &Context) -> Result<(i64, i64), ErrorCode> {
    ctx.check_ops(2)?;
    let a = ctx.int_operand(1)?;
    let b = ctx.int_operand(0)?;
    if b == 0 {
        return Err(ErrorCode::UndefinedResult);
    }
    Ok((a, b))
}

pub fn op_idiv(ctx: &mut Context) -> OpResult {
    let (a, b) = int_pair(ctx)?;
    let q = a.checked_div(b).ok_or(ErrorCode::UndefinedResult)?;
    ctx.pop(1)?;
    ctx.set_operand(0, Value::integer(q));
    Ok(OpStatus::Normal)
}

pub fn op_mod(ctx: &mut Context) -> OpResult {
    let (a, b) = int_pair(ctx)?;
    let r = a.checked_rem(b).ok_or(ErrorCode::UndefinedResult)?;
    ctx.pop(1)?;
    ctx.set_operand(0, Value::integer(r));
    Ok(OpStatus::Normal)
}

fn unary(ctx: &mut Context, int_op: fn(i64) -> Option<i64>, real_op: fn(f64) -> f64) -> OpResult {
    ctx.check_ops(1)?;
    let result = match Num::of(ctx.operand(0))? {
        Num::Int(i) => match int_op(i) {
            Some(r) => Num::Int(r),
            None => Num::Real(real_op(i as f64)),
        },
        Num::Real(r) => Num::Real(real_op(r)),
    };
    ctx.set_operand(0, result.value());
    Ok(OpStatus::Normal)
}

pub fn op_neg(ctx: &mut Context) -> OpResult {
    unary(ctx, i64::checked_neg, |x| -x)
}

pub fn op_abs(ctx: &mut Context) -> OpResult {
    unary(ctx, i64::checked_abs, f64::abs)
}

// =============================================================================
// Comparison
// =============================================================================

/// Equality as `eq` sees it: numbers by value, strings by content, a string
/// equal to a name with the same text, everything else by identity.
pub fn values_equal(ctx: &Context, a: &Value, b: &Value) -> bool {
    if let (Ok(x), Ok(y)) = (Num::of(*a), Num::of(*b)) {
        return x.real() == y.real();
    }
    match (text_of(ctx, a), text_of(ctx, b)) {
        (Some(x), Some(y)) => x == y,
        (None, None) => match (a.payload, b.payload) {
            (Payload::Operator { index: x, .. }, Payload::Operator { index: y, .. }) => x == y,
            (x, y) => x == y,
        },
        _ => false,
    }
}

fn text_of<'a>(ctx: &'a Context, v: &Value) -> Option<&'a [u8]> {
    match v.payload {
        Payload::String(s) => Some(ctx.heap.string_bytes(s)),
        Payload::Name(n) => Some(ctx.names.text(n)),
        _ => None,
    }
}

fn compare(ctx: &Context) -> Result<Ordering, ErrorCode> {
    ctx.check_ops(2)?;
    let a = ctx.operand(1);
    let b = ctx.operand(0);
    match (a.payload, b.payload) {
        (Payload::String(x), Payload::String(y)) => {
            Ok(ctx.heap.string_bytes(x).cmp(ctx.heap.string_bytes(y)))
        }
        _ => {
            let x = Num::of(a)?.real();
            let y = Num::of(b)?.real();
            x.partial_cmp(&y).ok_or(ErrorCode::UndefinedResult)
        }
    }
}

fn push_compare(ctx: &mut Context, test: fn(Ordering) -> bool) -> OpResult {
    let ord = compare(ctx)?;
    ctx.pop(1)?;
    ctx.set_operand(0, Value::boolean(test(ord)));
    Ok(OpStatus::Normal)
}

pub fn op_eq(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let equal = values_equal(ctx, &ctx.operand(1), &ctx.operand(0));
    ctx.pop(1)?;
    ctx.set_operand(0, Value::boolean(equal));
    Ok(OpStatus::Normal)
}

pub fn op_ne(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let equal = values_equal(ctx, &ctx.operand(1), &ctx.operand(0));
    ctx.pop(1)?;
    ctx.set_operand(0, Value::boolean(!equal));
    Ok(OpStatus::Normal)
}

pub fn op_gt(ctx: &mut Context) -> OpResult {
    push_compare(ctx, Ordering::is_gt)
}

pub fn op_ge(ctx: &mut Context) -> OpResult {
    push_compare(ctx, Ordering::is_ge)
}

pub fn op_lt(ctx: &mut Context) -> OpResult {
    push_compare(ctx, Ordering::is_lt)
}

pub fn op_le(ctx: &mut Context) -> OpResult {
    push_compare(ctx, Ordering::is_le)
}

// =============================================================================
// Logical / bitwise
// =============================================================================

pub fn op_not(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let result = match ctx.operand(0).payload {
        Payload::Boolean(b) => Value::boolean(!b),
        Payload::Integer(i) => Value::integer(!i),
        _ => return Err(ErrorCode::TypeCheck),
    };
    ctx.set_operand(0, result);
    Ok(OpStatus::Normal)
}

fn logical(ctx: &mut Context, bool_op: fn(bool, bool) -> bool, int_op: fn(i64, i64) -> i64) -> OpResult {
    ctx.check_ops(2)?;
    let result = match (ctx.operand(1).payload, ctx.operand(0).payload) {
        (Payload::Boolean(a), Payload::Boolean(b)) => Value::boolean(bool_op(a, b)),
        (Payload::Integer(a), Payload::Integer(b)) => Value::integer(int_op(a, b)),
        _ => return Err(ErrorCode::TypeCheck),
    };
    ctx.pop(1)?;
    ctx.set_operand(0, result);
    Ok(OpStatus::Normal)
}

pub fn op_and(ctx: &mut Context) -> OpResult {
    logical(ctx, |a, b| a && b, |a, b| a & b)
}

pub fn op_or(ctx: &mut Context) -> OpResult {
    logical(ctx, |a, b| a || b, |a, b| a | b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpConfig;

    fn run2(a: Value, b: Value, op: fn(&mut Context) -> OpResult) -> Result<Value, ErrorCode> {
        let mut ctx = Context::new(InterpConfig::default());
        ctx.push(a).unwrap();
        ctx.push(b).unwrap();
        op(&mut ctx)?;
        assert_eq!(ctx.ostack.count(), 1);
        Ok(ctx.operand(0))
    }

    #[test]
    fn test_add_promotes_on_overflow() {
        assert_eq!(run2(Value::integer(2), Value::integer(3), op_add), Ok(Value::integer(5)));
        assert_eq!(
            run2(Value::integer(i64::MAX), Value::integer(1), op_add),
            Ok(Value::real(i64::MAX as f64 + 1.0))
        );
        assert_eq!(run2(Value::integer(1), Value::real(0.5), op_add), Ok(Value::real(1.5)));
    }

    #[test]
    fn test_sub_and_typecheck() {
        assert_eq!(run2(Value::integer(2), Value::integer(3), op_sub), Ok(Value::integer(-1)));
        assert_eq!(
            run2(Value::integer(1), Value::boolean(true), op_sub),
            Err(ErrorCode::TypeCheck)
        );
    }

    #[test]
    fn test_division() {
        assert_eq!(run2(Value::integer(7), Value::integer(2), op_div), Ok(Value::real(3.5)));
        assert_eq!(run2(Value::integer(7), Value::integer(2), op_idiv), Ok(Value::integer(3)));
        assert_eq!(run2(Value::integer(-7), Value::integer(2), op_mod), Ok(Value::integer(-1)));
        assert_eq!(
            run2(Value::integer(1), Value::integer(0), op_div),
            Err(ErrorCode::UndefinedResult)
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run2(Value::integer(1), Value::real(1.0), op_eq), Ok(Value::boolean(true)));
        assert_eq!(run2(Value::integer(1), Value::integer(2), op_lt), Ok(Value::boolean(true)));
        assert_eq!(run2(Value::integer(1), Value::integer(2), op_ge), Ok(Value::boolean(false)));
        assert_eq!(run2(Value::NULL, Value::NULL, op_eq), Ok(Value::boolean(true)));
        assert_eq!(
            run2(Value::boolean(true), Value::boolean(false), op_or),
            Ok(Value::boolean(true))
        );
        assert_eq!(run2(Value::integer(6), Value::integer(3), op_and), Ok(Value::integer(2)));
    }

    #[test]
    fn test_string_equals_name() {
        let mut ctx = Context::new(InterpConfig::default());
        let s = ctx.alloc_string(b"abc".to_vec());
        let n = Value::name(ctx.names.intern(b"abc"));
        assert!(values_equal(&ctx, &s, &n));
        let other = ctx.alloc_string(b"abd".to_vec());
        assert!(!values_equal(&ctx, &s, &other));
    }
}
