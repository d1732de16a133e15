//! Operand stack operators
//!
//! `dup`, `exch`, `pop`, `index` and `roll` are fast-path specials; the
//! dispatcher usually runs its own inline copy of them, and these functions are
//! the reference behavior the inline copies must match.

use super::{OpDef, OpResult, OpStatus};
use crate::context::Context;
use psi_core::{ErrorCode, Payload, Value};

pub const OPS: &[OpDef] = &[
    OpDef { name: "copy", proc: op_copy },
    OpDef { name: "clear", proc: op_clear },
    OpDef { name: "count", proc: op_count },
    OpDef { name: "mark", proc: op_mark },
    OpDef { name: "cleartomark", proc: op_cleartomark },
    OpDef { name: "counttomark", proc: op_counttomark },
];

/// `any dup any any`
pub fn op_dup(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let v = ctx.operand(0);
    ctx.push(v)?;
    Ok(OpStatus::Normal)
}

/// `a b exch b a`
pub fn op_exch(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let a = ctx.operand(1);
    let b = ctx.operand(0);
    ctx.set_operand(1, b);
    ctx.set_operand(0, a);
    Ok(OpStatus::Normal)
}

/// `any pop -`
pub fn op_pop(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    ctx.pop(1)?;
    Ok(OpStatus::Normal)
}

/// `an ... a0 n index an ... a0 an`
///
/// The element may live in a lower stack block.
pub fn op_index(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let n = ctx.int_operand(0)?;
    if n < 0 {
        return Err(ErrorCode::RangeCheck);
    }
    let v = ctx
        .ostack
        .index(n as usize + 1)
        .ok_or(ErrorCode::StackUnderflow)?;
    ctx.set_operand(0, v);
    Ok(OpStatus::Normal)
}

/// `a(n-1) ... a0 n j roll`
///
/// Positive `j` moves elements toward the top. The rolled elements may span
/// stack blocks.
pub fn op_roll(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let n = ctx.int_operand(1)?;
    let j = ctx.int_operand(0)?;
    if n < 0 {
        return Err(ErrorCode::RangeCheck);
    }
    let n = n as usize;
    ctx.check_count(n + 2)?;
    ctx.pop(2)?;
    if n > 1 {
        let shift = j.rem_euclid(n as i64) as usize;
        let mut window: Vec<Value> = (0..n).rev().map(|i| ctx.operand(i)).collect();
        window.rotate_right(shift);
        for (k, v) in window.into_iter().enumerate() {
            ctx.set_operand(n - 1 - k, v);
        }
    }
    Ok(OpStatus::Normal)
}

/// `a1 ... an n copy a1 ... an a1 ... an`
pub fn op_copy(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let n = ctx.int_operand(0)?;
    if n < 0 {
        return Err(ErrorCode::RangeCheck);
    }
    let n = n as usize;
    ctx.check_count(n + 1)?;
    ctx.check_push_room(n.saturating_sub(1))?;
    let values: Vec<Value> = (1..=n).rev().map(|i| ctx.operand(i)).collect();
    ctx.pop(1)?;
    ctx.push_all(&values)?;
    Ok(OpStatus::Normal)
}

pub fn op_clear(ctx: &mut Context) -> OpResult {
    ctx.ostack.clear();
    Ok(OpStatus::Normal)
}

pub fn op_count(ctx: &mut Context) -> OpResult {
    let n = ctx.ostack.count() as i64;
    ctx.push(Value::integer(n))?;
    Ok(OpStatus::Normal)
}

pub fn op_mark(ctx: &mut Context) -> OpResult {
    ctx.push(Value::mark())?;
    Ok(OpStatus::Normal)
}

/// Depth of the topmost mark, counting from the top.
pub(crate) fn find_mark(ctx: &Context) -> Result<usize, ErrorCode> {
    ctx.ostack
        .iter_from_top()
        .position(|v| v.payload == Payload::Mark)
        .ok_or(ErrorCode::UnmatchedMark)
}

pub fn op_cleartomark(ctx: &mut Context) -> OpResult {
    let depth = find_mark(ctx)?;
    ctx.pop(depth + 1)?;
    Ok(OpStatus::Normal)
}

pub fn op_counttomark(ctx: &mut Context) -> OpResult {
    let depth = find_mark(ctx)?;
    ctx.push(Value::integer(depth as i64))?;
    Ok(OpStatus::Normal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpConfig;

    fn ctx_with(values: &[i64]) -> Context {
        let mut ctx = Context::new(InterpConfig::default());
        for &v in values {
            ctx.push(Value::integer(v)).unwrap();
        }
        ctx
    }

    fn ints(ctx: &Context) -> Vec<i64> {
        ctx.ostack.to_vec().iter().filter_map(|v| v.as_int()).collect()
    }

    #[test]
    fn test_roll_moves_toward_top() {
        let mut ctx = ctx_with(&[1, 2, 3, 3, 1]);
        op_roll(&mut ctx).unwrap();
        assert_eq!(ints(&ctx), vec![3, 1, 2]);

        let mut ctx = ctx_with(&[1, 2, 3, 3, -1]);
        op_roll(&mut ctx).unwrap();
        assert_eq!(ints(&ctx), vec![2, 3, 1]);
    }

    #[test]
    fn test_roll_errors_leave_stack_alone() {
        let mut ctx = ctx_with(&[1, 2, 5, 1]);
        assert_eq!(op_roll(&mut ctx), Err(ErrorCode::StackUnderflow));
        assert_eq!(ints(&ctx), vec![1, 2, 5, 1]);
        let mut ctx = ctx_with(&[1, -1, 1]);
        assert_eq!(op_roll(&mut ctx), Err(ErrorCode::RangeCheck));
    }

    #[test]
    fn test_index_and_copy() {
        let mut ctx = ctx_with(&[10, 20, 30, 2]);
        op_index(&mut ctx).unwrap();
        assert_eq!(ints(&ctx), vec![10, 20, 30, 10]);

        let mut ctx = ctx_with(&[1, 2, 2]);
        op_copy(&mut ctx).unwrap();
        assert_eq!(ints(&ctx), vec![1, 2, 1, 2]);

        let mut ctx = ctx_with(&[1, 5]);
        assert_eq!(op_index(&mut ctx), Err(ErrorCode::StackUnderflow));
    }

    fn blocked_ctx(block: usize, values: &[i64]) -> Context {
        let config = InterpConfig {
            ostack_block: block,
            ..Default::default()
        };
        let mut ctx = Context::new(config);
        for &v in values {
            if ctx.push(Value::integer(v)).is_err() {
                ctx.ostack.extend(1).unwrap();
                ctx.push(Value::integer(v)).unwrap();
            }
        }
        ctx
    }

    #[test]
    fn test_roll_across_blocks() {
        let mut ctx = blocked_ctx(4, &[1, 2, 3, 4, 5, 6, 7, 5, 1]);
        assert!(ctx.ostack.has_lower_block());
        op_roll(&mut ctx).unwrap();
        assert_eq!(ints(&ctx), vec![1, 2, 7, 3, 4, 5, 6]);
    }

    #[test]
    fn test_roll_short_stack_underflows() {
        let mut ctx = blocked_ctx(4, &[1, 2, 3, 4, 5, 9, 1]);
        assert_eq!(op_roll(&mut ctx), Err(ErrorCode::StackUnderflow));
        assert_eq!(ints(&ctx), vec![1, 2, 3, 4, 5, 9, 1]);
    }

    #[test]
    fn test_copy_across_blocks() {
        let mut ctx = blocked_ctx(4, &[1, 2, 3, 4, 5, 6, 6]);
        op_copy(&mut ctx).unwrap();
        assert_eq!(ints(&ctx), vec![1, 2, 3, 4, 5, 6, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_mark_operators() {
        let mut ctx = ctx_with(&[1]);
        op_mark(&mut ctx).unwrap();
        ctx.push(Value::integer(2)).unwrap();
        ctx.push(Value::integer(3)).unwrap();
        op_counttomark(&mut ctx).unwrap();
        assert_eq!(ctx.operand(0), Value::integer(2));
        ctx.pop(1).unwrap();
        op_cleartomark(&mut ctx).unwrap();
        assert_eq!(ints(&ctx), vec![1]);
        assert_eq!(op_cleartomark(&mut ctx), Err(ErrorCode::UnmatchedMark));
    }

    #[test]
    fn test_dup_overflow_is_reported_before_change() {
        let config = InterpConfig {
            max_ostack: 2,
            ostack_block: 2,
            ..Default::default()
        };
        let mut ctx = Context::new(config);
        ctx.push(Value::integer(1)).unwrap();
        ctx.push(Value::integer(2)).unwrap();
        assert_eq!(op_dup(&mut ctx), Err(ErrorCode::StackOverflow));
        assert_eq!(ctx.ostack.count(), 2);
    }
}
