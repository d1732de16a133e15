//! Gray-level color operators
//!
//! `setgray` cannot complete until the requested level has been mapped. The
//! first call records the request and returns `RemapColor` with its operand
//! still on the stack; the dispatcher runs `%remap_color` and then calls
//! `setgray` again, which now installs the mapped level.

use super::{OpDef, OpResult, OpStatus};
use crate::context::Context;
use psi_core::Value;

pub const OPS: &[OpDef] = &[
    OpDef { name: "setgray", proc: op_setgray },
    OpDef { name: "currentgray", proc: op_currentgray },
];

/// `num setgray -`
pub fn op_setgray(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let gray = ctx.real_operand(0)?.clamp(0.0, 1.0);
    let unchanged = gray == ctx.color.gray && ctx.color.pending.is_none();
    if unchanged || ctx.color.install(gray) {
        ctx.pop(1)?;
        return Ok(OpStatus::Normal);
    }
    ctx.color.request(gray);
    Ok(OpStatus::RemapColor)
}

pub fn op_currentgray(ctx: &mut Context) -> OpResult {
    let gray = ctx.color.gray;
    ctx.push(Value::real(gray))?;
    Ok(OpStatus::Normal)
}

/// Map the pending color.
pub fn op_remap_color(ctx: &mut Context) -> OpResult {
    ctx.color.map_pending();
    Ok(OpStatus::Normal)
}
