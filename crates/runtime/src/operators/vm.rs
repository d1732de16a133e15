//! VM operators
//!
//! `vmreclaim` does not collect by itself: it records the request and
//! returns the `VMreclaim` signal, and the recovery driver performs the
//! collection with the dispatcher's live values as extra roots.
//!
//! | Operand | Effect                                  |
//! |---------|-----------------------------------------|
//! | `1`     | collect local VM now                    |
//! | `2`     | collect all VM now                      |
//! | `0`     | re-enable automatic collection          |
//! | `-1`    | disable automatic collection (local)    |
//! | `-2`    | disable automatic collection (all)      |

use super::{OpDef, OpResult, OpStatus};
use crate::context::Context;
use psi_core::{ErrorCode, ReclaimScope, Space, Value};

pub const OPS: &[OpDef] = &[
    OpDef { name: "vmreclaim", proc: op_vmreclaim },
    OpDef { name: "setglobal", proc: op_setglobal },
    OpDef { name: "currentglobal", proc: op_currentglobal },
    OpDef { name: "vmstatus", proc: op_vmstatus },
];

pub fn op_vmreclaim(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let scope = match ctx.int_operand(0)? {
        1 => ReclaimScope::Local,
        2 => ReclaimScope::All,
        0 => {
            ctx.auto_reclaim = true;
            ctx.pop(1)?;
            return Ok(OpStatus::Normal);
        }
        -1 | -2 => {
            ctx.auto_reclaim = false;
            ctx.pop(1)?;
            return Ok(OpStatus::Normal);
        }
        _ => return Err(ErrorCode::RangeCheck),
    };
    ctx.pop(1)?;
    ctx.reclaim_request = Some(scope);
    Err(ErrorCode::VmReclaim)
}

pub fn op_setglobal(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let global = ctx.bool_operand(0)?;
    ctx.alloc_space = if global { Space::Global } else { Space::Local };
    ctx.pop(1)?;
    Ok(OpStatus::Normal)
}

pub fn op_currentglobal(ctx: &mut Context) -> OpResult {
    let global = ctx.alloc_space == Space::Global;
    ctx.push(Value::boolean(global))?;
    Ok(OpStatus::Normal)
}

/// `- vmstatus level used maximum`
pub fn op_vmstatus(ctx: &mut Context) -> OpResult {
    ctx.ostack.check_room(3)?;
    let used = ctx.heap.total_allocated() as i64;
    let max = used.max(ctx.config.vm_threshold as i64) * 2;
    ctx.push(Value::integer(0))?;
    ctx.push(Value::integer(used))?;
    ctx.push(Value::integer(max))?;
    Ok(OpStatus::Normal)
}
