//! Execution stack entries, marks and unwinding
//!
//! The execution stack holds the interpreter's continuation: procedure tails,
//! pending operators and the saved state of loops. There is no native call
//! stack behind it. An operator that needs to run PostScript code pushes that
//! code plus a continuation operator and returns `PushEstack`; the dispatcher
//! runs the code and then the continuation.
//!
//! ## Marks
//!
//! A [`Mark`] delimits a region of the stack that must be cleaned up if it is
//! unwound abnormally (by `stop`, `exit` or an error). Marks execute as no-ops
//! when the dispatcher reaches them on a normal return; their cleanup runs
//! only when [`pop_estack`] passes them.
//!
//! Protected call shapes (bottom to top):
//!
//! ```text
//!   oparray:     Mark(Oparray)   %oparray_pop             body...
//!   .errorexec:  Mark(ErrorExec) errobj  %errorexec_pop    obj
//!   stopped:     Mark(Stopped)   false   %stopped_push     proc
//!   loops:       Mark(For)       state...  continuation    proc
//! ```
//!
//! On a normal exit the pop operator removes the bookkeeping; the cleanup
//! never runs.

use crate::context::Context;
use psi_core::{ErrorCode, OpIndex, Payload, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkKind {
    /// A user-defined operator body. With `protect` set, an abnormal unwind
    /// pops the operand and dictionary stacks back to their entry depths.
    Oparray { index: OpIndex, protect: bool },
    /// `.errorexec`: the error object sits in the slot above the mark.
    ErrorExec,
    /// Target of `exit`.
    For,
    /// Target of `stop`, selected by signal mask.
    Stopped { mask: i64 },
    /// An error handler is running for `code`.
    Handler { code: ErrorCode },
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mark {
    pub kind: MarkKind,
    pub saved_ostack: usize,
    pub saved_dstack: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExecEntry {
    Value(Value),
    Mark(Mark),
}

impl ExecEntry {
    pub fn value(&self) -> Option<Value> {
        match self {
            ExecEntry::Value(v) => Some(*v),
            ExecEntry::Mark(_) => None,
        }
    }

    pub fn mark(&self) -> Option<Mark> {
        match self {
            ExecEntry::Mark(m) => Some(*m),
            ExecEntry::Value(_) => None,
        }
    }
}

impl Mark {
    /// A mark recording the current operand and dictionary stack depths.
    pub fn new(kind: MarkKind, ctx: &Context) -> Mark {
        Mark {
            kind,
            saved_ostack: ctx.ostack.count(),
            saved_dstack: ctx.dstack.count(),
        }
    }

    /// Cleanup run when an unwind passes this mark.
    pub fn release(&self, ctx: &mut Context) -> Result<(), ErrorCode> {
        let restores = matches!(
            self.kind,
            MarkKind::Oparray { protect: true, .. } | MarkKind::ErrorExec
        );
        if !restores {
            return Ok(());
        }
        // Only pop back if the stacks grew: the body may legitimately have
        // consumed its operands.
        if ctx.ostack.count() > self.saved_ostack {
            ctx.ostack.pop_to(self.saved_ostack);
        }
        let floor = self.saved_dstack.max(ctx.min_dstack);
        if ctx.dstack.count() > floor {
            ctx.dstack.pop_to(floor);
            ctx.dstack_epoch += 1;
        }
        Ok(())
    }
}

/// Push a mark for the current stack depths.
pub fn push_mark(ctx: &mut Context, kind: MarkKind) -> Result<(), ErrorCode> {
    let mark = Mark::new(kind, ctx);
    ctx.estack.push(ExecEntry::Mark(mark))
}

/// Push a value onto the execution stack.
pub fn push_exec(ctx: &mut Context, v: Value) -> Result<(), ErrorCode> {
    ctx.estack.push(ExecEntry::Value(v))
}

/// Value `i` entries below the top of the execution stack.
///
/// Continuation operators read their saved state with this; a missing or
/// mark-typed slot means the stack was corrupted.
pub fn exec_value(ctx: &Context, i: usize) -> Result<Value, ErrorCode> {
    ctx.estack
        .index(i)
        .and_then(|e| e.value())
        .ok_or(ErrorCode::Fatal)
}

/// Overwrite the value `i` entries below the top.
pub fn set_exec_value(ctx: &mut Context, i: usize, v: Value) -> Result<(), ErrorCode> {
    match ctx.estack.index_mut(i) {
        Some(slot @ ExecEntry::Value(_)) => {
            *slot = ExecEntry::Value(v);
            Ok(())
        }
        _ => Err(ErrorCode::Fatal),
    }
}

/// Pop `count` entries, running the cleanup of every mark popped.
pub fn pop_estack(ctx: &mut Context, count: usize) -> Result<(), ErrorCode> {
    for _ in 0..count {
        let Some(entry) = ctx.estack.top() else {
            return Err(ErrorCode::ExecStackUnderflow);
        };
        ctx.estack.pop(1)?;
        if let ExecEntry::Mark(mark) = entry {
            mark.release(ctx)?;
        }
    }
    Ok(())
}

/// Entries to pop to remove the innermost `stopped` mark matching `mask`,
/// mark included.
pub fn count_to_stopped(ctx: &Context, mask: i64) -> Option<usize> {
    count_to_mark(ctx, |kind| matches!(kind, MarkKind::Stopped { mask: m } if m & mask != 0))
}

/// Entries to pop to remove the innermost mark satisfying `pred`, mark
/// included.
pub fn count_to_mark(ctx: &Context, pred: impl Fn(MarkKind) -> bool) -> Option<usize> {
    ctx.estack
        .iter_from_top()
        .position(|e| e.mark().is_some_and(|m| pred(m.kind)))
        .map(|i| i + 1)
}

/// Number of entries on the execution stack.
pub fn count_exec_stack(ctx: &Context) -> usize {
    ctx.estack.count()
}

/// Depth of the innermost oparray mark, counted from the top.
pub fn oparray_find(ctx: &Context) -> Option<usize> {
    ctx.estack
        .iter_from_top()
        .position(|e| matches!(e.mark(), Some(Mark { kind: MarkKind::Oparray { .. }, .. })))
}

/// True if a handler for `code` is already running.
pub fn handler_active(ctx: &Context, code: ErrorCode) -> bool {
    ctx.estack
        .iter_from_top()
        .any(|e| matches!(e.mark(), Some(Mark { kind: MarkKind::Handler { code: c }, .. }) if c == code))
}

/// The object an error should be reported against when it occurs inside a
/// protected call: the innermost protected oparray's operator, or the object
/// given to the innermost `.errorexec`.
pub fn errorexec_find(ctx: &Context) -> Option<Value> {
    for (i, entry) in ctx.estack.iter_from_top().enumerate() {
        let Some(mark) = entry.mark() else {
            continue;
        };
        match mark.kind {
            MarkKind::Oparray { index: 0, .. } => continue,
            MarkKind::Oparray { index, protect: true } => return Some(Value::oparray(index)),
            MarkKind::Oparray { protect: false, .. } => return None,
            MarkKind::ErrorExec => {
                let errobj = if i == 0 {
                    None
                } else {
                    ctx.estack.index(i - 1).and_then(|e| e.value())
                };
                return match errobj {
                    Some(v) if v.payload != Payload::Null => Some(v),
                    _ => None,
                };
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpConfig;

    fn ctx() -> Context {
        Context::new(InterpConfig::default())
    }

    #[test]
    fn test_pop_estack_restores_protected_depths() {
        let mut ctx = ctx();
        ctx.push(Value::integer(1)).unwrap();
        push_mark(&mut ctx, MarkKind::Oparray { index: 4096, protect: true }).unwrap();
        push_exec(&mut ctx, Value::NO_OP).unwrap();
        ctx.push(Value::integer(2)).unwrap();
        ctx.push(Value::integer(3)).unwrap();
        pop_estack(&mut ctx, 2).unwrap();
        assert_eq!(ctx.ostack.count(), 1);
    }

    #[test]
    fn test_unprotected_oparray_leaves_stacks() {
        let mut ctx = ctx();
        push_mark(&mut ctx, MarkKind::Oparray { index: 4096, protect: false }).unwrap();
        ctx.push(Value::integer(2)).unwrap();
        pop_estack(&mut ctx, 1).unwrap();
        assert_eq!(ctx.ostack.count(), 1);
    }

    #[test]
    fn test_release_never_grows_stacks() {
        let mut ctx = ctx();
        ctx.push(Value::integer(1)).unwrap();
        ctx.push(Value::integer(2)).unwrap();
        push_mark(&mut ctx, MarkKind::ErrorExec).unwrap();
        ctx.pop(2).unwrap();
        pop_estack(&mut ctx, 1).unwrap();
        assert_eq!(ctx.ostack.count(), 0);
    }

    #[test]
    fn test_count_to_stopped_respects_mask() {
        let mut ctx = ctx();
        push_mark(&mut ctx, MarkKind::Stopped { mask: 1 }).unwrap();
        push_exec(&mut ctx, Value::boolean(false)).unwrap();
        push_mark(&mut ctx, MarkKind::Stopped { mask: 2 }).unwrap();
        push_exec(&mut ctx, Value::NO_OP).unwrap();
        assert_eq!(count_to_stopped(&ctx, 2), Some(2));
        assert_eq!(count_to_stopped(&ctx, 1), Some(4));
        assert_eq!(count_to_stopped(&ctx, 4), None);
    }

    #[test]
    fn test_errorexec_find() {
        let mut ctx = ctx();
        assert_eq!(errorexec_find(&ctx), None);
        push_mark(&mut ctx, MarkKind::ErrorExec).unwrap();
        push_exec(&mut ctx, Value::integer(42)).unwrap();
        push_exec(&mut ctx, Value::NO_OP).unwrap();
        assert_eq!(errorexec_find(&ctx), Some(Value::integer(42)));

        push_mark(&mut ctx, MarkKind::Oparray { index: 0, protect: true }).unwrap();
        assert_eq!(errorexec_find(&ctx), Some(Value::integer(42)));

        push_mark(&mut ctx, MarkKind::Oparray { index: 4097, protect: true }).unwrap();
        assert_eq!(errorexec_find(&ctx), Some(Value::oparray(4097)));

        push_mark(&mut ctx, MarkKind::Oparray { index: 4098, protect: false }).unwrap();
        assert_eq!(errorexec_find(&ctx), None);
    }

    #[test]
    fn test_errorexec_with_null_object() {
        let mut ctx = ctx();
        push_mark(&mut ctx, MarkKind::ErrorExec).unwrap();
        push_exec(&mut ctx, Value::NULL).unwrap();
        assert_eq!(errorexec_find(&ctx), None);
    }

    #[test]
    fn test_handler_active_and_oparray_find() {
        let mut ctx = ctx();
        push_mark(&mut ctx, MarkKind::Handler { code: ErrorCode::TypeCheck }).unwrap();
        push_mark(&mut ctx, MarkKind::Oparray { index: 4096, protect: true }).unwrap();
        push_exec(&mut ctx, Value::NO_OP).unwrap();
        assert!(handler_active(&ctx, ErrorCode::TypeCheck));
        assert!(!handler_active(&ctx, ErrorCode::RangeCheck));
        assert_eq!(oparray_find(&ctx), Some(1));
        assert_eq!(exec_value(&ctx, 1), Err(ErrorCode::Fatal));
        assert_eq!(exec_value(&ctx, 0), Ok(Value::NO_OP));
    }
}
