//! Inline fast path for the special operators
//!
//! The commonest stack and control operators run here on the dispatcher's
//! mirrored stack pointer, without a table call. Anything outside the cheap
//! case (mixed-type arithmetic, `def`, `index`, `roll`) goes through the
//! operator's table procedure, which behaves identically.

use super::{Label, Machine, Step};
use crate::context::check_proc;
use psi_core::{ErrorCode, OpIndex, Payload, SpecialOp, Value};

impl Machine<'_> {
    /// Operands addressable in the current block.
    fn in_block(&self) -> usize {
        (self.osp + 1).saturating_sub(self.ctx.ostack.bot())
    }

    fn operand_at(&self, i: usize) -> Value {
        self.ctx.ostack.at(self.osp - i)
    }

    pub(super) fn fast(&mut self, op: SpecialOp, index: OpIndex, via: Option<Value>) -> Step {
        let object = via.unwrap_or(Value::operator(index, Some(op)));
        match op {
            SpecialOp::Dup => {
                if self.in_block() < 1 {
                    return self.fail(ErrorCode::StackUnderflow, object);
                }
                if self.osp >= self.ctx.ostack.top_limit() {
                    self.ctx.ostack.set_requested(1);
                    return self.fail(ErrorCode::StackOverflow, object);
                }
                let v = self.operand_at(0);
                self.osp += 1;
                self.ctx.ostack.set_at(self.osp, v);
            }
            SpecialOp::Exch => {
                if self.in_block() < 2 {
                    return self.fail(ErrorCode::StackUnderflow, object);
                }
                let a = self.operand_at(1);
                let b = self.operand_at(0);
                self.ctx.ostack.set_at(self.osp - 1, b);
                self.ctx.ostack.set_at(self.osp, a);
            }
            SpecialOp::Pop => {
                if self.in_block() < 1 {
                    return self.fail(ErrorCode::StackUnderflow, object);
                }
                self.osp -= 1;
            }
            SpecialOp::Add | SpecialOp::Sub => {
                let sum = match self.int_pair() {
                    Some((a, b)) if op == SpecialOp::Add => a.checked_add(b),
                    Some((a, b)) => a.checked_sub(b),
                    None => None,
                };
                let Some(result) = sum else {
                    return self.call_operator(index, via);
                };
                self.osp -= 1;
                self.ctx.ostack.set_at(self.osp, Value::integer(result));
            }
            SpecialOp::If => {
                if self.in_block() < 2 {
                    return self.fail(ErrorCode::StackUnderflow, object);
                }
                let proc = match check_proc(self.operand_at(0)) {
                    Ok(p) => p,
                    Err(code) => return self.fail(code, object),
                };
                let Some(cond) = self.operand_at(1).as_bool() else {
                    return self.fail(ErrorCode::TypeCheck, object);
                };
                if cond && self.esp >= self.ctx.estack.top_limit() {
                    self.ctx.estack.set_requested(1);
                    return self.fail(ErrorCode::ExecStackOverflow, object);
                }
                self.osp -= 2;
                self.ctx.stats.fast_ops += 1;
                if cond {
                    self.store_state();
                    return self.call_proc(proc, object);
                }
                return Ok(Label::Next);
            }
            SpecialOp::IfElse => {
                if self.in_block() < 3 {
                    return self.fail(ErrorCode::StackUnderflow, object);
                }
                let checked = check_proc(self.operand_at(0))
                    .and_then(|else_proc| Ok((check_proc(self.operand_at(1))?, else_proc)));
                let (then_proc, else_proc) = match checked {
                    Ok(pair) => pair,
                    Err(code) => return self.fail(code, object),
                };
                let Some(cond) = self.operand_at(2).as_bool() else {
                    return self.fail(ErrorCode::TypeCheck, object);
                };
                if self.esp >= self.ctx.estack.top_limit() {
                    self.ctx.estack.set_requested(1);
                    return self.fail(ErrorCode::ExecStackOverflow, object);
                }
                self.osp -= 3;
                self.ctx.stats.fast_ops += 1;
                self.store_state();
                return self.call_proc(if cond { then_proc } else { else_proc }, object);
            }
            SpecialOp::Def | SpecialOp::Index | SpecialOp::Roll => {
                return self.call_operator(index, via);
            }
        }
        self.ctx.stats.fast_ops += 1;
        Ok(Label::Next)
    }

    /// The top two operands, when both are integers.
    fn int_pair(&self) -> Option<(i64, i64)> {
        if self.in_block() < 2 {
            return None;
        }
        match (self.operand_at(1).payload, self.operand_at(0).payload) {
            (Payload::Integer(a), Payload::Integer(b)) => Some((a, b)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::InterpConfig;
    use crate::context::Context;
    use crate::estack::push_exec;
    use crate::interp::interp;
    use crate::operators::{OP_INTERP_EXIT, OpStatus, SPECIAL_OPS};
    use psi_core::{ErrorCode, SpecialOp, Value};

    /// Run one operator over `operands`, either through the dispatcher or by
    /// calling its table procedure. Returns the error (if any) and the stack.
    fn through_dispatcher(op: SpecialOp, operands: &[Value]) -> (Option<ErrorCode>, Vec<Value>) {
        let mut ctx = Context::new(InterpConfig::default());
        for v in operands {
            ctx.push(*v).unwrap();
        }
        push_exec(&mut ctx, Value::operator(OP_INTERP_EXIT, None)).unwrap();
        let fault = interp(&mut ctx, Value::operator(op.index(), Some(op)));
        let code = (fault.code != ErrorCode::InterpreterExit).then_some(fault.code);
        (code, ctx.ostack.to_vec())
    }

    fn through_table(op: SpecialOp, operands: &[Value]) -> (Option<ErrorCode>, Vec<Value>) {
        let mut ctx = Context::new(InterpConfig::default());
        for v in operands {
            ctx.push(*v).unwrap();
        }
        let proc = SPECIAL_OPS[op.index() as usize - 1].proc;
        let code = match proc(&mut ctx) {
            Ok(OpStatus::Normal | OpStatus::PushEstack) => None,
            Ok(other) => panic!("unexpected status {:?}", other),
            Err(code) => Some(code),
        };
        (code, ctx.ostack.to_vec())
    }

    #[test]
    fn test_fast_path_matches_table() {
        let cases: Vec<(SpecialOp, Vec<Value>)> = vec![
            (SpecialOp::Dup, vec![]),
            (SpecialOp::Dup, vec![Value::integer(4)]),
            (SpecialOp::Exch, vec![Value::integer(1)]),
            (SpecialOp::Exch, vec![Value::integer(1), Value::boolean(true)]),
            (SpecialOp::Pop, vec![]),
            (SpecialOp::Pop, vec![Value::integer(1), Value::integer(2)]),
            (SpecialOp::Add, vec![Value::integer(2), Value::integer(3)]),
            (SpecialOp::Add, vec![Value::integer(i64::MAX), Value::integer(1)]),
            (SpecialOp::Sub, vec![Value::integer(2), Value::real(0.5)]),
            (SpecialOp::Sub, vec![Value::integer(2)]),
            (SpecialOp::If, vec![Value::boolean(false), Value::integer(1)]),
            (SpecialOp::If, vec![Value::integer(0), Value::NULL]),
            (SpecialOp::IfElse, vec![Value::boolean(true), Value::NULL, Value::NULL]),
        ];
        for (op, operands) in cases {
            assert_eq!(
                through_dispatcher(op, &operands),
                through_table(op, &operands),
                "{:?} over {:?}",
                op,
                operands
            );
        }
    }

    #[test]
    fn test_if_enters_procedure() {
        let mut ctx = Context::new(InterpConfig::default());
        let proc = ctx.alloc_proc(vec![Value::integer(7)]).unwrap();
        ctx.push(Value::boolean(true)).unwrap();
        ctx.push(proc).unwrap();
        push_exec(&mut ctx, Value::operator(OP_INTERP_EXIT, None)).unwrap();
        let fault = interp(&mut ctx, Value::operator(SpecialOp::If.index(), Some(SpecialOp::If)));
        assert_eq!(fault.code, ErrorCode::InterpreterExit);
        assert_eq!(ctx.ostack.to_vec(), vec![Value::integer(7)]);
        assert_eq!(ctx.stats.fast_ops, 1);
    }
}
