//! Operator table and the built-in operator set
//!
//! Operators are plain functions over the execution context:
//!
//! ```text
//! fn(&mut Context) -> Result<OpStatus, ErrorCode>
//! ```
//!
//! An operator either completes (`Normal`), asks the dispatcher to resume
//! from the execution stack (`PushEstack` after pushing work, `PopEstack` after
//! removing entries), requests a color remap, or fails. A failing operator
//! leaves every stack exactly as it found it, so the recovery driver can grow
//! a stack and simply run it again.
//!
//! ## Index layout
//!
//! | Index              | Contents                                   |
//! |--------------------|--------------------------------------------|
//! | 0                  | reserved, never an operator                |
//! | 1..=10             | the fast-path specials, in `SpecialOp` order |
//! | 11..=20            | internal continuation operators (`%...`)   |
//! | 21..               | everything else, append-only               |
//! | `OPARRAY_BASE`..   | user-defined operators (`.makeoperator`)   |
//!
//! Names starting with `%` are never entered into `systemdict`.

pub mod arith;
pub mod array;
pub mod color;
pub mod control;
pub mod dict;
pub mod internal;
pub mod io;
pub mod stack;
pub mod types;
pub mod vm;

use crate::context::Context;
use psi_core::{ErrorCode, NameIndex, OPARRAY_BASE, OpIndex, SpecialOp, Value};
use std::collections::HashMap;

/// How an operator finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Normal,
    AltSuccess,
    /// Work was pushed onto the execution stack.
    PushEstack,
    /// Entries were popped off the execution stack.
    PopEstack,
    /// The pending color must be mapped before the operator can complete.
    RemapColor,
}

pub type OpResult = Result<OpStatus, ErrorCode>;

pub type OpProc = fn(&mut Context) -> OpResult;

#[derive(Clone, Copy)]
pub struct OpDef {
    pub name: &'static str,
    pub proc: OpProc,
}

impl std::fmt::Debug for OpDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OpDef({})", self.name)
    }
}

/// A user-defined operator: a procedure body executed under a protection mark.
#[derive(Debug, Clone, Copy)]
pub struct OparrayDef {
    pub name: NameIndex,
    pub body: Value,
}

/// The specials, indexed so that `SPECIAL_OPS[i]` is `SpecialOp::ALL[i]`.
pub const SPECIAL_OPS: [OpDef; 10] = [
    OpDef { name: "add", proc: arith::op_add },
    OpDef { name: "def", proc: dict::op_def },
    OpDef { name: "dup", proc: stack::op_dup },
    OpDef { name: "exch", proc: stack::op_exch },
    OpDef { name: "if", proc: control::op_if },
    OpDef { name: "ifelse", proc: control::op_ifelse },
    OpDef { name: "index", proc: stack::op_index },
    OpDef { name: "pop", proc: stack::op_pop },
    OpDef { name: "roll", proc: stack::op_roll },
    OpDef { name: "sub", proc: arith::op_sub },
];

pub const OP_INTERP_EXIT: OpIndex = 11;
pub const OP_ESTACK_UNDERFLOW: OpIndex = 12;
pub const OP_OPARRAY_POP: OpIndex = 13;
pub const OP_ERROREXEC_POP: OpIndex = 14;
pub const OP_STOPPED_PUSH: OpIndex = 15;
pub const OP_LOOP_CONTINUE: OpIndex = 16;
pub const OP_REPEAT_CONTINUE: OpIndex = 17;
pub const OP_FOR_INT_CONTINUE: OpIndex = 18;
pub const OP_FOR_REAL_CONTINUE: OpIndex = 19;
pub const OP_REMAP_COLOR: OpIndex = 20;

/// Continuation operators, registered immediately after the specials so that
/// their indices are the `OP_*` constants above.
pub const INTERNAL_OPS: [OpDef; 10] = [
    OpDef { name: "%interp_exit", proc: control::op_interp_exit },
    OpDef { name: "%estack_underflow", proc: control::op_estack_underflow },
    OpDef { name: "%oparray_pop", proc: internal::op_oparray_pop },
    OpDef { name: "%errorexec_pop", proc: internal::op_errorexec_pop },
    OpDef { name: "%stopped_push", proc: control::op_stopped_push },
    OpDef { name: "%loop_continue", proc: control::op_loop_continue },
    OpDef { name: "%repeat_continue", proc: control::op_repeat_continue },
    OpDef { name: "%for_int_continue", proc: control::op_for_int_continue },
    OpDef { name: "%for_real_continue", proc: control::op_for_real_continue },
    OpDef { name: "%remap_color", proc: color::op_remap_color },
];

/// Dense, append-only operator table.
#[derive(Debug, Clone)]
pub struct OperatorTable {
    defs: Vec<Option<OpDef>>,
    by_name: HashMap<&'static str, OpIndex>,
    oparrays: Vec<OparrayDef>,
}

impl Default for OperatorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorTable {
    /// An empty table (index 0 reserved).
    pub fn new() -> Self {
        OperatorTable {
            defs: vec![None],
            by_name: HashMap::new(),
            oparrays: Vec::new(),
        }
    }

    /// The table with every built-in operator registered.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        let sets: [&[OpDef]; 12] = [
            &SPECIAL_OPS,
            &INTERNAL_OPS,
            stack::OPS,
            arith::OPS,
            control::OPS,
            dict::OPS,
            array::OPS,
            types::OPS,
            vm::OPS,
            io::OPS,
            internal::OPS,
            color::OPS,
        ];
        for def in sets.into_iter().flatten() {
            // Fewer built-ins than OPARRAY_BASE; registration cannot fail.
            let _ = table.register(*def);
        }
        table
    }

    /// Append an operator. Fails with `limitcheck` once the native range is full.
    pub fn register(&mut self, def: OpDef) -> Result<OpIndex, ErrorCode> {
        if self.defs.len() >= OPARRAY_BASE as usize {
            return Err(ErrorCode::LimitCheck);
        }
        let index = self.defs.len() as OpIndex;
        self.defs.push(Some(def));
        self.by_name.insert(def.name, index);
        Ok(index)
    }

    pub fn def(&self, index: OpIndex) -> Option<OpDef> {
        self.defs.get(index as usize).copied().flatten()
    }

    pub fn proc(&self, index: OpIndex) -> Option<OpProc> {
        self.def(index).map(|d| d.proc)
    }

    pub fn find(&self, name: &str) -> Option<OpIndex> {
        self.by_name.get(name).copied()
    }

    /// Native operators as `(index, name)`, in index order.
    pub fn builtin_names(&self) -> Vec<(OpIndex, &'static str)> {
        self.defs
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.map(|d| (i as OpIndex, d.name)))
            .collect()
    }

    /// The executable value for a native operator. The special tag is attached
    /// when `proc` is one of the fast-path procedures.
    pub fn make_operator_value(&self, proc: OpProc, index: OpIndex) -> Value {
        let special = SPECIAL_OPS
            .iter()
            .position(|d| d.proc as usize == proc as usize)
            .map(|i| SpecialOp::ALL[i]);
        Value::operator(index, special)
    }

    /// The executable value for any operator index.
    pub fn operator_value(&self, index: OpIndex) -> Value {
        if index >= OPARRAY_BASE {
            return Value::oparray(index);
        }
        match self.def(index) {
            Some(def) => self.make_operator_value(def.proc, index),
            None => Value::operator(index, None),
        }
    }

    pub fn add_oparray(&mut self, def: OparrayDef) -> Result<OpIndex, ErrorCode> {
        let index = OPARRAY_BASE as usize + self.oparrays.len();
        if index > OpIndex::MAX as usize {
            return Err(ErrorCode::LimitCheck);
        }
        self.oparrays.push(def);
        Ok(index as OpIndex)
    }

    pub fn oparray(&self, index: OpIndex) -> Option<&OparrayDef> {
        let i = (index as usize).checked_sub(OPARRAY_BASE as usize)?;
        self.oparrays.get(i)
    }

    /// Oparray bodies, for the collector.
    pub fn oparray_bodies_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.oparrays.iter_mut().map(|o| &mut o.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specials_occupy_their_fixed_indices() {
        let table = OperatorTable::with_builtins();
        for op in SpecialOp::ALL {
            let def = table.def(op.index()).unwrap();
            assert_eq!(def.name, op.name());
            assert_eq!(table.operator_value(op.index()), Value::operator(op.index(), Some(op)));
        }
        assert!(table.def(0).is_none());
    }

    #[test]
    fn test_internal_indices_match_constants() {
        let table = OperatorTable::with_builtins();
        assert_eq!(table.find("%interp_exit"), Some(OP_INTERP_EXIT));
        assert_eq!(table.find("%estack_underflow"), Some(OP_ESTACK_UNDERFLOW));
        assert_eq!(table.find("%oparray_pop"), Some(OP_OPARRAY_POP));
        assert_eq!(table.find("%errorexec_pop"), Some(OP_ERROREXEC_POP));
        assert_eq!(table.find("%stopped_push"), Some(OP_STOPPED_PUSH));
        assert_eq!(table.find("%loop_continue"), Some(OP_LOOP_CONTINUE));
        assert_eq!(table.find("%repeat_continue"), Some(OP_REPEAT_CONTINUE));
        assert_eq!(table.find("%for_int_continue"), Some(OP_FOR_INT_CONTINUE));
        assert_eq!(table.find("%for_real_continue"), Some(OP_FOR_REAL_CONTINUE));
        assert_eq!(table.find("%remap_color"), Some(OP_REMAP_COLOR));
    }

    #[test]
    fn test_special_tag_follows_procedure_not_index() {
        let mut table = OperatorTable::with_builtins();
        let alias = table
            .register(OpDef { name: "myadd", proc: arith::op_add })
            .unwrap();
        assert_eq!(
            table.operator_value(alias),
            Value::operator(alias, Some(SpecialOp::Add))
        );
        let mul = table.find("mul").unwrap();
        assert_eq!(table.operator_value(mul), Value::operator(mul, None));
    }

    #[test]
    fn test_module_tables_do_not_repeat_specials() {
        for set in [stack::OPS, arith::OPS, control::OPS, dict::OPS] {
            for def in set {
                assert!(SPECIAL_OPS.iter().all(|s| s.name != def.name), "{}", def.name);
            }
        }
    }

    #[test]
    fn test_oparrays_live_above_base() {
        let mut table = OperatorTable::new();
        let index = table
            .add_oparray(OparrayDef { name: NameIndex(0), body: Value::NULL })
            .unwrap();
        assert_eq!(index, OPARRAY_BASE);
        assert!(table.oparray(index).is_some());
        assert!(table.oparray(OPARRAY_BASE + 1).is_none());
        assert!(table.oparray(3).is_none());
        assert_eq!(table.operator_value(index), Value::oparray(index));
    }
}
