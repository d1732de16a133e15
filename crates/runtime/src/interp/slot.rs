//! Procedure element classification
//!
//! The dispatcher decides what to do with an element from its shape alone,
//! before materializing anything. Plain arrays hold full values; packed
//! arrays hold 16-bit slots that decode straight to a class for the common
//! shapes (integers, names, operators) and escape to a full value otherwise.

use psi_core::{
    ArrayId, Heap, NameIndex, OPARRAY_BASE, OpIndex, Packed, PackedShape, Payload, SpecialOp,
    Value, packed,
};

/// What the dispatcher does with an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// Push onto the operand stack.
    Literal,
    /// Resolve through the dictionary stack.
    ExecName(NameIndex),
    /// Call a native operator.
    ExecOperator {
        index: OpIndex,
        special: Option<SpecialOp>,
    },
    /// Oparrays, files, strings, null and anything else executable.
    Other,
}

/// A procedure element as stored.
pub trait Slot {
    fn class(&self, heap: &Heap) -> Class;

    /// The element as a full value.
    fn value(&self, heap: &Heap) -> Value;
}

pub fn classify_value(v: &Value) -> Class {
    if !v.is_executable() {
        return Class::Literal;
    }
    match v.payload {
        Payload::Name(n) => Class::ExecName(n),
        Payload::Operator { index, special } => Class::ExecOperator { index, special },
        Payload::Array(_) | Payload::PackedArray(_) => Class::Literal,
        Payload::Integer(_) | Payload::Real(_) | Payload::Boolean(_) | Payload::Mark => {
            Class::Literal
        }
        Payload::Dict(_) | Payload::FontId(_) | Payload::Save(_) => Class::Literal,
        _ => Class::Other,
    }
}

/// An element of a plain array.
#[derive(Debug, Clone, Copy)]
pub struct PlainSlot(pub Value);

impl Slot for PlainSlot {
    fn class(&self, _heap: &Heap) -> Class {
        classify_value(&self.0)
    }

    fn value(&self, _heap: &Heap) -> Value {
        self.0
    }
}

/// An element of a packed array.
#[derive(Debug, Clone, Copy)]
pub struct PackedSlot {
    pub id: ArrayId,
    pub packed: Packed,
}

impl Slot for PackedSlot {
    fn class(&self, heap: &Heap) -> Class {
        match self.packed.decode() {
            PackedShape::Full(i) => classify_value(&heap.packed_full(self.id, i)),
            PackedShape::ExecOperator(index) if index >= OPARRAY_BASE => Class::Other,
            PackedShape::ExecOperator(index) => Class::ExecOperator {
                index,
                special: SpecialOp::from_index(index),
            },
            PackedShape::Integer(_) | PackedShape::LiteralName(_) => Class::Literal,
            PackedShape::ExecName(n) => Class::ExecName(n),
        }
    }

    fn value(&self, heap: &Heap) -> Value {
        match self.packed.decode() {
            PackedShape::Full(i) => heap.packed_full(self.id, i),
            PackedShape::ExecOperator(index) => packed::operator_value(index),
            PackedShape::Integer(i) => Value::integer(i),
            PackedShape::LiteralName(n) => Value::name(n),
            PackedShape::ExecName(n) => Value::exec_name(n),
        }
    }
}
