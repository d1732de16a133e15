//! Packed Values
//!
//! Procedure bodies are dominated by a handful of element shapes: small
//! integers, names and operators. A packed array stores each element in 16 bits
//! and escapes anything else to an out-of-line table of full values.
//!
//! ## Encoding
//!
//! ```text
//!  15  13 12                        0
//! ┌──────┬───────────────────────────┐
//! │ tag  │ payload (13 bits)         │
//! └──────┴───────────────────────────┘
//!
//! tag 0  Full          index into PackedBody::full
//! tag 1  ExecOperator  dense operator index
//! tag 2  Integer       value + 4096  (-4096..=4095)
//! tag 3  LiteralName   name index
//! tag 4  ExecName      name index
//! ```
//!
//! The dispatcher decodes slots one at a time; a packed body is never expanded
//! as a whole.

use crate::value::{Attrs, NameIndex, OpIndex, Payload, SpecialOp, Value};

const TAG_SHIFT: u16 = 13;
const PAYLOAD_MASK: u16 = (1 << TAG_SHIFT) - 1;

const TAG_FULL: u16 = 0;
const TAG_EXEC_OPERATOR: u16 = 1;
const TAG_INTEGER: u16 = 2;
const TAG_LITERAL_NAME: u16 = 3;
const TAG_EXEC_NAME: u16 = 4;

/// Smallest integer a packed slot can hold.
pub const PACKED_MIN_INT: i64 = -(1 << (TAG_SHIFT - 1));
/// Largest integer a packed slot can hold.
pub const PACKED_MAX_INT: i64 = (1 << (TAG_SHIFT - 1)) - 1;
/// Largest name or operator index a packed slot can hold.
pub const PACKED_MAX_INDEX: u32 = PAYLOAD_MASK as u32;

/// One 16-bit packed element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packed(pub u16);

/// A decoded packed element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedShape {
    /// Index into the out-of-line table.
    Full(u16),
    ExecOperator(OpIndex),
    Integer(i64),
    LiteralName(NameIndex),
    ExecName(NameIndex),
}

impl Packed {
    fn new(tag: u16, payload: u16) -> Packed {
        Packed((tag << TAG_SHIFT) | (payload & PAYLOAD_MASK))
    }

    /// Encode `v` compactly, or return `None` if it needs the escape form.
    ///
    /// Only values carrying default attributes pack: decoding must reproduce
    /// the value exactly.
    pub fn encode(v: &Value) -> Option<Packed> {
        if v.attrs != Attrs::LITERAL && v.attrs != Attrs::EXECUTABLE {
            return None;
        }
        match v.payload {
            Payload::Integer(i) if !v.attrs.executable => {
                if (PACKED_MIN_INT..=PACKED_MAX_INT).contains(&i) {
                    Some(Packed::new(TAG_INTEGER, (i - PACKED_MIN_INT) as u16))
                } else {
                    None
                }
            }
            Payload::Name(n) if n.0 <= PACKED_MAX_INDEX => {
                let tag = if v.attrs.executable {
                    TAG_EXEC_NAME
                } else {
                    TAG_LITERAL_NAME
                };
                Some(Packed::new(tag, n.0 as u16))
            }
            Payload::Operator { index, special }
                if v.attrs.executable
                    && u32::from(index) <= PACKED_MAX_INDEX
                    && special == SpecialOp::from_index(index) =>
            {
                Some(Packed::new(TAG_EXEC_OPERATOR, index))
            }
            Payload::OpArray(index) if v.attrs.executable && u32::from(index) <= PACKED_MAX_INDEX => {
                Some(Packed::new(TAG_EXEC_OPERATOR, index))
            }
            _ => None,
        }
    }

    pub fn decode(self) -> PackedShape {
        let payload = self.0 & PAYLOAD_MASK;
        match self.0 >> TAG_SHIFT {
            TAG_EXEC_OPERATOR => PackedShape::ExecOperator(payload),
            TAG_INTEGER => PackedShape::Integer(i64::from(payload) + PACKED_MIN_INT),
            TAG_LITERAL_NAME => PackedShape::LiteralName(NameIndex(u32::from(payload))),
            TAG_EXEC_NAME => PackedShape::ExecName(NameIndex(u32::from(payload))),
            _ => PackedShape::Full(payload),
        }
    }
}

impl PackedShape {
    /// Expand to a full value. `full` supplies escaped elements.
    pub fn expand(self, full: &[Value]) -> Value {
        match self {
            PackedShape::Full(i) => full.get(i as usize).copied().unwrap_or(Value::NULL),
            PackedShape::ExecOperator(index) => operator_value(index),
            PackedShape::Integer(i) => Value::integer(i),
            PackedShape::LiteralName(n) => Value::name(n),
            PackedShape::ExecName(n) => Value::exec_name(n),
        }
    }
}

/// The value a packed operator index denotes.
pub fn operator_value(index: OpIndex) -> Value {
    if index >= crate::value::OPARRAY_BASE {
        Value::oparray(index)
    } else {
        Value::operator(index, SpecialOp::from_index(index))
    }
}

/// The body of a packed array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackedBody {
    pub slots: Vec<Packed>,
    pub full: Vec<Value>,
}

impl PackedBody {
    /// Pack a sequence of values. Returns `None` if the escape table would
    /// overflow the payload field.
    pub fn pack(values: &[Value]) -> Option<PackedBody> {
        let mut body = PackedBody {
            slots: Vec::with_capacity(values.len()),
            full: Vec::new(),
        };
        for v in values {
            match Packed::encode(v) {
                Some(p) => body.slots.push(p),
                None => {
                    if body.full.len() > PACKED_MAX_INDEX as usize {
                        return None;
                    }
                    body.slots.push(Packed::new(TAG_FULL, body.full.len() as u16));
                    body.full.push(*v);
                }
            }
        }
        Some(body)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<Value> {
        self.slots.get(i).map(|p| p.decode().expand(&self.full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Kind;

    #[test]
    fn test_integer_range_boundaries() {
        for i in [PACKED_MIN_INT, -1, 0, 1, PACKED_MAX_INT] {
            let p = Packed::encode(&Value::integer(i)).expect("in range");
            assert_eq!(p.decode(), PackedShape::Integer(i));
        }
        assert!(Packed::encode(&Value::integer(PACKED_MAX_INT + 1)).is_none());
        assert!(Packed::encode(&Value::integer(PACKED_MIN_INT - 1)).is_none());
    }

    #[test]
    fn test_names_keep_executability() {
        let lit = Packed::encode(&Value::name(NameIndex(7))).unwrap();
        let exe = Packed::encode(&Value::exec_name(NameIndex(7))).unwrap();
        assert_eq!(lit.decode(), PackedShape::LiteralName(NameIndex(7)));
        assert_eq!(exe.decode(), PackedShape::ExecName(NameIndex(7)));
        assert!(Packed::encode(&Value::name(NameIndex(PACKED_MAX_INDEX + 1))).is_none());
    }

    #[test]
    fn test_operator_needs_canonical_special_tag() {
        let dup = Value::operator(3, Some(SpecialOp::Dup));
        assert_eq!(Packed::encode(&dup).unwrap().decode(), PackedShape::ExecOperator(3));
        // The same index without its special tag cannot be told apart once packed.
        assert!(Packed::encode(&Value::operator(3, None)).is_none());
        assert!(Packed::encode(&Value::operator(3, None).cvlit()).is_none());
    }

    #[test]
    fn test_mixed_body_escapes_the_rest() {
        let values = [
            Value::integer(5),
            Value::real(1.5),
            Value::exec_name(NameIndex(2)),
            Value::integer(1 << 20),
            Value::operator(1, Some(SpecialOp::Add)),
        ];
        let body = PackedBody::pack(&values).unwrap();
        assert_eq!(body.len(), 5);
        assert_eq!(body.full.len(), 2);
        for (i, v) in values.iter().enumerate() {
            assert_eq!(body.get(i), Some(*v));
        }
        assert_eq!(body.get(1).map(|v| v.kind()), Some(Kind::Real));
    }
}
