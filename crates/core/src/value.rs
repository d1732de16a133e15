//! Tagged Value
//!
//! `Value` is the universal unit of interpreter data: a kind-discriminated
//! payload plus attributes (executable flag, access permissions, memory space).
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────┬─────────────────────────────────────┐
//! │ Attrs                        │ Payload                             │
//! │ executable | access | space  │ immediate scalar or arena handle    │
//! └──────────────────────────────┴─────────────────────────────────────┘
//! ```
//!
//! Composite payloads (arrays, strings, dictionaries, files) hold typed arena
//! indices into the [`Heap`](crate::heap::Heap) rather than pointers. The
//! collector compacts the arenas and rewrites every handle it can reach, so a
//! handle held outside the root set is invalid after a collection.
//!
//! Values are `Copy`: copying a composite value shares the heap object, the way
//! PostScript composite objects share their backing storage.

use std::fmt;

// =============================================================================
// Handles
// =============================================================================

/// Dense index into the name table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameIndex(pub u32);

/// Arena index of an array body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayId(pub u32);

/// Arena index of a string body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(pub u32);

/// Arena index of a dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DictId(pub u32);

/// Arena index of a file (byte source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// Dense operator index. Natives live below [`OPARRAY_BASE`].
pub type OpIndex = u16;

/// First operator index used for oparrays (user-defined operators).
pub const OPARRAY_BASE: OpIndex = 4096;

/// A sub-interval of an array body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayRef {
    pub id: ArrayId,
    pub start: u32,
    pub len: u32,
}

/// A sub-interval of a string body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrRef {
    pub id: StringId,
    pub start: u32,
    pub len: u32,
}

/// Handle to a value the interpreter never looks inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpaqueRef {
    pub type_name: &'static str,
    pub id: u32,
}

// =============================================================================
// Attributes
// =============================================================================

/// Read permission.
pub const READ: u8 = 0b001;
/// Write permission.
pub const WRITE: u8 = 0b010;
/// Execute permission.
pub const EXECUTE: u8 = 0b100;
/// Unlimited access.
pub const ALL_ACCESS: u8 = READ | WRITE | EXECUTE;

/// Memory space a value's backing storage was allocated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Space {
    Foreign,
    #[default]
    Local,
    Global,
    System,
}

impl Space {
    /// Storing a value from `self` into an object in `container` is allowed.
    pub fn storable_in(self, container: Space) -> bool {
        match container {
            Space::Local | Space::Foreign => true,
            Space::Global | Space::System => self != Space::Local,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attrs {
    pub executable: bool,
    pub access: u8,
    pub space: Space,
}

impl Attrs {
    pub const LITERAL: Attrs = Attrs {
        executable: false,
        access: ALL_ACCESS,
        space: Space::Local,
    };

    pub const EXECUTABLE: Attrs = Attrs {
        executable: true,
        access: ALL_ACCESS,
        space: Space::Local,
    };
}

// =============================================================================
// Kinds
// =============================================================================

/// The ten operators given an inline fast path in the dispatcher.
///
/// Their dense indices are fixed at 1..=10; index 0 is never an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialOp {
    Add = 1,
    Def,
    Dup,
    Exch,
    If,
    IfElse,
    Index,
    Pop,
    Roll,
    Sub,
}

impl SpecialOp {
    pub const ALL: [SpecialOp; 10] = [
        SpecialOp::Add,
        SpecialOp::Def,
        SpecialOp::Dup,
        SpecialOp::Exch,
        SpecialOp::If,
        SpecialOp::IfElse,
        SpecialOp::Index,
        SpecialOp::Pop,
        SpecialOp::Roll,
        SpecialOp::Sub,
    ];

    pub fn index(self) -> OpIndex {
        self as OpIndex
    }

    pub fn from_index(index: OpIndex) -> Option<SpecialOp> {
        match index {
            1..=10 => Some(Self::ALL[index as usize - 1]),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SpecialOp::Add => "add",
            SpecialOp::Def => "def",
            SpecialOp::Dup => "dup",
            SpecialOp::Exch => "exch",
            SpecialOp::If => "if",
            SpecialOp::IfElse => "ifelse",
            SpecialOp::Index => "index",
            SpecialOp::Pop => "pop",
            SpecialOp::Roll => "roll",
            SpecialOp::Sub => "sub",
        }
    }
}

/// Value payload, one variant per kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Null,
    Mark,
    Name(NameIndex),
    String(StrRef),
    Array(ArrayRef),
    PackedArray(ArrayRef),
    Dict(DictId),
    File(FileId),
    Operator {
        index: OpIndex,
        special: Option<SpecialOp>,
    },
    OpArray(OpIndex),
    FontId(u32),
    Save(u32),
    Struct(OpaqueRef),
    AStruct(OpaqueRef),
    Device(u32),
}

/// Discriminant of a [`Payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Integer,
    Real,
    Boolean,
    Null,
    Mark,
    Name,
    String,
    Array,
    PackedArray,
    Dict,
    File,
    Operator,
    OpArray,
    FontId,
    Save,
    Struct,
    AStruct,
    Device,
}

impl Kind {
    /// The name `type` reports for this kind.
    pub fn type_name(self) -> &'static str {
        match self {
            Kind::Integer => "integertype",
            Kind::Real => "realtype",
            Kind::Boolean => "booleantype",
            Kind::Null => "nulltype",
            Kind::Mark => "marktype",
            Kind::Name => "nametype",
            Kind::String => "stringtype",
            Kind::Array => "arraytype",
            Kind::PackedArray => "packedarraytype",
            Kind::Dict => "dicttype",
            Kind::File => "filetype",
            Kind::Operator | Kind::OpArray => "operatortype",
            Kind::FontId => "fonttype",
            Kind::Save => "savetype",
            Kind::Struct | Kind::AStruct | Kind::Device => "opaquetype",
        }
    }
}

// =============================================================================
// Value
// =============================================================================

#[derive(Clone, Copy, PartialEq)]
pub struct Value {
    pub attrs: Attrs,
    pub payload: Payload,
}

impl Value {
    pub const NULL: Value = Value {
        attrs: Attrs::LITERAL,
        payload: Payload::Null,
    };

    /// An executable null: executing it does nothing.
    pub const NO_OP: Value = Value {
        attrs: Attrs::EXECUTABLE,
        payload: Payload::Null,
    };

    pub fn literal(payload: Payload) -> Value {
        Value {
            attrs: Attrs::LITERAL,
            payload,
        }
    }

    pub fn executable(payload: Payload) -> Value {
        Value {
            attrs: Attrs::EXECUTABLE,
            payload,
        }
    }

    pub fn integer(i: i64) -> Value {
        Value::literal(Payload::Integer(i))
    }

    pub fn real(r: f64) -> Value {
        Value::literal(Payload::Real(r))
    }

    pub fn boolean(b: bool) -> Value {
        Value::literal(Payload::Boolean(b))
    }

    pub fn mark() -> Value {
        Value::literal(Payload::Mark)
    }

    pub fn name(index: NameIndex) -> Value {
        Value::literal(Payload::Name(index))
    }

    pub fn exec_name(index: NameIndex) -> Value {
        Value::executable(Payload::Name(index))
    }

    pub fn operator(index: OpIndex, special: Option<SpecialOp>) -> Value {
        Value::executable(Payload::Operator { index, special })
    }

    pub fn oparray(index: OpIndex) -> Value {
        Value::executable(Payload::OpArray(index))
    }

    pub fn string(r: StrRef, space: Space) -> Value {
        Value::literal(Payload::String(r)).in_space(space)
    }

    pub fn array(r: ArrayRef, space: Space) -> Value {
        Value::literal(Payload::Array(r)).in_space(space)
    }

    /// Packed arrays are always read-only.
    pub fn packed_array(r: ArrayRef, space: Space) -> Value {
        Value::literal(Payload::PackedArray(r))
            .in_space(space)
            .with_access(READ | EXECUTE)
    }

    pub fn dict(id: DictId, space: Space) -> Value {
        Value::literal(Payload::Dict(id)).in_space(space)
    }

    pub fn file(id: FileId) -> Value {
        Value::literal(Payload::File(id)).with_access(READ | EXECUTE)
    }

    pub fn kind(&self) -> Kind {
        match self.payload {
            Payload::Integer(_) => Kind::Integer,
            Payload::Real(_) => Kind::Real,
            Payload::Boolean(_) => Kind::Boolean,
            Payload::Null => Kind::Null,
            Payload::Mark => Kind::Mark,
            Payload::Name(_) => Kind::Name,
            Payload::String(_) => Kind::String,
            Payload::Array(_) => Kind::Array,
            Payload::PackedArray(_) => Kind::PackedArray,
            Payload::Dict(_) => Kind::Dict,
            Payload::File(_) => Kind::File,
            Payload::Operator { .. } => Kind::Operator,
            Payload::OpArray(_) => Kind::OpArray,
            Payload::FontId(_) => Kind::FontId,
            Payload::Save(_) => Kind::Save,
            Payload::Struct(_) => Kind::Struct,
            Payload::AStruct(_) => Kind::AStruct,
            Payload::Device(_) => Kind::Device,
        }
    }

    pub fn is_executable(&self) -> bool {
        self.attrs.executable
    }

    pub fn has_access(&self, bits: u8) -> bool {
        self.attrs.access & bits == bits
    }

    pub fn space(&self) -> Space {
        self.attrs.space
    }

    /// The array interval, for both plain and packed arrays.
    pub fn array_ref(&self) -> Option<ArrayRef> {
        match self.payload {
            Payload::Array(r) | Payload::PackedArray(r) => Some(r),
            _ => None,
        }
    }

    /// An executable array that may be executed.
    pub fn is_proc(&self) -> bool {
        self.attrs.executable
            && self.has_access(EXECUTE)
            && matches!(self.payload, Payload::Array(_) | Payload::PackedArray(_))
    }

    /// Number of elements for arrays and strings, 0 otherwise.
    pub fn size(&self) -> u32 {
        match self.payload {
            Payload::Array(r) | Payload::PackedArray(r) => r.len,
            Payload::String(s) => s.len,
            _ => 0,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.payload {
            Payload::Integer(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.payload {
            Payload::Boolean(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<NameIndex> {
        match self.payload {
            Payload::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<DictId> {
        match self.payload {
            Payload::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn cvx(mut self) -> Value {
        self.attrs.executable = true;
        self
    }

    pub fn cvlit(mut self) -> Value {
        self.attrs.executable = false;
        self
    }

    pub fn with_access(mut self, access: u8) -> Value {
        self.attrs.access = access;
        self
    }

    pub fn in_space(mut self, space: Space) -> Value {
        self.attrs.space = space;
        self
    }

    /// Narrow an array or string to `len` elements starting `start` elements
    /// into its current interval. Out-of-range requests are clamped.
    pub fn interval(mut self, start: u32, len: u32) -> Value {
        match &mut self.payload {
            Payload::Array(r) | Payload::PackedArray(r) => {
                let start = start.min(r.len);
                r.start += start;
                r.len = len.min(r.len - start);
            }
            Payload::String(s) => {
                let start = start.min(s.len);
                s.start += start;
                s.len = len.min(s.len - start);
            }
            _ => {}
        }
        self
    }

    /// The remainder of an array or string after skipping `skip` elements.
    pub fn tail_from(self, skip: u32) -> Value {
        let len = self.size().saturating_sub(skip);
        self.interval(skip, len)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = if self.attrs.executable { "x" } else { "" };
        match self.payload {
            Payload::Integer(i) => write!(f, "{}", i),
            Payload::Real(r) => write!(f, "{:?}", r),
            Payload::Boolean(b) => write!(f, "{}", b),
            Payload::Null => write!(f, "null{}", x),
            Payload::Mark => write!(f, "-mark-"),
            Payload::Name(n) if self.attrs.executable => write!(f, "name#{}", n.0),
            Payload::Name(n) => write!(f, "/name#{}", n.0),
            Payload::String(s) => write!(f, "string{}#{}[{}+{}]", x, s.id.0, s.start, s.len),
            Payload::Array(r) => write!(f, "array{}#{}[{}+{}]", x, r.id.0, r.start, r.len),
            Payload::PackedArray(r) => {
                write!(f, "packed{}#{}[{}+{}]", x, r.id.0, r.start, r.len)
            }
            Payload::Dict(d) => write!(f, "dict#{}", d.0),
            Payload::File(id) => write!(f, "file{}#{}", x, id.0),
            Payload::Operator { index, special } => match special {
                Some(op) => write!(f, "--{}--", op.name()),
                None => write!(f, "op#{}", index),
            },
            Payload::OpArray(index) => write!(f, "oparray#{}", index),
            Payload::FontId(id) => write!(f, "fontid#{}", id),
            Payload::Save(id) => write!(f, "save#{}", id),
            Payload::Struct(o) | Payload::AStruct(o) => write!(f, "-{}#{}-", o.type_name, o.id),
            Payload::Device(id) => write!(f, "device#{}", id),
        }
    }
}
