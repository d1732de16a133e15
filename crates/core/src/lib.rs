//! psi Core: values, stacks and storage for a PostScript interpreter
//!
//! This crate holds the data model the interpreter loop runs on. It knows
//! nothing about operators or control flow; `psi-runtime` builds the
//! dispatcher and recovery driver on top of it.
//!
//! # Modules
//!
//! - `value`: the tagged, attributed `Value` and its handle types
//! - `packed`: 16-bit packed encoding of procedure elements
//! - `segstack`: block-segmented stacks with guard slots
//! - `heap`: arenas for arrays, strings, dictionaries and files
//! - `names`: the name table and its inline lookup cache
//! - `gc`: mark-compact collection and the root handshake
//! - `error`: interpreter error codes and their canonical names

pub mod error;
pub mod gc;
pub mod heap;
pub mod names;
pub mod packed;
pub mod segstack;
pub mod value;

pub use error::{ErrorCode, LANGUAGE_ERRORS};
pub use gc::{GcStats, ReclaimScope, Roots};
pub use heap::{ArrayBody, DictKey, Fetched, FileObj, Heap, check_store};
pub use names::{NameCache, NameTable};
pub use packed::{Packed, PackedBody, PackedShape};
pub use segstack::{SegStack, StackParams};
pub use value::{
    ALL_ACCESS, ArrayId, ArrayRef, Attrs, DictId, EXECUTE, FileId, Kind, NameIndex, OPARRAY_BASE,
    OpIndex, OpaqueRef, Payload, READ, Space, SpecialOp, StrRef, StringId, Value, WRITE,
};
