//! Heap Storage
//!
//! Arenas for everything a [`Value`] can refer to: array bodies (plain or
//! packed), string bytes, dictionaries and files. Values hold typed indices
//! into these arenas; the collector in [`crate::gc`] compacts the arenas and
//! rewrites the indices.
//!
//! ## Dictionary generations
//!
//! Name lookups are cached in the name table (see [`crate::names`]). Two
//! counters keep those caches honest:
//!
//! - every dictionary has a `generation`, bumped on every store into it;
//! - the heap has a `key_epoch`, bumped whenever any dictionary gains or loses
//!   a key (a new key may shadow a cached binding further down the stack).

use crate::error::ErrorCode;
use crate::names::NameTable;
use crate::packed::{Packed, PackedBody};
use crate::value::{
    ALL_ACCESS, ArrayId, ArrayRef, DictId, FileId, NameIndex, OpIndex, Payload, READ, Space,
    StrRef, StringId, Value,
};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;

// =============================================================================
// Objects
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayBody {
    Plain(Vec<Value>),
    Packed(PackedBody),
}

impl ArrayBody {
    pub fn len(&self) -> usize {
        match self {
            ArrayBody::Plain(v) => v.len(),
            ArrayBody::Packed(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct ArrayObj {
    pub space: Space,
    pub body: ArrayBody,
}

#[derive(Debug, Clone)]
pub struct StringObj {
    pub space: Space,
    pub bytes: Vec<u8>,
}

/// Dictionary key: the identity under which a value is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DictKey {
    Name(NameIndex),
    Integer(i64),
    Real(u64),
    Boolean(bool),
    Array(ArrayId, u32, u32),
    Dict(DictId),
    File(FileId),
    Operator(OpIndex),
    Other(u8, u32),
}

#[derive(Debug, Clone)]
pub struct DictObj {
    pub space: Space,
    pub access: u8,
    pub max_len: usize,
    pub generation: u64,
    pub(crate) entries: HashMap<DictKey, Value>,
}

impl DictObj {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DictKey, &Value)> {
        self.entries.iter()
    }
}

/// A byte source consumed by the scanner.
///
/// Data is pulled from `source` in `chunk`-sized reads; `window()` exposes the
/// unread part of what has been pulled so far.
pub struct FileObj {
    pub name: String,
    buf: Vec<u8>,
    pos: usize,
    source: Option<Box<dyn Read>>,
    chunk: usize,
    closed: bool,
}

impl fmt::Debug for FileObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileObj")
            .field("name", &self.name)
            .field("buffered", &(self.buf.len() - self.pos))
            .field("has_source", &self.source.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl FileObj {
    /// A file whose whole content is already in memory.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        FileObj {
            name: name.into(),
            buf: bytes,
            pos: 0,
            source: None,
            chunk: 0,
            closed: false,
        }
    }

    /// A file that reads `chunk` bytes at a time from `reader`.
    pub fn from_reader(name: impl Into<String>, reader: Box<dyn Read>, chunk: usize) -> Self {
        FileObj {
            name: name.into(),
            buf: Vec::new(),
            pos: 0,
            source: Some(reader),
            chunk: chunk.max(1),
            closed: false,
        }
    }

    /// Unread buffered bytes.
    pub fn window(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    /// No more data will ever arrive beyond the current window.
    pub fn at_eof(&self) -> bool {
        self.closed || self.source.is_none()
    }

    /// Pull the next chunk from the source. Returns the number of bytes added;
    /// zero means the source is exhausted (and is then dropped).
    pub fn fill(&mut self) -> std::io::Result<usize> {
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };
        if self.pos > 0 && self.pos * 2 >= self.buf.len() {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        let old = self.buf.len();
        self.buf.resize(old + self.chunk, 0);
        let n = match source.read(&mut self.buf[old..]) {
            Ok(n) => n,
            Err(e) => {
                self.buf.truncate(old);
                return Err(e);
            }
        };
        self.buf.truncate(old + n);
        if n == 0 {
            self.source = None;
        }
        Ok(n)
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.source = None;
        self.buf.clear();
        self.pos = 0;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn take_buffer(&mut self) -> (Vec<u8>, usize) {
        (std::mem::take(&mut self.buf), self.pos)
    }

    pub(crate) fn restore_buffer(&mut self, buf: Vec<u8>) {
        self.buf = buf;
    }
}

// =============================================================================
// Heap
// =============================================================================

/// Composite values must not be stored into objects of a more global space.
pub fn check_store(container: Space, v: &Value) -> Result<(), ErrorCode> {
    let composite = matches!(
        v.payload,
        Payload::String(_) | Payload::Array(_) | Payload::PackedArray(_) | Payload::Dict(_)
    );
    if composite && !v.space().storable_in(container) {
        Err(ErrorCode::InvalidAccess)
    } else {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Heap {
    pub(crate) arrays: Vec<ArrayObj>,
    pub(crate) strings: Vec<StringObj>,
    pub(crate) dicts: Vec<DictObj>,
    pub(crate) files: Vec<FileObj>,
    key_epoch: u64,
    allocated_since_gc: usize,
    total_allocated: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes allocated since the last collection.
    pub fn allocated_since_gc(&self) -> usize {
        self.allocated_since_gc
    }

    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }

    pub(crate) fn reset_allocation_count(&mut self) {
        self.allocated_since_gc = 0;
    }

    fn charge(&mut self, bytes: usize) {
        self.allocated_since_gc += bytes;
        self.total_allocated += bytes;
    }

    pub fn key_epoch(&self) -> u64 {
        self.key_epoch
    }

    /// Number of live objects across all arenas.
    pub fn object_count(&self) -> usize {
        self.arrays.len() + self.strings.len() + self.dicts.len() + self.files.len()
    }

    // -------------------------------------------------------------------------
    // Arrays
    // -------------------------------------------------------------------------

    pub fn alloc_array(&mut self, values: Vec<Value>, space: Space) -> ArrayRef {
        self.charge(values.len() * std::mem::size_of::<Value>());
        let len = values.len() as u32;
        let id = ArrayId(self.arrays.len() as u32);
        self.arrays.push(ArrayObj {
            space,
            body: ArrayBody::Plain(values),
        });
        ArrayRef { id, start: 0, len }
    }

    pub fn alloc_packed(&mut self, body: PackedBody, space: Space) -> ArrayRef {
        self.charge(
            body.slots.len() * std::mem::size_of::<Packed>()
                + body.full.len() * std::mem::size_of::<Value>(),
        );
        let len = body.len() as u32;
        let id = ArrayId(self.arrays.len() as u32);
        self.arrays.push(ArrayObj {
            space,
            body: ArrayBody::Packed(body),
        });
        ArrayRef { id, start: 0, len }
    }

    pub fn array(&self, id: ArrayId) -> &ArrayObj {
        &self.arrays[id.0 as usize]
    }

    /// Raw element at absolute index `abs` of array `id`.
    pub fn fetch(&self, id: ArrayId, abs: u32) -> Fetched {
        match &self.arrays[id.0 as usize].body {
            ArrayBody::Plain(v) => Fetched::Plain(v[abs as usize]),
            ArrayBody::Packed(p) => Fetched::Packed(p.slots[abs as usize]),
        }
    }

    /// Escaped element `i` of packed array `id`.
    pub fn packed_full(&self, id: ArrayId, i: u16) -> Value {
        match &self.arrays[id.0 as usize].body {
            ArrayBody::Packed(p) => p.full.get(i as usize).copied().unwrap_or(Value::NULL),
            ArrayBody::Plain(_) => Value::NULL,
        }
    }

    /// Element `i` of the interval `r`.
    pub fn array_get(&self, r: ArrayRef, i: u32) -> Option<Value> {
        if i >= r.len {
            return None;
        }
        let abs = (r.start + i) as usize;
        match &self.arrays[r.id.0 as usize].body {
            ArrayBody::Plain(v) => v.get(abs).copied(),
            ArrayBody::Packed(p) => p.get(abs),
        }
    }

    pub fn array_put(&mut self, r: ArrayRef, i: u32, v: Value) -> Result<(), ErrorCode> {
        if i >= r.len {
            return Err(ErrorCode::RangeCheck);
        }
        let obj = &mut self.arrays[r.id.0 as usize];
        check_store(obj.space, &v)?;
        match &mut obj.body {
            ArrayBody::Plain(body) => {
                body[(r.start + i) as usize] = v;
                Ok(())
            }
            ArrayBody::Packed(_) => Err(ErrorCode::InvalidAccess),
        }
    }

    /// Expand the interval `r` to plain values.
    pub fn array_values(&self, r: ArrayRef) -> Vec<Value> {
        (0..r.len).filter_map(|i| self.array_get(r, i)).collect()
    }

    // -------------------------------------------------------------------------
    // Strings
    // -------------------------------------------------------------------------

    pub fn alloc_string(&mut self, bytes: Vec<u8>, space: Space) -> StrRef {
        self.charge(bytes.len());
        let len = bytes.len() as u32;
        let id = StringId(self.strings.len() as u32);
        self.strings.push(StringObj { space, bytes });
        StrRef { id, start: 0, len }
    }

    pub fn string_bytes(&self, r: StrRef) -> &[u8] {
        let bytes = &self.strings[r.id.0 as usize].bytes;
        let start = (r.start as usize).min(bytes.len());
        let end = (start + r.len as usize).min(bytes.len());
        &bytes[start..end]
    }

    pub fn string_bytes_mut(&mut self, r: StrRef) -> &mut [u8] {
        let bytes = &mut self.strings[r.id.0 as usize].bytes;
        let start = (r.start as usize).min(bytes.len());
        let end = (start + r.len as usize).min(bytes.len());
        &mut bytes[start..end]
    }

    /// Detach a string's storage so it can be read while the heap is mutated.
    /// Must be paired with [`Heap::restore_string`].
    pub fn take_string(&mut self, id: StringId) -> Vec<u8> {
        std::mem::take(&mut self.strings[id.0 as usize].bytes)
    }

    pub fn restore_string(&mut self, id: StringId, bytes: Vec<u8>) {
        self.strings[id.0 as usize].bytes = bytes;
    }

    // -------------------------------------------------------------------------
    // Dictionaries
    // -------------------------------------------------------------------------

    pub fn alloc_dict(&mut self, capacity: usize, space: Space) -> DictId {
        self.charge(capacity * 2 * std::mem::size_of::<Value>());
        let id = DictId(self.dicts.len() as u32);
        self.dicts.push(DictObj {
            space,
            access: ALL_ACCESS,
            max_len: capacity,
            generation: 0,
            entries: HashMap::with_capacity(capacity),
        });
        id
    }

    pub fn dict(&self, id: DictId) -> &DictObj {
        &self.dicts[id.0 as usize]
    }

    pub fn dict_generation(&self, id: DictId) -> u64 {
        self.dicts[id.0 as usize].generation
    }

    pub fn set_dict_access(&mut self, id: DictId, access: u8) {
        self.dicts[id.0 as usize].access = access;
    }

    /// Normalise a value into a dictionary key. Strings are interned as names
    /// and integral reals collapse onto integers.
    pub fn dict_key(&self, names: &mut NameTable, key: &Value) -> Result<DictKey, ErrorCode> {
        Ok(match key.payload {
            Payload::Name(n) => DictKey::Name(n),
            Payload::String(s) => DictKey::Name(names.intern(self.string_bytes(s))),
            Payload::Integer(i) => DictKey::Integer(i),
            Payload::Real(r) if r.fract() == 0.0 && r.abs() < 9.0e15 => DictKey::Integer(r as i64),
            Payload::Real(r) => DictKey::Real(r.to_bits()),
            Payload::Boolean(b) => DictKey::Boolean(b),
            Payload::Array(a) | Payload::PackedArray(a) => DictKey::Array(a.id, a.start, a.len),
            Payload::Dict(d) => DictKey::Dict(d),
            Payload::File(f) => DictKey::File(f),
            Payload::Operator { index, .. } | Payload::OpArray(index) => DictKey::Operator(index),
            Payload::Mark => DictKey::Other(0, 0),
            Payload::FontId(i) => DictKey::Other(1, i),
            Payload::Save(i) => DictKey::Other(2, i),
            Payload::Device(i) => DictKey::Other(3, i),
            Payload::Struct(o) | Payload::AStruct(o) => DictKey::Other(4, o.id),
            Payload::Null => return Err(ErrorCode::TypeCheck),
        })
    }

    pub fn dict_get(&self, id: DictId, key: &DictKey) -> Option<Value> {
        self.dicts[id.0 as usize].entries.get(key).copied()
    }

    pub fn dict_put(&mut self, id: DictId, key: DictKey, v: Value) -> Result<(), ErrorCode> {
        let dict = &mut self.dicts[id.0 as usize];
        if dict.access & crate::value::WRITE == 0 {
            return Err(ErrorCode::InvalidAccess);
        }
        check_store(dict.space, &v)?;
        dict.generation += 1;
        if dict.entries.insert(key, v).is_none() {
            dict.max_len = dict.max_len.max(dict.entries.len());
            self.key_epoch += 1;
            self.charge(2 * std::mem::size_of::<Value>());
        }
        Ok(())
    }

    pub fn dict_undef(&mut self, id: DictId, key: &DictKey) -> Result<bool, ErrorCode> {
        let dict = &mut self.dicts[id.0 as usize];
        if dict.access & crate::value::WRITE == 0 {
            return Err(ErrorCode::InvalidAccess);
        }
        let removed = dict.entries.remove(key).is_some();
        if removed {
            dict.generation += 1;
            self.key_epoch += 1;
        }
        Ok(removed)
    }

    pub fn dict_readable(&self, id: DictId) -> bool {
        self.dicts[id.0 as usize].access & READ != 0
    }

    // -------------------------------------------------------------------------
    // Files
    // -------------------------------------------------------------------------

    pub fn alloc_file(&mut self, file: FileObj) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.files.push(file);
        id
    }

    pub fn file(&self, id: FileId) -> &FileObj {
        &self.files[id.0 as usize]
    }

    pub fn file_mut(&mut self, id: FileId) -> &mut FileObj {
        &mut self.files[id.0 as usize]
    }

    /// Detach a file's buffer; returns it with the read position.
    /// Must be paired with [`Heap::restore_file_buffer`].
    pub fn take_file_buffer(&mut self, id: FileId) -> (Vec<u8>, usize) {
        self.files[id.0 as usize].take_buffer()
    }

    pub fn restore_file_buffer(&mut self, id: FileId, buf: Vec<u8>) {
        self.files[id.0 as usize].restore_buffer(buf);
    }
}

/// A raw array element as stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fetched {
    Plain(Value),
    Packed(Packed),
}
