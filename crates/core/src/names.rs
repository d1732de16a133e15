//! Name Table
//!
//! Interns byte strings as dense [`NameIndex`] values and carries, per name, an
//! inline lookup cache for the dispatcher.
//!
//! ## Cache validity
//!
//! A cache entry records where the name was last found and three stamps:
//!
//! | Stamp            | Changes when                                        |
//! |------------------|-----------------------------------------------------|
//! | `dict_generation`| the owning dictionary is stored into                |
//! | `key_epoch`      | any dictionary gains or loses a key                 |
//! | `dstack_epoch`   | a dictionary is pushed onto or popped off the stack |
//!
//! The entry is used only when all three still match; otherwise the caller
//! performs a full dictionary-stack search and refills the entry. Collection
//! clears every entry because dictionary indices move.

use crate::heap::Heap;
use crate::value::{DictId, NameIndex, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NameCache {
    pub value: Value,
    pub dict: DictId,
    pub dict_generation: u64,
    pub key_epoch: u64,
    pub dstack_epoch: u64,
}

#[derive(Debug, Clone)]
struct NameEntry {
    text: Box<[u8]>,
    cache: Option<NameCache>,
}

#[derive(Debug, Clone, Default)]
pub struct NameTable {
    entries: Vec<NameEntry>,
    index: HashMap<Box<[u8]>, NameIndex>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, text: &[u8]) -> NameIndex {
        if let Some(&idx) = self.index.get(text) {
            return idx;
        }
        let idx = NameIndex(self.entries.len() as u32);
        let text: Box<[u8]> = text.into();
        self.entries.push(NameEntry {
            text: text.clone(),
            cache: None,
        });
        self.index.insert(text, idx);
        idx
    }

    pub fn lookup(&self, text: &[u8]) -> Option<NameIndex> {
        self.index.get(text).copied()
    }

    pub fn text(&self, idx: NameIndex) -> &[u8] {
        self.entries
            .get(idx.0 as usize)
            .map(|e| &*e.text)
            .unwrap_or(b"")
    }

    /// Name text for diagnostics.
    pub fn display(&self, idx: NameIndex) -> String {
        String::from_utf8_lossy(self.text(idx)).into_owned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The cached binding of `idx`, if it is still valid.
    pub fn cached(&self, idx: NameIndex, heap: &Heap, dstack_epoch: u64) -> Option<Value> {
        let c = self.entries.get(idx.0 as usize)?.cache?;
        if c.dstack_epoch == dstack_epoch
            && c.key_epoch == heap.key_epoch()
            && c.dict_generation == heap.dict_generation(c.dict)
        {
            Some(c.value)
        } else {
            None
        }
    }

    pub fn fill_cache(&mut self, idx: NameIndex, cache: NameCache) {
        if let Some(e) = self.entries.get_mut(idx.0 as usize) {
            e.cache = Some(cache);
        }
    }

    pub fn clear_caches(&mut self) {
        for e in &mut self.entries {
            e.cache = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Space;

    #[test]
    fn test_intern_is_stable() {
        let mut names = NameTable::new();
        let a = names.intern(b"moveto");
        let b = names.intern(b"lineto");
        assert_ne!(a, b);
        assert_eq!(names.intern(b"moveto"), a);
        assert_eq!(names.text(b), b"lineto");
        assert_eq!(names.lookup(b"nope"), None);
    }

    #[test]
    fn test_cache_invalidated_by_store() {
        let mut heap = Heap::new();
        let mut names = NameTable::new();
        let d = heap.alloc_dict(4, Space::Local);
        let n = names.intern(b"x");
        let k = crate::heap::DictKey::Name(n);
        heap.dict_put(d, k, Value::integer(1)).unwrap();
        names.fill_cache(
            n,
            NameCache {
                value: Value::integer(1),
                dict: d,
                dict_generation: heap.dict_generation(d),
                key_epoch: heap.key_epoch(),
                dstack_epoch: 0,
            },
        );
        assert_eq!(names.cached(n, &heap, 0), Some(Value::integer(1)));
        assert_eq!(names.cached(n, &heap, 1), None);
        heap.dict_put(d, k, Value::integer(2)).unwrap();
        assert_eq!(names.cached(n, &heap, 0), None);
    }

    #[test]
    fn test_cache_invalidated_by_new_key_elsewhere() {
        let mut heap = Heap::new();
        let mut names = NameTable::new();
        let d1 = heap.alloc_dict(4, Space::Local);
        let d2 = heap.alloc_dict(4, Space::Local);
        let n = names.intern(b"x");
        heap.dict_put(d1, crate::heap::DictKey::Name(n), Value::integer(1))
            .unwrap();
        names.fill_cache(
            n,
            NameCache {
                value: Value::integer(1),
                dict: d1,
                dict_generation: heap.dict_generation(d1),
                key_epoch: heap.key_epoch(),
                dstack_epoch: 0,
            },
        );
        heap.dict_put(d2, crate::heap::DictKey::Name(n), Value::integer(2))
            .unwrap();
        assert_eq!(names.cached(n, &heap, 0), None);
        names.clear_caches();
        assert_eq!(names.cached(n, &heap, 0), None);
    }
}
