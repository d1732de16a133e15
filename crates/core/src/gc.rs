//! Mark-Compact Collector
//!
//! The interpreter only sees the handshake: [`Heap::reclaim`] takes a root set,
//! frees unreachable objects, slides survivors down in every arena, and
//! rewrites every handle it can reach, including the roots themselves.
//!
//! Anything holding a handle outside the root set (for example a dispatcher's
//! local copy of the current procedure) must either be passed in as a root or
//! be re-fetched afterwards.
//!
//! ## Scopes
//!
//! - [`ReclaimScope::All`]: everything unreachable is freed.
//! - [`ReclaimScope::Local`]: only local-space objects are candidates; global
//!   and system objects survive and are traced as extra roots.

use crate::heap::{ArrayBody, DictKey, Heap};
use crate::value::{ArrayId, ArrayRef, DictId, FileId, Payload, Space, StringId, Value};
use serde::Serialize;

/// Supplies and relocates the collector's roots.
pub trait Roots {
    /// Call `f` on every root value. Called twice: once to mark, once to
    /// relocate after compaction.
    fn visit(&mut self, f: &mut dyn FnMut(&mut Value));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimScope {
    Local,
    All,
}

/// Outcome of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    pub arrays_freed: usize,
    pub strings_freed: usize,
    pub dicts_freed: usize,
    pub files_freed: usize,
    pub live_objects: usize,
    pub bytes_reclaimable: usize,
}

impl GcStats {
    pub fn freed(&self) -> usize {
        self.arrays_freed + self.strings_freed + self.dicts_freed + self.files_freed
    }
}

const DEAD: u32 = u32::MAX;

struct Marks {
    arrays: Vec<bool>,
    strings: Vec<bool>,
    dicts: Vec<bool>,
    files: Vec<bool>,
}

struct Forwarding {
    arrays: Vec<u32>,
    strings: Vec<u32>,
    dicts: Vec<u32>,
    files: Vec<u32>,
}

fn forwarding(marks: &[bool]) -> Vec<u32> {
    let mut next = 0u32;
    marks
        .iter()
        .map(|&live| {
            if live {
                next += 1;
                next - 1
            } else {
                DEAD
            }
        })
        .collect()
}

fn compact<T>(items: &mut Vec<T>, marks: &[bool]) -> usize {
    let before = items.len();
    let mut i = 0;
    items.retain(|_| {
        i += 1;
        marks[i - 1]
    });
    before - items.len()
}

impl Forwarding {
    fn value(&self, v: &mut Value) {
        match &mut v.payload {
            Payload::Array(r) | Payload::PackedArray(r) => {
                r.id = ArrayId(self.arrays[r.id.0 as usize]);
            }
            Payload::String(s) => s.id = StringId(self.strings[s.id.0 as usize]),
            Payload::Dict(d) => *d = DictId(self.dicts[d.0 as usize]),
            Payload::File(f) => *f = FileId(self.files[f.0 as usize]),
            _ => {}
        }
    }

    fn key(&self, k: DictKey) -> DictKey {
        match k {
            DictKey::Array(id, start, len) => {
                DictKey::Array(ArrayId(self.arrays[id.0 as usize]), start, len)
            }
            DictKey::Dict(d) => DictKey::Dict(DictId(self.dicts[d.0 as usize])),
            DictKey::File(f) => DictKey::File(FileId(self.files[f.0 as usize])),
            other => other,
        }
    }
}

/// The value a composite dictionary key keeps alive.
fn key_referent(k: &DictKey) -> Option<Value> {
    match *k {
        DictKey::Array(id, start, len) => Some(Value::array(ArrayRef { id, start, len }, Space::Local)),
        DictKey::Dict(d) => Some(Value::dict(d, Space::Local)),
        DictKey::File(f) => Some(Value::file(f)),
        _ => None,
    }
}

impl Heap {
    fn mark_from(&self, marks: &mut Marks, work: &mut Vec<Value>) {
        while let Some(v) = work.pop() {
            match v.payload {
                Payload::Array(r) | Payload::PackedArray(r) => {
                    let i = r.id.0 as usize;
                    if !marks.arrays[i] {
                        marks.arrays[i] = true;
                        match &self.arrays[i].body {
                            ArrayBody::Plain(values) => work.extend_from_slice(values),
                            ArrayBody::Packed(p) => work.extend_from_slice(&p.full),
                        }
                    }
                }
                Payload::String(s) => marks.strings[s.id.0 as usize] = true,
                Payload::Dict(d) => {
                    let i = d.0 as usize;
                    if !marks.dicts[i] {
                        marks.dicts[i] = true;
                        for (k, v) in self.dicts[i].entries.iter() {
                            work.push(*v);
                            work.extend(key_referent(k));
                        }
                    }
                }
                Payload::File(f) => marks.files[f.0 as usize] = true,
                _ => {}
            }
        }
    }

    /// Collect garbage. Every handle reachable from `roots` or from surviving
    /// heap objects is rewritten to its object's new index.
    pub fn reclaim(&mut self, scope: ReclaimScope, roots: &mut dyn Roots) -> GcStats {
        let before = self.allocated_since_gc();
        let mut marks = Marks {
            arrays: vec![false; self.arrays.len()],
            strings: vec![false; self.strings.len()],
            dicts: vec![false; self.dicts.len()],
            files: vec![false; self.files.len()],
        };
        let mut work = Vec::new();
        roots.visit(&mut |v| work.push(*v));
        if scope == ReclaimScope::Local {
            for (i, a) in self.arrays.iter().enumerate() {
                if a.space != Space::Local {
                    let len = a.body.len() as u32;
                    let r = ArrayRef { id: ArrayId(i as u32), start: 0, len };
                    work.push(Value::array(r, a.space));
                }
            }
            for (i, s) in self.strings.iter().enumerate() {
                if s.space != Space::Local {
                    marks.strings[i] = true;
                }
            }
            for (i, d) in self.dicts.iter().enumerate() {
                if d.space != Space::Local {
                    work.push(Value::dict(DictId(i as u32), d.space));
                }
            }
        }
        self.mark_from(&mut marks, &mut work);

        let fwd = Forwarding {
            arrays: forwarding(&marks.arrays),
            strings: forwarding(&marks.strings),
            dicts: forwarding(&marks.dicts),
            files: forwarding(&marks.files),
        };
        let stats = GcStats {
            arrays_freed: compact(&mut self.arrays, &marks.arrays),
            strings_freed: compact(&mut self.strings, &marks.strings),
            dicts_freed: compact(&mut self.dicts, &marks.dicts),
            files_freed: compact(&mut self.files, &marks.files),
            live_objects: 0,
            bytes_reclaimable: before,
        };

        for a in &mut self.arrays {
            match &mut a.body {
                ArrayBody::Plain(values) => values.iter_mut().for_each(|v| fwd.value(v)),
                ArrayBody::Packed(p) => p.full.iter_mut().for_each(|v| fwd.value(v)),
            }
        }
        for d in &mut self.dicts {
            let entries = std::mem::take(&mut d.entries);
            d.entries = entries
                .into_iter()
                .map(|(k, mut v)| {
                    fwd.value(&mut v);
                    (fwd.key(k), v)
                })
                .collect();
            d.generation += 1;
        }
        roots.visit(&mut |v| fwd.value(v));
        self.reset_allocation_count();

        GcStats {
            live_objects: self.object_count(),
            ..stats
        }
    }
}
