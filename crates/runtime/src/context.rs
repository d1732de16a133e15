//! Execution context
//!
//! A `Context` is one interpreter instance's complete state: the three stacks,
//! the heap, the name and operator tables, and the scheduling counters.
//! Operators receive `&mut Context` and nothing else.
//!
//! ## Stacks
//!
//! | Stack  | Element      | Overflow            | Underflow            |
//! |--------|--------------|---------------------|----------------------|
//! | ostack | `Value`      | `stackoverflow`     | `stackunderflow`     |
//! | estack | `ExecEntry`  | `execstackoverflow` | `%estack_underflow` runs |
//! | dstack | `Value`      | `dictstackoverflow` | `dictstackunderflow` |
//!
//! Operators never grow a stack themselves. They return the overflow error
//! before changing anything, and the recovery driver grows the stack and
//! re-runs them.
//!
//! ## Collection
//!
//! Allocation only *signals* a collection (by setting `ticks_left` to
//! [`GC_SIGNAL`]); the dispatcher notices at its next checkpoint and the
//! driver runs [`Context::reclaim`] with everything it holds passed as roots.
//! No heap handle held by an operator is ever invalidated mid-call.

use crate::color::ColorState;
use crate::config::{InterpConfig, MIN_DSTACK};
use crate::estack::ExecEntry;
use crate::operators::{OP_ESTACK_UNDERFLOW, OperatorTable};
use crate::scanner::{PsScanner, Scanner};
use crate::stats::InterpStats;
use psi_core::{
    DictId, DictKey, ErrorCode, GcStats, Heap, LANGUAGE_ERRORS, NameCache, NameIndex, NameTable,
    PackedBody, Payload, ReclaimScope, Roots, SegStack, Space, StackParams, Value, check_store,
};
use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::info;

/// `ticks_left` value that asks the next checkpoint to collect.
pub const GC_SIGNAL: i64 = -100;

/// The dictionaries every context is born with. Held as values so the
/// collector can relocate them.
#[derive(Debug, Clone, Copy)]
pub struct Permanent {
    pub systemdict: Value,
    pub userdict: Value,
    pub errordict: Value,
    pub dollar_error: Value,
}

pub struct Context {
    pub ostack: SegStack<Value>,
    pub estack: SegStack<ExecEntry>,
    pub dstack: SegStack<Value>,
    pub heap: Heap,
    pub names: NameTable,
    pub ops: OperatorTable,
    pub perm: Permanent,
    /// Dictionaries below this depth are never popped by `end`.
    pub min_dstack: usize,
    pub ticks_left: i64,
    pub quantum: i64,
    pub alloc_space: Space,
    pub packing: bool,
    /// Bumped whenever the dictionary stack changes; part of name cache validity.
    pub dstack_epoch: u64,
    pub reclaim_request: Option<ReclaimScope>,
    /// Collection is signalled automatically when the threshold is crossed.
    pub auto_reclaim: bool,
    /// Exit code reported when the run ends with `Quit`.
    pub quit_code: i32,
    pub interrupt: Arc<AtomicBool>,
    pub out: Box<dyn Write>,
    pub stats: InterpStats,
    pub color: ColorState,
    pub scanner: Rc<dyn Scanner>,
    pub config: InterpConfig,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("ostack", &self.ostack.count())
            .field("estack", &self.estack.count())
            .field("dstack", &self.dstack.count())
            .field("objects", &self.heap.object_count())
            .field("ticks_left", &self.ticks_left)
            .finish()
    }
}

fn stack_params<T: Copy>(
    block: usize,
    max: usize,
    overflow: ErrorCode,
    underflow: ErrorCode,
    filler: T,
) -> StackParams<T> {
    StackParams {
        block_size: block.min(max).max(1),
        guard_under: 1,
        guard_over: 0,
        max_count: max,
        overflow,
        underflow,
        allow_expansion: true,
        underflow_value: None,
        filler,
    }
}

impl Context {
    /// A context with output going to stdout.
    pub fn new(config: InterpConfig) -> Context {
        Context::with_output(config, Box::new(std::io::stdout()))
    }

    pub fn with_output(config: InterpConfig, out: Box<dyn Write>) -> Context {
        let ostack = SegStack::new(stack_params(
            config.ostack_block,
            config.max_ostack,
            ErrorCode::StackOverflow,
            ErrorCode::StackUnderflow,
            Value::NULL,
        ));
        let estack = SegStack::new(StackParams {
            // Two guard slots: popping the underflow entry itself stays in range.
            guard_under: 2,
            allow_expansion: config.estack_expansion,
            underflow_value: Some(ExecEntry::Value(Value::operator(OP_ESTACK_UNDERFLOW, None))),
            ..stack_params(
                config.estack_block,
                config.max_estack,
                ErrorCode::ExecStackOverflow,
                ErrorCode::ExecStackUnderflow,
                ExecEntry::Value(Value::NULL),
            )
        });
        let dstack = SegStack::new(stack_params(
            config.dstack_block,
            config.max_dstack,
            ErrorCode::DictStackOverflow,
            ErrorCode::DictStackUnderflow,
            Value::NULL,
        ));

        let mut heap = Heap::new();
        let perm = Permanent {
            systemdict: Value::dict(heap.alloc_dict(256, Space::Global), Space::Global),
            userdict: Value::dict(heap.alloc_dict(200, Space::Local), Space::Local),
            errordict: Value::dict(heap.alloc_dict(40, Space::Local), Space::Local),
            dollar_error: Value::dict(heap.alloc_dict(10, Space::Local), Space::Local),
        };

        let mut ctx = Context {
            ostack,
            estack,
            dstack,
            heap,
            names: NameTable::new(),
            ops: OperatorTable::with_builtins(),
            perm,
            min_dstack: MIN_DSTACK,
            ticks_left: config.time_slice,
            quantum: config.time_slice,
            alloc_space: Space::Local,
            packing: config.packing,
            dstack_epoch: 0,
            reclaim_request: None,
            auto_reclaim: true,
            quit_code: 0,
            interrupt: Arc::new(AtomicBool::new(false)),
            out,
            stats: InterpStats::default(),
            color: ColorState::default(),
            scanner: Rc::new(PsScanner),
            config,
        };
        ctx.populate_systemdict();
        if ctx.config.default_error_handlers {
            ctx.populate_errordict();
        }
        // Fresh stacks always have room for the permanent dictionaries.
        let _ = ctx.dstack.push(ctx.perm.systemdict);
        let _ = ctx.dstack.push(ctx.perm.userdict);
        ctx
    }

    fn populate_systemdict(&mut self) {
        let sys = self.systemdict();
        for (index, name) in self.ops.builtin_names() {
            if name.starts_with('%') {
                continue;
            }
            let value = self.ops.operator_value(index);
            let key = DictKey::Name(self.names.intern(name.as_bytes()));
            let _ = self.heap.dict_put(sys, key, value);
        }
        self.heap.set_dict_access(sys, psi_core::READ);
    }

    /// Install `[/errorname .error]` for every language error.
    fn populate_errordict(&mut self) {
        let Some(error_op) = self.ops.find(".error") else {
            return;
        };
        let error_value = self.ops.operator_value(error_op);
        let errordict = self.errordict();
        for code in LANGUAGE_ERRORS {
            let name = self.names.intern(code.name().as_bytes());
            let r = self
                .heap
                .alloc_array(vec![Value::name(name), error_value], Space::Local);
            let handler = Value::array(r, Space::Local).cvx();
            let _ = self.heap.dict_put(errordict, DictKey::Name(name), handler);
        }
    }

    // =========================================================================
    // Fixed dictionaries
    // =========================================================================

    pub fn systemdict(&self) -> DictId {
        self.perm.systemdict.as_dict().unwrap_or(DictId(0))
    }

    pub fn userdict(&self) -> DictId {
        self.perm.userdict.as_dict().unwrap_or(DictId(0))
    }

    pub fn errordict(&self) -> DictId {
        self.perm.errordict.as_dict().unwrap_or(DictId(0))
    }

    pub fn dollar_error(&self) -> DictId {
        self.perm.dollar_error.as_dict().unwrap_or(DictId(0))
    }

    /// Store into a dictionary regardless of its access, for setup code.
    pub fn force_put(&mut self, dict: DictId, key: DictKey, v: Value) -> Result<(), ErrorCode> {
        let access = self.heap.dict(dict).access;
        self.heap.set_dict_access(dict, psi_core::ALL_ACCESS);
        let result = self.heap.dict_put(dict, key, v);
        self.heap.set_dict_access(dict, access);
        result
    }

    // =========================================================================
    // Operands
    // =========================================================================

    pub fn push(&mut self, v: Value) -> Result<(), ErrorCode> {
        self.ostack.push(v)
    }

    pub fn pop(&mut self, n: usize) -> Result<(), ErrorCode> {
        self.ostack.pop(n)
    }

    /// At least `n` operands are present in the current block.
    pub fn check_ops(&self, n: usize) -> Result<(), ErrorCode> {
        self.ostack.check(n)
    }

    /// At least `n` operands are present across all blocks.
    ///
    /// Operators taking a counted run of operands use this instead of
    /// [`Context::check_ops`]; the run may be longer than a block.
    pub fn check_count(&self, n: usize) -> Result<(), ErrorCode> {
        if self.ostack.count() < n {
            Err(ErrorCode::StackUnderflow)
        } else {
            Ok(())
        }
    }

    /// Operand `i` down from the top, in any block. Call
    /// [`Context::check_ops`] or [`Context::check_count`] first.
    pub fn operand(&self, i: usize) -> Value {
        if i < self.ostack.count_in_block() {
            return self.ostack.peek(i);
        }
        self.ostack.index(i).unwrap_or(Value::NULL)
    }

    pub fn set_operand(&mut self, i: usize, v: Value) {
        if let Some(slot) = self.ostack.index_mut(i) {
            *slot = v;
        }
    }

    /// Fail unless `n` more operands fit, starting new blocks if needed.
    pub fn check_push_room(&mut self, n: usize) -> Result<(), ErrorCode> {
        if self.ostack.check_room(n).is_ok() {
            return Ok(());
        }
        if self.ostack.params().allow_expansion && self.ostack.count() + n <= self.ostack.max_count() {
            return Ok(());
        }
        Err(ErrorCode::StackOverflow)
    }

    /// Push `values` in order, starting a new block whenever one fills.
    /// Call [`Context::check_push_room`] first.
    pub fn push_all(&mut self, values: &[Value]) -> Result<(), ErrorCode> {
        for &v in values {
            if self.ostack.push(v).is_err() {
                self.ostack.extend(1)?;
                self.ostack.push(v)?;
            }
        }
        Ok(())
    }

    pub fn int_operand(&self, i: usize) -> Result<i64, ErrorCode> {
        self.operand(i).as_int().ok_or(ErrorCode::TypeCheck)
    }

    /// A number operand as a real.
    pub fn real_operand(&self, i: usize) -> Result<f64, ErrorCode> {
        match self.operand(i).payload {
            Payload::Integer(n) => Ok(n as f64),
            Payload::Real(r) => Ok(r),
            _ => Err(ErrorCode::TypeCheck),
        }
    }

    pub fn bool_operand(&self, i: usize) -> Result<bool, ErrorCode> {
        self.operand(i).as_bool().ok_or(ErrorCode::TypeCheck)
    }

    pub fn proc_operand(&self, i: usize) -> Result<Value, ErrorCode> {
        check_proc(self.operand(i))
    }

    pub fn dict_operand(&self, i: usize) -> Result<DictId, ErrorCode> {
        self.operand(i).as_dict().ok_or(ErrorCode::TypeCheck)
    }

    pub fn name_operand(&self, i: usize) -> Result<NameIndex, ErrorCode> {
        self.operand(i).as_name().ok_or(ErrorCode::TypeCheck)
    }

    /// Bytes of a string operand.
    pub fn string_operand(&self, i: usize) -> Result<Vec<u8>, ErrorCode> {
        match self.operand(i).payload {
            Payload::String(s) => Ok(self.heap.string_bytes(s).to_vec()),
            _ => Err(ErrorCode::TypeCheck),
        }
    }

    // =========================================================================
    // Dictionary stack
    // =========================================================================

    pub fn current_dict(&self) -> DictId {
        self.dstack
            .top()
            .and_then(|d| d.as_dict())
            .unwrap_or_else(|| self.userdict())
    }

    /// Resolve a name through the dictionary stack, using the inline cache.
    pub fn lookup_name(&mut self, n: NameIndex) -> Option<Value> {
        self.stats.name_lookups += 1;
        if let Some(v) = self.names.cached(n, &self.heap, self.dstack_epoch) {
            self.stats.cache_hits += 1;
            return Some(v);
        }
        self.stats.cache_misses += 1;
        let (dict, value) = self.lookup_key(&DictKey::Name(n))?;
        self.names.fill_cache(
            n,
            NameCache {
                value,
                dict,
                dict_generation: self.heap.dict_generation(dict),
                key_epoch: self.heap.key_epoch(),
                dstack_epoch: self.dstack_epoch,
            },
        );
        Some(value)
    }

    /// Full dictionary-stack search, top down.
    pub fn lookup_key(&self, key: &DictKey) -> Option<(DictId, Value)> {
        self.dstack
            .iter_from_top()
            .filter_map(|d| d.as_dict())
            .find_map(|d| self.heap.dict_get(d, key).map(|v| (d, v)))
    }

    /// Look up a name by its text.
    pub fn lookup_text(&mut self, text: &str) -> Option<Value> {
        let n = self.names.lookup(text.as_bytes())?;
        self.lookup_name(n)
    }

    /// Associate `key` with `v` in the current dictionary.
    pub fn def(&mut self, key: Value, v: Value) -> Result<(), ErrorCode> {
        let key = self.heap.dict_key(&mut self.names, &key)?;
        let dict = self.current_dict();
        self.heap.dict_put(dict, key, v)
    }

    pub fn begin(&mut self, dict: Value) -> Result<(), ErrorCode> {
        if dict.as_dict().is_none() {
            return Err(ErrorCode::TypeCheck);
        }
        self.dstack.push(dict)?;
        self.dstack_epoch += 1;
        Ok(())
    }

    pub fn end(&mut self) -> Result<(), ErrorCode> {
        if self.dstack.count() <= self.min_dstack {
            return Err(ErrorCode::DictStackUnderflow);
        }
        self.dstack.pop(1)?;
        self.dstack_epoch += 1;
        Ok(())
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    fn note_allocation(&mut self) {
        if self.auto_reclaim
            && self.heap.allocated_since_gc() >= self.config.vm_threshold
            && self.ticks_left > GC_SIGNAL
        {
            self.ticks_left = GC_SIGNAL;
        }
    }

    /// A literal array in the current allocation space.
    pub fn alloc_array(&mut self, values: Vec<Value>) -> Result<Value, ErrorCode> {
        let space = self.alloc_space;
        for v in &values {
            check_store(space, v)?;
        }
        let r = self.heap.alloc_array(values, space);
        self.note_allocation();
        Ok(Value::array(r, space))
    }

    /// A packed array; fails with `limitcheck` if the body cannot be packed.
    pub fn alloc_packed(&mut self, values: Vec<Value>) -> Result<Value, ErrorCode> {
        let space = self.alloc_space;
        for v in &values {
            check_store(space, v)?;
        }
        let body = PackedBody::pack(&values).ok_or(ErrorCode::LimitCheck)?;
        let r = self.heap.alloc_packed(body, space);
        self.note_allocation();
        Ok(Value::packed_array(r, space))
    }

    /// An executable array, packed when packing is on.
    pub fn alloc_proc(&mut self, values: Vec<Value>) -> Result<Value, ErrorCode> {
        if self.packing {
            if let Ok(v) = self.alloc_packed(values.clone()) {
                return Ok(v.cvx());
            }
        }
        Ok(self.alloc_array(values)?.cvx())
    }

    pub fn alloc_string(&mut self, bytes: Vec<u8>) -> Value {
        let space = self.alloc_space;
        let r = self.heap.alloc_string(bytes, space);
        self.note_allocation();
        Value::string(r, space)
    }

    pub fn alloc_dict(&mut self, capacity: usize) -> Value {
        let space = self.alloc_space;
        let id = self.heap.alloc_dict(capacity, space);
        self.note_allocation();
        Value::dict(id, space)
    }

    /// Collect garbage. `extra` holds values the caller keeps outside the
    /// context; they are relocated in place.
    pub fn reclaim(&mut self, scope: ReclaimScope, extra: &mut [Value]) -> GcStats {
        let mut roots = ContextRoots {
            ostack: &mut self.ostack,
            estack: &mut self.estack,
            dstack: &mut self.dstack,
            perm: &mut self.perm,
            ops: &mut self.ops,
            extra,
        };
        let stats = self.heap.reclaim(scope, &mut roots);
        self.names.clear_caches();
        self.stats.collections += 1;
        self.stats.objects_freed += stats.freed() as u64;
        info!(
            scope = ?scope,
            freed = stats.freed(),
            live = stats.live_objects,
            "collection finished"
        );
        stats
    }

    /// Text of an operator value's name.
    pub fn operator_name(&self, v: &Value) -> Option<String> {
        match v.payload {
            Payload::Operator { index, .. } => self.ops.def(index).map(|d| d.name.to_string()),
            Payload::OpArray(index) => self.ops.oparray(index).map(|o| self.names.display(o.name)),
            _ => None,
        }
    }
}

/// Check that `v` may be executed as a procedure.
pub fn check_proc(v: Value) -> Result<Value, ErrorCode> {
    if v.array_ref().is_none() || !v.is_executable() {
        Err(ErrorCode::TypeCheck)
    } else if !v.has_access(psi_core::EXECUTE) {
        Err(ErrorCode::InvalidAccess)
    } else {
        Ok(v)
    }
}

struct ContextRoots<'a> {
    ostack: &'a mut SegStack<Value>,
    estack: &'a mut SegStack<ExecEntry>,
    dstack: &'a mut SegStack<Value>,
    perm: &'a mut Permanent,
    ops: &'a mut OperatorTable,
    extra: &'a mut [Value],
}

impl Roots for ContextRoots<'_> {
    fn visit(&mut self, f: &mut dyn FnMut(&mut Value)) {
        self.ostack.for_each_mut(|v| f(v));
        self.estack.for_each_mut(|e| {
            if let ExecEntry::Value(v) = e {
                f(v)
            }
        });
        self.dstack.for_each_mut(|v| f(v));
        f(&mut self.perm.systemdict);
        f(&mut self.perm.userdict);
        f(&mut self.perm.errordict);
        f(&mut self.perm.dollar_error);
        for body in self.ops.oparray_bodies_mut() {
            f(body);
        }
        self.extra.iter_mut().for_each(|v| f(v));
    }
}
