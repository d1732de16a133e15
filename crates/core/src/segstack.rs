//! Segmented Stack
//!
//! A growable stack made of fixed-capacity blocks. Only the current block is
//! addressable by raw index; lower blocks are saved whole and brought back
//! with [`SegStack::pop_block`].
//!
//! ## Block Layout
//!
//! ```text
//!   index:  0 .. bot-1      bot ............ top      top+1 .. end
//!         ┌──────────────┬──────────────────────────┬──────────────┐
//!         │ guard-under  │ block_size element slots │ guard-over   │
//!         └──────────────┴──────────────────────────┴──────────────┘
//!                      ↑ p == bot-1 when the block is empty
//! ```
//!
//! The top index `p` points at the topmost element. Overflow is a single
//! comparison against `top`, underflow a single comparison against `bot`.
//! The dispatcher mirrors `p` in a local and writes it back with
//! [`SegStack::set_pointer`] before calling out.
//!
//! The execution stack stores its *underflow value* in the last guard-under
//! slot, so draining a block makes the dispatcher execute that value instead of
//! testing for emptiness on every pop.

use crate::error::ErrorCode;

/// Construction parameters for a [`SegStack`].
#[derive(Debug, Clone, Copy)]
pub struct StackParams<T> {
    /// Element slots per block.
    pub block_size: usize,
    /// Reserved slots below the block (at least 1).
    pub guard_under: usize,
    /// Reserved slots above the block.
    pub guard_over: usize,
    /// Maximum elements across all blocks.
    pub max_count: usize,
    /// Error raised when a block or the whole stack is full.
    pub overflow: ErrorCode,
    /// Error raised when operands are missing.
    pub underflow: ErrorCode,
    /// Whether [`SegStack::extend`] may add blocks.
    pub allow_expansion: bool,
    /// Value planted in the guard-under slot.
    pub underflow_value: Option<T>,
    /// Value for unused slots.
    pub filler: T,
}

#[derive(Debug, Clone)]
pub struct SegStack<T: Copy> {
    body: Vec<T>,
    p: usize,
    bot: usize,
    top: usize,
    lower: Vec<Vec<T>>,
    lower_count: usize,
    requested: usize,
    params: StackParams<T>,
}

impl<T: Copy> SegStack<T> {
    pub fn new(params: StackParams<T>) -> Self {
        let guard_under = params.guard_under.max(1);
        let block_size = params.block_size.max(1);
        let mut body = vec![params.filler; guard_under + block_size + params.guard_over];
        let bot = guard_under;
        if let Some(u) = params.underflow_value {
            body[bot - 1] = u;
        }
        SegStack {
            body,
            p: bot - 1,
            bot,
            top: bot + block_size - 1,
            lower: Vec::new(),
            lower_count: 0,
            requested: 0,
            params: StackParams {
                guard_under,
                block_size,
                ..params
            },
        }
    }

    pub fn params(&self) -> &StackParams<T> {
        &self.params
    }

    /// Raw index of the top element (`bot() - 1` when the block is empty).
    pub fn pointer(&self) -> usize {
        self.p
    }

    /// Write back a locally mirrored top index. Values below `bot() - 1`
    /// (a popped guard) are clamped to empty.
    pub fn set_pointer(&mut self, p: usize) {
        self.p = p.clamp(self.bot - 1, self.top);
    }

    /// Raw index of the first element slot.
    pub fn bot(&self) -> usize {
        self.bot
    }

    /// Raw index of the last element slot.
    pub fn top_limit(&self) -> usize {
        self.top
    }

    /// Element at raw index `i`, including guard slots.
    pub fn at(&self, i: usize) -> T {
        self.body[i]
    }

    pub fn set_at(&mut self, i: usize, v: T) {
        self.body[i] = v;
    }

    pub fn count_in_block(&self) -> usize {
        (self.p + 1).saturating_sub(self.bot)
    }

    pub fn count(&self) -> usize {
        self.lower_count + self.count_in_block()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn has_lower_block(&self) -> bool {
        !self.lower.is_empty()
    }

    pub fn max_count(&self) -> usize {
        self.params.max_count
    }

    pub fn set_max_count(&mut self, max: usize) {
        self.params.max_count = max.max(self.count());
    }

    pub fn set_allow_expansion(&mut self, allow: bool) {
        self.params.allow_expansion = allow;
    }

    /// Slots asked for by the last failed push or room check.
    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn set_requested(&mut self, n: usize) {
        self.requested = n;
    }

    // =========================================================================
    // Checked access within the current block
    // =========================================================================

    pub fn push(&mut self, v: T) -> Result<(), ErrorCode> {
        if self.p >= self.top {
            self.requested = 1;
            return Err(self.params.overflow);
        }
        self.p += 1;
        self.body[self.p] = v;
        Ok(())
    }

    /// At least `n` elements are addressable in the current block.
    pub fn check(&self, n: usize) -> Result<(), ErrorCode> {
        if self.count_in_block() < n {
            Err(self.params.underflow)
        } else {
            Ok(())
        }
    }

    /// At least `n` free slots remain in the current block.
    pub fn check_room(&mut self, n: usize) -> Result<(), ErrorCode> {
        if self.p + n > self.top {
            self.requested = n;
            Err(self.params.overflow)
        } else {
            Ok(())
        }
    }

    /// Element `i` down from the top, within the current block.
    pub fn peek(&self, i: usize) -> T {
        self.body[self.p - i]
    }

    pub fn poke(&mut self, i: usize, v: T) {
        let at = self.p - i;
        self.body[at] = v;
    }

    // =========================================================================
    // Whole-stack access
    // =========================================================================

    /// Element `i` down from the top, across blocks.
    pub fn index(&self, i: usize) -> Option<T> {
        let in_block = self.count_in_block();
        if i < in_block {
            return Some(self.body[self.p - i]);
        }
        let mut i = i - in_block;
        for block in self.lower.iter().rev() {
            if i < block.len() {
                return Some(block[block.len() - 1 - i]);
            }
            i -= block.len();
        }
        None
    }

    pub fn index_mut(&mut self, i: usize) -> Option<&mut T> {
        let in_block = self.count_in_block();
        if i < in_block {
            let at = self.p - i;
            return Some(&mut self.body[at]);
        }
        let mut i = i - in_block;
        for block in self.lower.iter_mut().rev() {
            let len = block.len();
            if i < len {
                return Some(&mut block[len - 1 - i]);
            }
            i -= len;
        }
        None
    }

    /// Topmost element anywhere in the stack.
    pub fn top(&self) -> Option<T> {
        self.index(0)
    }

    /// Pop `n` elements, crossing block boundaries as needed.
    pub fn pop(&mut self, n: usize) -> Result<(), ErrorCode> {
        if n > self.count() {
            return Err(self.params.underflow);
        }
        let mut n = n;
        loop {
            let in_block = self.count_in_block();
            if n <= in_block {
                self.p -= n;
                return Ok(());
            }
            n -= in_block;
            self.p = self.bot - 1;
            self.pop_block()?;
        }
    }

    /// Pop down to `depth` elements. Does nothing if already at or below it.
    pub fn pop_to(&mut self, depth: usize) {
        let count = self.count();
        if count > depth {
            // Cannot fail: `count - depth` elements exist.
            let _ = self.pop(count - depth);
        }
    }

    pub fn clear(&mut self) {
        self.lower.clear();
        self.lower_count = 0;
        self.p = self.bot - 1;
    }

    /// Iterate from the top element down to the bottom one.
    pub fn iter_from_top(&self) -> impl Iterator<Item = T> + '_ {
        self.body[self.bot..self.p + 1]
            .iter()
            .rev()
            .chain(self.lower.iter().rev().flat_map(|b| b.iter().rev()))
            .copied()
    }

    /// All elements, bottom first.
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.count());
        for block in &self.lower {
            out.extend_from_slice(block);
        }
        out.extend_from_slice(&self.body[self.bot..self.p + 1]);
        out
    }

    /// Visit every live element (used to relocate collector roots).
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut T)) {
        for block in &mut self.lower {
            block.iter_mut().for_each(&mut f);
        }
        let live = self.bot..self.p + 1;
        self.body[live].iter_mut().for_each(f);
    }

    // =========================================================================
    // Block management
    // =========================================================================

    /// Make room for `request` more elements by starting a new block.
    ///
    /// The top elements of the current block move into the new block so that
    /// operators find their operands without crossing a boundary.
    pub fn extend(&mut self, request: usize) -> Result<(), ErrorCode> {
        let block_size = self.params.block_size;
        if !self.params.allow_expansion
            || request > block_size
            || self.count() + request > self.params.max_count
        {
            return Err(self.params.overflow);
        }
        let in_block = self.count_in_block();
        let keep = in_block.min(block_size / 2).min(block_size - request);
        let split = self.p + 1 - keep;
        let saved: Vec<T> = self.body[self.bot..split].to_vec();
        if !saved.is_empty() {
            self.lower_count += saved.len();
            self.lower.push(saved);
        }
        self.body.copy_within(split..self.p + 1, self.bot);
        self.p = self.bot + keep - 1;
        Ok(())
    }

    /// Bring the next lower block back under the current block's elements.
    pub fn pop_block(&mut self) -> Result<(), ErrorCode> {
        let Some(mut below) = self.lower.pop() else {
            return Err(self.params.underflow);
        };
        self.lower_count -= below.len();
        below.extend_from_slice(&self.body[self.bot..self.p + 1]);
        let block_size = self.params.block_size;
        if below.len() > block_size {
            let rest = below.split_off(below.len() - block_size);
            self.lower_count += below.len();
            self.lower.push(below);
            below = rest;
        }
        self.body[self.bot..self.bot + below.len()].copy_from_slice(&below);
        self.p = self.bot + below.len() - 1;
        Ok(())
    }
}
