// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! A read-only cursor over an already-decoded [`crate::types::Expression`]'s
//! byte buffer.
//!
//! [`crate::decode::expr`] transcodes a WASM expression's bytecode into a
//! buffer of natively-aligned, natively-sized Rust values (see
//! `Expression`'s docstring). This module is the mirror-image reader: it
//! replays that same alignment arithmetic to read values back out, rather
//! than write them. Both [`crate::validate::expr`] (single-pass type
//! checking) and [`crate::interpret::compile`] (building the executable
//! instruction sequence) walk an expression's bytes through this cursor,
//! each re-deriving the per-opcode operand shape for its own purpose.

use core::slice;

use crate::types::Opcode;

pub(crate) struct ExprCursor<'e> {
    data: &'e [u8],
    pos: usize,
}

impl<'e> ExprCursor<'e> {
    pub(crate) fn new(data: &'e [u8]) -> Self {
        Self { data, pos: 0 }
    }

    // Reconstructs a cursor over `data` resuming at a previously observed
    // `pos()`, letting a caller park between instructions (e.g. across a
    // `Store` borrow) without holding the cursor itself alive.
    pub(crate) fn at(data: &'e [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn opcode(&mut self) -> Opcode {
        self.read()
    }

    // Reads a single natively-aligned, natively-sized `T` out of the buffer.
    //
    // Safety-relevant invariant: `Expression` buffers are built exclusively
    // by `ExpressionBuilder`, whose backing allocation starts at the crate's
    // maximum natural alignment and which places every scalar value at its
    // own natural-alignment boundary within the buffer (padding with zero
    // bytes as needed). Replaying that same `next_multiple_of(align_of::<T>())`
    // arithmetic here reproduces the exact offset the writer used.
    pub(crate) fn read<T: Copy>(&mut self) -> T {
        let aligned = self.pos.next_multiple_of(align_of::<T>());
        debug_assert!(aligned + size_of::<T>() <= self.data.len());
        // Safety: see above; `aligned` is T-aligned and in bounds.
        let value = unsafe { self.data.as_ptr().add(aligned).cast::<T>().read() };
        self.pos = aligned + size_of::<T>();
        value
    }

    // Reads a `u32`-length-prefixed, tightly-packed run of `T`, as written by
    // the blanket `Transcodable<A> for Vec<T, A>` impl.
    pub(crate) fn read_vec<T: Copy>(&mut self) -> &'e [T] {
        let len: u32 = self.read();
        let aligned = self.pos.next_multiple_of(align_of::<T>());
        let byte_len = (len as usize) * size_of::<T>();
        debug_assert!(aligned + byte_len <= self.data.len());
        // Safety: see `read`; the run is contiguous since every element
        // shares the same alignment as the first.
        let slice =
            unsafe { slice::from_raw_parts(self.data.as_ptr().add(aligned).cast::<T>(), len as usize) };
        self.pos = aligned + byte_len;
        slice
    }

    // Reads `len` raw, unaligned bytes (e.g. a v128 constant or lane-shuffle
    // immediate), as written by `ExpressionBuilder::write_raw_bytes`.
    pub(crate) fn read_raw_bytes(&mut self, len: usize) -> &'e [u8] {
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        bytes
    }
}
