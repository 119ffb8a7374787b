// Copyright (c) 2026 The EmberOS Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Slot-structured ring buffer backing mailboxes and message queues.
//!
//! The ring hands out fixed-size slots; the caller decides the slot layout
//! (the message queue stores a length header in each slot). Memory is either
//! owned by the ring or supplied by the caller, in which case the caller
//! keeps it alive and frees it.

use alloc::{boxed::Box, vec};

enum Mem {
    Owned(Box<[u8]>),
    Raw { ptr: *mut u8, len: usize },
}

// Raw memory is exclusively owned by the ring for its lifetime; the caller
// contract forbids aliasing it while the ring lives.
unsafe impl Send for Mem {}

pub struct RingBuffer {
    mem: Mem,
    slot_size: usize,
    slots: usize,
    head: usize,
    len: usize,
}

impl RingBuffer {
    /// Ring with kernel-owned, zeroed storage. Returns `None` when either
    /// dimension is zero.
    pub fn alloc(slot_size: usize, slots: usize) -> Option<Self> {
        if slot_size == 0 || slots == 0 {
            return None;
        }
        Some(Self {
            mem: Mem::Owned(vec![0u8; slot_size * slots].into_boxed_slice()),
            slot_size,
            slots,
            head: 0,
            len: 0,
        })
    }

    /// Ring over caller-supplied storage. Capacity is however many whole
    /// slots fit in `len` bytes.
    ///
    /// # Safety
    ///
    /// `ptr..ptr+len` must be valid for reads and writes for the lifetime of
    /// the ring and must not be accessed through any other path meanwhile.
    pub unsafe fn from_raw(ptr: *mut u8, len: usize, slot_size: usize) -> Option<Self> {
        if slot_size == 0 || ptr.is_null() {
            return None;
        }
        let slots = len / slot_size;
        if slots == 0 {
            return None;
        }
        Some(Self {
            mem: Mem::Raw { ptr, len },
            slot_size,
            slots,
            head: 0,
            len: 0,
        })
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.slots
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn slot(&mut self, index: usize) -> &mut [u8] {
        debug_assert!(index < self.slots);
        let base = match &mut self.mem {
            Mem::Owned(b) => b.as_mut_ptr(),
            Mem::Raw { ptr, .. } => *ptr,
        };
        unsafe {
            core::slice::from_raw_parts_mut(base.add(index * self.slot_size), self.slot_size)
        }
    }

    fn slot_ref(&self, index: usize) -> &[u8] {
        debug_assert!(index < self.slots);
        let base = match &self.mem {
            Mem::Owned(b) => b.as_ptr(),
            Mem::Raw { ptr, .. } => *ptr as *const u8,
        };
        unsafe { core::slice::from_raw_parts(base.add(index * self.slot_size), self.slot_size) }
    }

    /// Appends one slot at the tail. `data` must not exceed the slot size;
    /// shorter data leaves the remainder of the slot untouched.
    pub fn push_back(&mut self, data: &[u8]) -> bool {
        if self.is_full() || data.len() > self.slot_size {
            return false;
        }
        let index = (self.head + self.len) % self.slots;
        self.slot(index)[..data.len()].copy_from_slice(data);
        self.len += 1;
        true
    }

    /// Inserts one slot ahead of the current head so it is popped next.
    pub fn push_front(&mut self, data: &[u8]) -> bool {
        if self.is_full() || data.len() > self.slot_size {
            return false;
        }
        self.head = (self.head + self.slots - 1) % self.slots;
        self.slot(self.head)[..data.len()].copy_from_slice(data);
        self.len += 1;
        true
    }

    /// Copies the head slot into `out` and frees it. `out` may be shorter
    /// than a slot; only `out.len()` bytes are copied.
    pub fn pop_front(&mut self, out: &mut [u8]) -> bool {
        if self.is_empty() {
            return false;
        }
        let n = out.len().min(self.slot_size);
        out[..n].copy_from_slice(&self.slot_ref(self.head)[..n]);
        self.head = (self.head + 1) % self.slots;
        self.len -= 1;
        true
    }
}
