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

use crate::arch;
use alloc::alloc::{alloc, dealloc, Layout};

/// Backing memory with explicit ownership: `Alloc` is kernel-owned and freed
/// on drop, `Raw` is caller-supplied and merely borrowed for the object's
/// lifetime.
pub enum Storage {
    Alloc { base: *mut u8, layout: Layout },
    Raw { base: *mut u8, size: usize },
}

// The region is exclusively owned (Alloc) or exclusively lent (Raw) for the
// lifetime of the Storage.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    pub fn alloc(size: usize, align: usize) -> Option<Self> {
        let layout = Layout::from_size_align(size, align).ok()?;
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            return None;
        }
        Some(Self::Alloc { base, layout })
    }

    /// # Safety
    ///
    /// `base..base+size` must stay valid and unaliased for the lifetime of
    /// the Storage.
    pub unsafe fn from_raw(base: *mut u8, size: usize) -> Self {
        Self::Raw { base, size }
    }

    #[inline]
    pub fn base(&self) -> *mut u8 {
        match self {
            Self::Alloc { base, .. } => *base,
            Self::Raw { base, .. } => *base,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        match self {
            Self::Alloc { layout, .. } => layout.size(),
            Self::Raw { size, .. } => *size,
        }
    }

    #[inline]
    pub fn is_kernel_owned(&self) -> bool {
        matches!(self, Self::Alloc { .. })
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Self::Alloc { base, layout } = self {
            unsafe { dealloc(*base, *layout) };
        }
    }
}

/// RAII critical section over [`arch::local_irq_save`].
pub struct DisableInterruptGuard {
    level: Option<arch::IrqLevel>,
}

impl DisableInterruptGuard {
    pub fn new() -> Self {
        Self {
            level: Some(arch::local_irq_save()),
        }
    }
}

impl Default for DisableInterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DisableInterruptGuard {
    fn drop(&mut self) {
        if let Some(level) = self.level.take() {
            arch::local_irq_restore(level);
        }
    }
}
