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

//! Interrupt-saving spinlock.
//!
//! [`SpinLock::irqsave_lock`] masks local interrupts before taking the lock
//! and the guard restores the prior mask state after releasing it, so the
//! same discipline protects data shared with interrupt handlers on real
//! ports and with concurrently running host threads on the simulator.

use crate::arch::{self, IrqLevel};
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

pub struct SpinLock<T> {
    inner: spin::Mutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    pub fn irqsave_lock(&self) -> SpinLockGuard<'_, T> {
        let level = arch::local_irq_save();
        SpinLockGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            level: ManuallyDrop::new(level),
        }
    }

    pub fn try_irqsave_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let level = arch::local_irq_save();
        match self.inner.try_lock() {
            Some(guard) => Some(SpinLockGuard {
                guard: ManuallyDrop::new(guard),
                level: ManuallyDrop::new(level),
            }),
            None => {
                arch::local_irq_restore(level);
                None
            }
        }
    }
}

impl<T> core::fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpinLock").finish_non_exhaustive()
    }
}

pub struct SpinLockGuard<'a, T> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
    level: ManuallyDrop<IrqLevel>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release the lock before unmasking.
        unsafe {
            ManuallyDrop::drop(&mut self.guard);
            let level = ManuallyDrop::take(&mut self.level);
            arch::local_irq_restore(level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_gives_exclusive_access() {
        let lock = SpinLock::new(0u32);
        {
            let mut g = lock.irqsave_lock();
            *g += 1;
            assert!(!arch::local_irq_enabled());
            assert!(lock.try_irqsave_lock().is_none());
        }
        assert!(arch::local_irq_enabled());
        assert_eq!(*lock.irqsave_lock(), 1);
    }

    #[test]
    fn contended_counter_stays_consistent() {
        use std::sync::Arc;
        let lock = Arc::new(SpinLock::new(0u64));
        let mut handles = std::vec::Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.irqsave_lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.irqsave_lock(), 4000);
    }
}
