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

//! 32-bit event flag group.
//!
//! Each waiter brings its own mask and mode. A setter walks the waiters in
//! queue order and satisfies each in turn against the remaining flags, so
//! with consuming waiters an earlier waiter can use up bits a later one
//! wanted. `NO_CLEAR` waits leave the flags in place.

use crate::error::{code, Error};
use crate::irq;
use crate::scheduler::{self, WaitOrder, WaitQueue};
use crate::sync::SpinLock;
use crate::time::{self, NO_WAITING, WAITING_FOREVER};
use alloc::string::String;
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct EventMode: u8 {
        /// Satisfied by any bit of the mask.
        const ANY = 1 << 0;
        /// Satisfied only by the whole mask.
        const ALL = 1 << 1;
        /// Leave matched flags set instead of consuming them.
        const NO_CLEAR = 1 << 2;
    }
}

/// Matched bits of `set` against one waiter's request, zero when
/// unsatisfied.
fn matched(set: u32, mask: u32, mode: EventMode) -> u32 {
    if mode.contains(EventMode::ALL) {
        if set & mask == mask {
            mask
        } else {
            0
        }
    } else {
        set & mask
    }
}

struct EventInner {
    set: u32,
    wq: WaitQueue,
    epoch: u64,
}

pub struct EventFlags {
    name: Option<String>,
    inner: SpinLock<EventInner>,
}

impl EventFlags {
    pub fn new() -> Self {
        Self::with_order(WaitOrder::Fifo)
    }

    pub fn with_order(order: WaitOrder) -> Self {
        Self {
            name: None,
            inner: SpinLock::new(EventInner {
                set: 0,
                wq: WaitQueue::new(order),
                epoch: 0,
            }),
        }
    }

    /// Labels the group for diagnostics.
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(String::from(name));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn get(&self) -> u32 {
        self.inner.irqsave_lock().set
    }

    /// Raises `flags` and satisfies waiters in queue order. Interrupt-safe.
    pub fn set(&self, flags: u32) -> Result<(), Error> {
        if flags == 0 {
            return Err(code::EINVAL);
        }
        let woken = {
            let mut inner = self.inner.irqsave_lock();
            inner.set |= flags;
            let mut current = inner.set;
            let satisfied = inner.wq.extract(|t| {
                let (mask, mode) = t.event_wait();
                let mode = EventMode::from_bits_truncate(mode);
                let hit = matched(current, mask, mode);
                if hit == 0 {
                    return false;
                }
                t.set_event_matched(hit);
                if !mode.contains(EventMode::NO_CLEAR) {
                    current &= !hit;
                }
                true
            });
            inner.set = current;
            let mut woken = 0;
            for t in satisfied {
                if scheduler::wait_queue::wake_thread(&t) {
                    woken += 1;
                }
            }
            woken
        };
        if woken > 0 {
            scheduler::yield_me_now_or_later();
        }
        Ok(())
    }

    /// Lowers `flags` without waking anyone.
    pub fn clear(&self, flags: u32) {
        self.inner.irqsave_lock().set &= !flags;
    }

    /// Waits until the group satisfies `mask` under `mode` and returns the
    /// matched bits.
    pub fn recv(&self, mask: u32, mode: EventMode, timeout: usize) -> Result<u32, Error> {
        if mask == 0 || mode.contains(EventMode::ANY) == mode.contains(EventMode::ALL) {
            return Err(code::EINVAL);
        }
        let mut remaining = timeout;
        let mut waited = false;
        loop {
            let mut inner = self.inner.irqsave_lock();
            let hit = matched(inner.set, mask, mode);
            if hit != 0 {
                if !mode.contains(EventMode::NO_CLEAR) {
                    inner.set &= !hit;
                }
                return Ok(hit);
            }
            if remaining == NO_WAITING {
                return Err(if waited { code::ETIMEDOUT } else { code::EAGAIN });
            }
            if irq::is_in_irq() {
                return Err(code::ENOTSUP);
            }
            let epoch = inner.epoch;
            let me = scheduler::current_thread();
            me.set_event_wait(mask, mode.bits());
            inner.wq.insert(me.clone());
            let start = time::get_sys_ticks();
            let timed_out = scheduler::suspend_me_with_timeout(inner, remaining);
            waited = true;

            let mut inner = self.inner.irqsave_lock();
            // A setter may have consumed flags on our behalf even if the
            // timeout also fired; delivered bits win.
            let delivered = me.take_event_matched();
            if delivered != 0 {
                return Ok(delivered);
            }
            if timed_out {
                inner.wq.remove(&me);
                return Err(code::ETIMEDOUT);
            }
            if inner.epoch != epoch {
                return Err(code::EAGAIN);
            }
            drop(inner);
            if remaining != WAITING_FOREVER {
                let elapsed = (time::get_sys_ticks() - start) as usize;
                remaining = remaining.saturating_sub(elapsed);
            }
        }
    }

    /// Clears the group and evicts every waiter with `EAGAIN`.
    pub fn reset(&self) {
        let woken = {
            let mut inner = self.inner.irqsave_lock();
            inner.set = 0;
            inner.epoch += 1;
            inner.wq.wake_all()
        };
        if woken > 0 {
            scheduler::yield_me_now_or_later();
        }
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}
