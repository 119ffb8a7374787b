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

//! Word-sized mailbox: a bounded FIFO of `usize` payloads with blocking on
//! both the full and the empty side.

use crate::error::{code, Error};
use crate::irq;
use crate::scheduler::{self, WaitOrder, WaitQueue};
use crate::sync::SpinLock;
use crate::time::{self, NO_WAITING, WAITING_FOREVER};
use alloc::string::String;
use emberos_infra::ringbuffer::RingBuffer;

const SLOT: usize = core::mem::size_of::<usize>();

struct MailboxInner {
    ring: RingBuffer,
    senders: WaitQueue,
    receivers: WaitQueue,
    epoch: u64,
}

#[derive(Debug)]
pub struct Mailbox {
    name: Option<String>,
    inner: SpinLock<MailboxInner>,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Result<Self, Error> {
        Self::with_order(capacity, WaitOrder::Fifo)
    }

    pub fn with_order(capacity: usize, order: WaitOrder) -> Result<Self, Error> {
        let ring = RingBuffer::alloc(SLOT, capacity).ok_or(code::EINVAL)?;
        Ok(Self::from_ring(ring, order))
    }

    /// Mailbox over caller-supplied backing memory; capacity is however many
    /// word-sized slots fit in `len` bytes. The caller keeps ownership and
    /// frees the memory after the mailbox is gone.
    ///
    /// # Safety
    ///
    /// `base..base+len` must stay valid and unaliased for the mailbox's
    /// lifetime.
    pub unsafe fn with_storage(
        base: *mut u8,
        len: usize,
        order: WaitOrder,
    ) -> Result<Self, Error> {
        let ring = RingBuffer::from_raw(base, len, SLOT).ok_or(code::EINVAL)?;
        Ok(Self::from_ring(ring, order))
    }

    fn from_ring(ring: RingBuffer, order: WaitOrder) -> Self {
        Self {
            name: None,
            inner: SpinLock::new(MailboxInner {
                ring,
                senders: WaitQueue::new(order),
                receivers: WaitQueue::new(order),
                epoch: 0,
            }),
        }
    }

    /// Labels the mailbox for diagnostics.
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(String::from(name));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.inner.irqsave_lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.irqsave_lock().ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.irqsave_lock().ring.capacity()
    }

    /// Appends `msg`, blocking up to `timeout` ticks while the mailbox is
    /// full.
    pub fn post(&self, msg: usize, timeout: usize) -> Result<(), Error> {
        self.deliver(msg, timeout, false)
    }

    /// Inserts `msg` at the head so the next fetch returns it.
    pub fn post_urgent(&self, msg: usize, timeout: usize) -> Result<(), Error> {
        self.deliver(msg, timeout, true)
    }

    fn deliver(&self, msg: usize, timeout: usize, urgent: bool) -> Result<(), Error> {
        let mut remaining = timeout;
        let mut waited = false;
        loop {
            let mut inner = self.inner.irqsave_lock();
            if !inner.ring.is_full() {
                let bytes = msg.to_ne_bytes();
                let stored = if urgent {
                    inner.ring.push_front(&bytes)
                } else {
                    inner.ring.push_back(&bytes)
                };
                debug_assert!(stored);
                let woken = inner.receivers.wake_one().is_some();
                drop(inner);
                if woken {
                    scheduler::yield_me_now_or_later();
                }
                return Ok(());
            }
            if remaining == NO_WAITING {
                return Err(if waited { code::ETIMEDOUT } else { code::EAGAIN });
            }
            if irq::is_in_irq() {
                return Err(code::ENOTSUP);
            }
            let epoch = inner.epoch;
            let me = scheduler::current_thread();
            inner.senders.insert(me.clone());
            let start = time::get_sys_ticks();
            let timed_out = scheduler::suspend_me_with_timeout(inner, remaining);
            waited = true;

            let mut inner = self.inner.irqsave_lock();
            if timed_out {
                inner.senders.remove(&me);
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

    /// Takes the oldest message, blocking up to `timeout` ticks while the
    /// mailbox is empty.
    pub fn fetch(&self, timeout: usize) -> Result<usize, Error> {
        let mut remaining = timeout;
        let mut waited = false;
        loop {
            let mut inner = self.inner.irqsave_lock();
            let mut bytes = [0u8; SLOT];
            if inner.ring.pop_front(&mut bytes) {
                let woken = inner.senders.wake_one().is_some();
                drop(inner);
                if woken {
                    scheduler::yield_me_now_or_later();
                }
                return Ok(usize::from_ne_bytes(bytes));
            }
            if remaining == NO_WAITING {
                return Err(if waited { code::ETIMEDOUT } else { code::EAGAIN });
            }
            if irq::is_in_irq() {
                return Err(code::ENOTSUP);
            }
            let epoch = inner.epoch;
            let me = scheduler::current_thread();
            inner.receivers.insert(me.clone());
            let start = time::get_sys_ticks();
            let timed_out = scheduler::suspend_me_with_timeout(inner, remaining);
            waited = true;

            let mut inner = self.inner.irqsave_lock();
            if timed_out {
                inner.receivers.remove(&me);
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

    /// Discards every queued message and evicts all waiters with `EAGAIN`.
    pub fn reset(&self) {
        let woken = {
            let mut inner = self.inner.irqsave_lock();
            inner.ring.clear();
            inner.epoch += 1;
            inner.senders.wake_all() + inner.receivers.wake_all()
        };
        if woken > 0 {
            scheduler::yield_me_now_or_later();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_with_urgent_jump() {
        let mb = Mailbox::new(3).unwrap();
        mb.post(1, NO_WAITING).unwrap();
        mb.post(2, NO_WAITING).unwrap();
        mb.post_urgent(99, NO_WAITING).unwrap();
        assert_eq!(mb.fetch(NO_WAITING).unwrap(), 99);
        assert_eq!(mb.fetch(NO_WAITING).unwrap(), 1);
        assert_eq!(mb.fetch(NO_WAITING).unwrap(), 2);
        assert_eq!(mb.fetch(NO_WAITING).unwrap_err(), code::EAGAIN);
    }

    #[test]
    fn full_mailbox_refuses_without_waiting() {
        let mb = Mailbox::new(1).unwrap();
        mb.post(7, NO_WAITING).unwrap();
        assert_eq!(mb.post(8, NO_WAITING).unwrap_err(), code::EAGAIN);
        mb.reset();
        assert!(mb.is_empty());
        mb.post(9, NO_WAITING).unwrap();
        assert_eq!(mb.fetch(NO_WAITING).unwrap(), 9);
    }

    #[test]
    fn zero_capacity_is_invalid() {
        assert_eq!(Mailbox::new(0).unwrap_err(), code::EINVAL);
    }

    #[test]
    fn caller_supplied_backing_memory() {
        let mut backing = [0u8; 4 * SLOT];
        let mb = unsafe { Mailbox::with_storage(backing.as_mut_ptr(), backing.len(), WaitOrder::Fifo) }
            .unwrap()
            .named("shared-slab");
        assert_eq!(mb.name(), Some("shared-slab"));
        assert_eq!(mb.capacity(), 4);
        mb.post(41, NO_WAITING).unwrap();
        mb.post(42, NO_WAITING).unwrap();
        assert_eq!(mb.fetch(NO_WAITING).unwrap(), 41);
        drop(mb);
        // The memory is still the caller's afterwards.
        backing[0] = 0;

        let err = unsafe { Mailbox::with_storage(core::ptr::null_mut(), 64, WaitOrder::Fifo) };
        assert_eq!(err.unwrap_err(), code::EINVAL);
        let mut tiny = [0u8; SLOT - 1];
        let err = unsafe { Mailbox::with_storage(tiny.as_mut_ptr(), tiny.len(), WaitOrder::Fifo) };
        assert_eq!(err.unwrap_err(), code::EINVAL);
    }

    mod in_kernel {
        use super::*;
        use crate::test_support::run_in_kernel;
        use crate::thread::{Builder, Entry};
        use alloc::boxed::Box;
        use alloc::sync::Arc;

        #[test]
        fn producer_blocks_on_full_consumer_on_empty() {
            run_in_kernel(|| {
                let mb = Arc::new(Mailbox::new(2).unwrap());
                let producer = mb.clone();
                Builder::new(Entry::Closure(Box::new(move || {
                    for msg in 0..40usize {
                        producer.post(msg, WAITING_FOREVER).unwrap();
                    }
                })))
                .name("producer")
                .spawn()
                .unwrap();
                for expect in 0..40usize {
                    assert_eq!(mb.fetch(WAITING_FOREVER).unwrap(), expect);
                }
                assert_eq!(mb.fetch(NO_WAITING).unwrap_err(), code::EAGAIN);
            });
        }

        #[test]
        fn fetch_times_out_on_an_empty_mailbox() {
            run_in_kernel(|| {
                let mb = Mailbox::new(1).unwrap();
                let start = time::get_sys_ticks();
                assert_eq!(mb.fetch(5).unwrap_err(), code::ETIMEDOUT);
                assert!(time::get_sys_ticks() - start >= 5);
            });
        }
    }
}
