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

//! Message queue: a bounded FIFO of variable-length byte messages up to a
//! per-queue maximum. Each ring slot carries a length header ahead of the
//! payload.

use crate::error::{code, Error};
use crate::irq;
use crate::scheduler::{self, WaitOrder, WaitQueue};
use crate::sync::SpinLock;
use crate::time::{self, NO_WAITING, WAITING_FOREVER};
use alloc::{string::String, vec, vec::Vec};
use emberos_infra::ringbuffer::RingBuffer;

const HEADER: usize = core::mem::size_of::<u32>();

struct MqInner {
    ring: RingBuffer,
    senders: WaitQueue,
    receivers: WaitQueue,
    epoch: u64,
}

#[derive(Debug)]
pub struct MessageQueue {
    name: Option<String>,
    max_msg_size: usize,
    inner: SpinLock<MqInner>,
}

impl MessageQueue {
    pub fn new(max_msg_size: usize, depth: usize) -> Result<Self, Error> {
        Self::with_order(max_msg_size, depth, WaitOrder::Fifo)
    }

    pub fn with_order(
        max_msg_size: usize,
        depth: usize,
        order: WaitOrder,
    ) -> Result<Self, Error> {
        if max_msg_size == 0 || max_msg_size > u32::MAX as usize {
            return Err(code::EINVAL);
        }
        let ring = RingBuffer::alloc(HEADER + max_msg_size, depth).ok_or(code::EINVAL)?;
        Ok(Self::from_ring(max_msg_size, ring, order))
    }

    /// Queue over caller-supplied backing memory; the depth is however many
    /// header-plus-payload slots fit in `len` bytes. The caller keeps
    /// ownership and frees the memory after the queue is gone.
    ///
    /// # Safety
    ///
    /// `base..base+len` must stay valid and unaliased for the queue's
    /// lifetime.
    pub unsafe fn with_storage(
        max_msg_size: usize,
        base: *mut u8,
        len: usize,
        order: WaitOrder,
    ) -> Result<Self, Error> {
        if max_msg_size == 0 || max_msg_size > u32::MAX as usize {
            return Err(code::EINVAL);
        }
        let ring = RingBuffer::from_raw(base, len, HEADER + max_msg_size).ok_or(code::EINVAL)?;
        Ok(Self::from_ring(max_msg_size, ring, order))
    }

    fn from_ring(max_msg_size: usize, ring: RingBuffer, order: WaitOrder) -> Self {
        Self {
            name: None,
            max_msg_size,
            inner: SpinLock::new(MqInner {
                ring,
                senders: WaitQueue::new(order),
                receivers: WaitQueue::new(order),
                epoch: 0,
            }),
        }
    }

    /// Labels the queue for diagnostics.
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(String::from(name));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn max_msg_size(&self) -> usize {
        self.max_msg_size
    }

    pub fn len(&self) -> usize {
        self.inner.irqsave_lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.irqsave_lock().ring.is_empty()
    }

    fn encode(&self, msg: &[u8]) -> Vec<u8> {
        let mut slot = vec![0u8; HEADER + msg.len()];
        slot[..HEADER].copy_from_slice(&(msg.len() as u32).to_ne_bytes());
        slot[HEADER..].copy_from_slice(msg);
        slot
    }

    /// Appends a copy of `msg`, blocking up to `timeout` ticks while the
    /// queue is full.
    pub fn send(&self, msg: &[u8], timeout: usize) -> Result<(), Error> {
        self.deliver(msg, timeout, false)
    }

    /// Inserts a copy of `msg` at the head so the next receive returns it.
    pub fn send_urgent(&self, msg: &[u8], timeout: usize) -> Result<(), Error> {
        self.deliver(msg, timeout, true)
    }

    fn deliver(&self, msg: &[u8], timeout: usize, urgent: bool) -> Result<(), Error> {
        if msg.len() > self.max_msg_size {
            return Err(code::EOVERFLOW);
        }
        let mut remaining = timeout;
        let mut waited = false;
        loop {
            let mut inner = self.inner.irqsave_lock();
            if !inner.ring.is_full() {
                let slot = self.encode(msg);
                let stored = if urgent {
                    inner.ring.push_front(&slot)
                } else {
                    inner.ring.push_back(&slot)
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

    /// Takes the oldest message into `buf` and returns its length, blocking
    /// up to `timeout` ticks while the queue is empty. `buf` shorter than
    /// the stored message is refused without consuming it.
    pub fn recv(&self, buf: &mut [u8], timeout: usize) -> Result<usize, Error> {
        let mut remaining = timeout;
        let mut waited = false;
        let mut slot = vec![0u8; HEADER + self.max_msg_size];
        loop {
            let mut inner = self.inner.irqsave_lock();
            if !inner.ring.is_empty() {
                let popped = inner.ring.pop_front(&mut slot);
                debug_assert!(popped);
                let len =
                    u32::from_ne_bytes(slot[..HEADER].try_into().expect("header width")) as usize;
                if len > buf.len() {
                    // Put it back where it was; the message is not lost.
                    inner.ring.push_front(&slot);
                    return Err(code::EINVAL);
                }
                buf[..len].copy_from_slice(&slot[HEADER..HEADER + len]);
                let woken = inner.senders.wake_one().is_some();
                drop(inner);
                if woken {
                    scheduler::yield_me_now_or_later();
                }
                return Ok(len);
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
