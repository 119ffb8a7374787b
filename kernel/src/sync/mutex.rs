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

//! Recursive, owner-tracked mutex.
//!
//! Unlock hands ownership directly to the waiter it wakes, so the lock
//! cannot be barged between the handoff and the waiter running. Waiters
//! queue in priority order by default; priority inheritance is not
//! implemented, a strong waiter only jumps the queue.

use crate::error::{code, Error};
use crate::irq;
use crate::scheduler::{self, WaitOrder, WaitQueue};
use crate::sync::SpinLock;
use crate::thread::ThreadNode;
use crate::time::{self, NO_WAITING, WAITING_FOREVER};
use alloc::{string::String, sync::Arc};

struct MutexInner {
    owner: Option<ThreadNode>,
    nesting: usize,
    wq: WaitQueue,
    epoch: u64,
}

pub struct Mutex {
    name: Option<String>,
    inner: SpinLock<MutexInner>,
}

impl Mutex {
    pub fn new() -> Self {
        Self::with_order(WaitOrder::Priority)
    }

    pub fn with_order(order: WaitOrder) -> Self {
        Self {
            name: None,
            inner: SpinLock::new(MutexInner {
                owner: None,
                nesting: 0,
                wq: WaitQueue::new(order),
                epoch: 0,
            }),
        }
    }

    /// Labels the mutex for diagnostics.
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(String::from(name));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn owner(&self) -> Option<ThreadNode> {
        self.inner.irqsave_lock().owner.clone()
    }

    pub fn try_lock(&self) -> Result<(), Error> {
        self.lock(NO_WAITING)
    }

    /// Acquires the mutex, blocking up to `timeout` ticks. Relocking by the
    /// owner nests; every `lock` needs a matching [`unlock`].
    pub fn lock(&self, timeout: usize) -> Result<(), Error> {
        if irq::is_in_irq() {
            return Err(code::ENOTSUP);
        }
        let me = scheduler::current_thread();
        let mut remaining = timeout;
        let mut waited = false;
        loop {
            let mut inner = self.inner.irqsave_lock();
            match &inner.owner {
                None => {
                    inner.owner = Some(me.clone());
                    inner.nesting = 1;
                    return Ok(());
                }
                Some(owner) if Arc::ptr_eq(owner, &me) => {
                    inner.nesting += 1;
                    return Ok(());
                }
                Some(_) => {}
            }
            if remaining == NO_WAITING {
                return Err(if waited { code::ETIMEDOUT } else { code::EBUSY });
            }
            let epoch = inner.epoch;
            inner.wq.insert(me.clone());
            let start = time::get_sys_ticks();
            let timed_out = scheduler::suspend_me_with_timeout(inner, remaining);
            waited = true;

            let mut inner = self.inner.irqsave_lock();
            if timed_out {
                inner.wq.remove(&me);
                return Err(code::ETIMEDOUT);
            }
            if inner.epoch != epoch {
                return Err(code::EAGAIN);
            }
            // Unlock handed us ownership before waking us.
            if inner
                .owner
                .as_ref()
                .is_some_and(|owner| Arc::ptr_eq(owner, &me))
            {
                return Ok(());
            }
            drop(inner);
            if remaining != WAITING_FOREVER {
                let elapsed = (time::get_sys_ticks() - start) as usize;
                remaining = remaining.saturating_sub(elapsed);
            }
        }
    }

    /// Releases one nesting level; only the owner may unlock.
    pub fn unlock(&self) -> Result<(), Error> {
        if irq::is_in_irq() {
            return Err(code::ENOTSUP);
        }
        let me = scheduler::current_thread();
        let handed_off = {
            let mut inner = self.inner.irqsave_lock();
            match &inner.owner {
                Some(owner) if Arc::ptr_eq(owner, &me) => {}
                _ => return Err(code::EPERM),
            }
            inner.nesting -= 1;
            if inner.nesting > 0 {
                return Ok(());
            }
            match inner.wq.wake_one() {
                Some(next) => {
                    inner.nesting = 1;
                    inner.owner = Some(next);
                    true
                }
                None => {
                    inner.owner = None;
                    false
                }
            }
        };
        if handed_off {
            scheduler::yield_me_now_or_later();
        }
        Ok(())
    }

    /// Clears ownership and evicts every waiter with `EAGAIN`.
    pub fn reset(&self) {
        let woken = {
            let mut inner = self.inner.irqsave_lock();
            inner.owner = None;
            inner.nesting = 0;
            inner.epoch += 1;
            inner.wq.wake_all()
        };
        if woken > 0 {
            scheduler::yield_me_now_or_later();
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
