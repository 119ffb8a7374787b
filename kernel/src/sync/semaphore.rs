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

//! Counting semaphore.

use crate::error::{code, Error};
use crate::irq;
use crate::scheduler::{self, WaitOrder, WaitQueue};
use crate::sync::SpinLock;
use crate::time::{self, NO_WAITING, WAITING_FOREVER};
use alloc::string::String;

struct SemInner {
    count: usize,
    max: usize,
    wq: WaitQueue,
    /// Bumped by [`Semaphore::reset`]; a waiter that suspended under an
    /// older epoch was evicted, not granted.
    epoch: u64,
}

pub struct Semaphore {
    name: Option<String>,
    inner: SpinLock<SemInner>,
}

impl Semaphore {
    pub fn new(count: usize) -> Self {
        Self::with_order(count, usize::MAX, WaitOrder::Fifo)
    }

    pub fn with_order(count: usize, max: usize, order: WaitOrder) -> Self {
        debug_assert!(count <= max && max > 0);
        Self {
            name: None,
            inner: SpinLock::new(SemInner {
                count,
                max,
                wq: WaitQueue::new(order),
                epoch: 0,
            }),
        }
    }

    /// Labels the semaphore for diagnostics.
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(String::from(name));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn count(&self) -> usize {
        self.inner.irqsave_lock().count
    }

    pub fn try_acquire(&self) -> Result<(), Error> {
        self.acquire(NO_WAITING)
    }

    /// Takes one permit, blocking up to `timeout` ticks. A woken waiter
    /// competes for the permit again, so a barger can slip in; the waiter
    /// then goes back to sleep for the remainder of its timeout.
    pub fn acquire(&self, timeout: usize) -> Result<(), Error> {
        let mut remaining = timeout;
        let mut waited = false;
        loop {
            let mut inner = self.inner.irqsave_lock();
            if inner.count > 0 {
                inner.count -= 1;
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
            drop(inner);
            if remaining != WAITING_FOREVER {
                let elapsed = (time::get_sys_ticks() - start) as usize;
                remaining = remaining.saturating_sub(elapsed);
            }
        }
    }

    /// Returns one permit and wakes the first waiter. Interrupt-safe.
    pub fn release(&self) -> Result<(), Error> {
        let woken = {
            let mut inner = self.inner.irqsave_lock();
            if inner.count >= inner.max {
                return Err(code::ENOSPC);
            }
            inner.count += 1;
            inner.wq.wake_one().is_some()
        };
        if woken {
            scheduler::yield_me_now_or_later();
        }
        Ok(())
    }

    /// Forces the count back to `count` and evicts every waiter with
    /// `EAGAIN`.
    pub fn reset(&self, count: usize) -> Result<(), Error> {
        let woken = {
            let mut inner = self.inner.irqsave_lock();
            if count > inner.max {
                return Err(code::EINVAL);
            }
            inner.count = count;
            inner.epoch += 1;
            inner.wq.wake_all()
        };
        if woken > 0 {
            scheduler::yield_me_now_or_later();
        }
        Ok(())
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_count_down_without_blocking() {
        let sem = Semaphore::new(2).named("tx-permits");
        assert_eq!(sem.name(), Some("tx-permits"));
        sem.try_acquire().unwrap();
        sem.try_acquire().unwrap();
        assert_eq!(sem.try_acquire().unwrap_err(), code::EAGAIN);
        sem.release().unwrap();
        sem.try_acquire().unwrap();
    }

    #[test]
    fn release_beyond_max_is_refused() {
        let sem = Semaphore::with_order(1, 1, WaitOrder::Fifo);
        assert_eq!(sem.release().unwrap_err(), code::ENOSPC);
        sem.try_acquire().unwrap();
        sem.release().unwrap();
    }

    #[test]
    fn reset_restores_the_count() {
        let sem = Semaphore::new(0);
        sem.reset(3).unwrap();
        assert_eq!(sem.count(), 3);
        assert_eq!(
            Semaphore::with_order(0, 2, WaitOrder::Fifo)
                .reset(5)
                .unwrap_err(),
            code::EINVAL
        );
    }

    mod in_kernel {
        use super::*;
        use crate::test_support::run_in_kernel;
        use crate::thread::{Builder, Entry};
        use alloc::boxed::Box;
        use alloc::sync::Arc;
        use alloc::vec::Vec;
        use std::sync::Mutex as StdMutex;

        #[test]
        fn timed_acquire_waits_the_full_window() {
            run_in_kernel(|| {
                let sem = Semaphore::new(0);
                let start = time::get_sys_ticks();
                assert_eq!(sem.acquire(10).unwrap_err(), code::ETIMEDOUT);
                let elapsed = time::get_sys_ticks() - start;
                assert!(elapsed >= 10, "gave up after {elapsed} ticks");
                assert!(elapsed < 300, "gave up after {elapsed} ticks");
            });
        }

        #[test]
        fn release_wakes_fifo_waiters_in_arrival_order() {
            run_in_kernel(|| {
                let sem = Arc::new(Semaphore::new(0));
                let order = Arc::new(StdMutex::new(Vec::new()));
                for tag in ["first", "second"] {
                    let sem = sem.clone();
                    let order = order.clone();
                    Builder::new(Entry::Closure(Box::new(move || {
                        sem.acquire(WAITING_FOREVER).unwrap();
                        order.lock().unwrap().push(tag);
                    })))
                    .name(tag)
                    .spawn()
                    .unwrap();
                    // Let the waiter block before the next one arrives.
                    scheduler::msleep(30);
                }
                sem.release().unwrap();
                sem.release().unwrap();
                scheduler::msleep(30);
                assert_eq!(order.lock().unwrap().as_slice(), ["first", "second"]);
            });
        }

        #[test]
        fn priority_order_wakes_the_strongest_waiter() {
            run_in_kernel(|| {
                let sem = Arc::new(Semaphore::with_order(0, usize::MAX, WaitOrder::Priority));
                let order = Arc::new(StdMutex::new(Vec::new()));
                for (tag, prio) in [("weak", 20u8), ("strong", 5u8)] {
                    let sem = sem.clone();
                    let order = order.clone();
                    Builder::new(Entry::Closure(Box::new(move || {
                        sem.acquire(WAITING_FOREVER).unwrap();
                        order.lock().unwrap().push(tag);
                    })))
                    .name(tag)
                    .priority(prio)
                    .spawn()
                    .unwrap();
                    scheduler::msleep(30);
                }
                sem.release().unwrap();
                sem.release().unwrap();
                scheduler::msleep(30);
                assert_eq!(order.lock().unwrap().as_slice(), ["strong", "weak"]);
            });
        }

        #[test]
        fn reset_evicts_waiters_with_eagain() {
            run_in_kernel(|| {
                let sem = Arc::new(Semaphore::new(0));
                let evicted = Arc::new(StdMutex::new(None));
                let (s, e) = (sem.clone(), evicted.clone());
                Builder::new(Entry::Closure(Box::new(move || {
                    *e.lock().unwrap() = Some(s.acquire(WAITING_FOREVER));
                })))
                .name("evictee")
                .spawn()
                .unwrap();
                scheduler::msleep(30);
                sem.reset(0).unwrap();
                scheduler::msleep(30);
                let outcome = evicted.lock().unwrap().take().expect("waiter finished");
                assert_eq!(outcome.unwrap_err(), code::EAGAIN);
            });
        }
    }
}
