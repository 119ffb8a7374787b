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

//! Deadline-ordered timer storage.
//!
//! One manager carries every software timer and delayed thread. Entries are
//! a min-heap on `(deadline, seq)`; `seq` keeps equal deadlines FIFO.
//! Cancelled timers leave stale entries behind which are discarded when
//! they mature.

use crate::sync::SpinLock;
use crate::time::timer::{self, Timer};
use alloc::{collections::BinaryHeap, sync::Arc, vec::Vec};
use core::cmp::Ordering;

struct Entry {
    deadline: u64,
    seq: u64,
    generation: u64,
    timer: Arc<Timer>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

pub struct TimerManager {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl TimerManager {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn schedule(&mut self, timer: Arc<Timer>, deadline: u64, generation: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            deadline,
            seq,
            generation,
            timer,
        });
    }

    /// Earliest pending deadline; may belong to a cancelled timer, in which
    /// case waking for it is harmless.
    pub fn next_deadline(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.deadline)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Pops every entry due at `now`, FIFO within a deadline.
    pub fn take_due(&mut self, now: u64) -> Vec<(Arc<Timer>, u64)> {
        let mut due = Vec::new();
        while let Some(head) = self.heap.peek() {
            if head.deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry");
            due.push((entry.timer, entry.generation));
        }
        due
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

static SYSTEM: spin::Lazy<SpinLock<TimerManager>> =
    spin::Lazy::new(|| SpinLock::new(TimerManager::new()));

pub fn system() -> &'static SpinLock<TimerManager> {
    &SYSTEM
}

/// Matures everything due at `now`: hard timers run in place (tick
/// interrupt context), soft timers are queued for the worker thread.
/// Returns whether any wakeup or callback happened, i.e. whether a
/// reschedule is worth requesting.
pub(crate) fn expire_system(now: u64) -> bool {
    let due = { SYSTEM.irqsave_lock().take_due(now) };
    if due.is_empty() {
        return false;
    }
    let mut activity = false;
    for (matured, generation) in due {
        if timer::is_soft(&matured) {
            soft::defer(matured, generation);
            activity = true;
            continue;
        }
        let (rearm, ran) = timer::run_matured(&matured, generation);
        if let Some((deadline, generation)) = rearm {
            SYSTEM
                .irqsave_lock()
                .schedule(matured.clone(), deadline, generation);
        }
        activity |= ran;
    }
    activity
}

/// Soft-expiry worker: SOFT timer callbacks run on a dedicated kernel
/// thread instead of in interrupt context, so they may block.
pub(crate) mod soft {
    use super::*;
    use crate::sync::Semaphore;
    use crate::thread::{Builder, Entry as ThreadEntry};
    use crate::time::WAITING_FOREVER;
    use alloc::{boxed::Box, collections::VecDeque};

    static PENDING: spin::Lazy<SpinLock<VecDeque<(Arc<Timer>, u64)>>> =
        spin::Lazy::new(|| SpinLock::new(VecDeque::new()));
    static WORK: spin::Lazy<Semaphore> = spin::Lazy::new(|| Semaphore::new(0));

    pub(crate) fn defer(timer: Arc<Timer>, generation: u64) {
        PENDING.irqsave_lock().push_back((timer, generation));
        let _ = WORK.release();
    }

    /// Spawned once at kernel init, strongest priority so soft expiries do
    /// not starve behind application threads.
    pub(crate) fn spawn_worker() {
        Builder::new(ThreadEntry::Closure(Box::new(worker_loop)))
            .name("timerd")
            .priority(1)
            .spawn()
            .expect("failed to spawn the timer worker");
    }

    fn worker_loop() {
        loop {
            let _ = WORK.acquire(WAITING_FOREVER);
            let job = { PENDING.irqsave_lock().pop_front() };
            if let Some((matured, generation)) = job {
                let (rearm, _) = timer::run_matured(&matured, generation);
                if let Some((deadline, generation)) = rearm {
                    system()
                        .irqsave_lock()
                        .schedule(matured.clone(), deadline, generation);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::timer::{TimerCallback, TimerFlags};

    fn armed(interval: usize, deadline: u64) -> (Arc<Timer>, u64) {
        let t = Timer::new_oneshot(interval, TimerCallback::Nothing);
        let generation = {
            let mut inner = t.inner.irqsave_lock();
            inner.generation += 1;
            inner.flags.insert(TimerFlags::ACTIVATED);
            inner.timeout_tick = deadline;
            inner.generation
        };
        (t, generation)
    }

    #[test]
    fn deadlines_mature_in_order_fifo_among_equals() {
        let mut mgr = TimerManager::new();
        let (a, ga) = armed(5, 20);
        let (b, gb) = armed(5, 10);
        let (c, gc) = armed(5, 10);
        mgr.schedule(a.clone(), 20, ga);
        mgr.schedule(b.clone(), 10, gb);
        mgr.schedule(c.clone(), 10, gc);

        assert_eq!(mgr.next_deadline(), Some(10));
        let due = mgr.take_due(9);
        assert!(due.is_empty());

        let due = mgr.take_due(10);
        assert_eq!(due.len(), 2);
        // b was scheduled before c at the same deadline.
        assert!(Arc::ptr_eq(&due[0].0, &b));
        assert!(Arc::ptr_eq(&due[1].0, &c));

        let due = mgr.take_due(100);
        assert_eq!(due.len(), 1);
        assert!(Arc::ptr_eq(&due[0].0, &a));
        assert!(mgr.is_empty());
    }

    #[test]
    fn stale_generation_entries_are_discarded_on_maturity() {
        let mut mgr = TimerManager::new();
        let (t, generation) = armed(5, 10);
        mgr.schedule(t.clone(), 10, generation);
        t.stop();
        let due = mgr.take_due(10);
        assert_eq!(due.len(), 1);
        let (rearm, ran) = timer::run_matured(&due[0].0, due[0].1);
        assert!(rearm.is_none());
        assert!(!ran);
    }
}
