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

//! Queue of suspended threads attached to an IPC object, always guarded by
//! that object's lock.

use crate::thread::{self, Thread, ThreadNode};
use alloc::collections::VecDeque;

/// Wake order of an IPC object, fixed at creation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WaitOrder {
    Fifo,
    /// Strongest waiter first; FIFO among equals.
    Priority,
}

pub struct WaitQueue {
    order: WaitOrder,
    entries: VecDeque<ThreadNode>,
}

impl WaitQueue {
    pub fn new(order: WaitOrder) -> Self {
        Self {
            order,
            entries: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn insert(&mut self, t: ThreadNode) {
        match self.order {
            WaitOrder::Fifo => self.entries.push_back(t),
            WaitOrder::Priority => {
                let at = self
                    .entries
                    .iter()
                    .position(|other| other.priority() > t.priority())
                    .unwrap_or(self.entries.len());
                self.entries.insert(at, t);
            }
        }
    }

    pub fn pop_front(&mut self) -> Option<ThreadNode> {
        self.entries.pop_front()
    }

    pub fn front(&self) -> Option<&ThreadNode> {
        self.entries.front()
    }

    /// Detaches a specific thread, e.g. after its wait timed out.
    pub fn remove(&mut self, t: &Thread) -> bool {
        let before = self.entries.len();
        self.entries.retain(|other| other.tid() != t.tid());
        self.entries.len() != before
    }

    /// Pops every waiter `matches` accepts, preserving queue order among the
    /// rest.
    pub fn extract(&mut self, mut matches: impl FnMut(&ThreadNode) -> bool) -> VecDeque<ThreadNode> {
        let mut taken = VecDeque::new();
        let mut kept = VecDeque::new();
        while let Some(t) = self.entries.pop_front() {
            if matches(&t) {
                taken.push_back(t);
            } else {
                kept.push_back(t);
            }
        }
        self.entries = kept;
        taken
    }

    /// Wakes the first waiter still waiting. Skips entries whose wait was
    /// already resolved by a racing timeout.
    pub fn wake_one(&mut self) -> Option<ThreadNode> {
        while let Some(t) = self.pop_front() {
            if wake_thread(&t) {
                return Some(t);
            }
        }
        None
    }

    pub fn wake_all(&mut self) -> usize {
        let mut woken = 0;
        while let Some(t) = self.pop_front() {
            if wake_thread(&t) {
                woken += 1;
            }
        }
        woken
    }
}

/// Requeues a suspended thread ready; loser of the race against a timeout
/// callback returns `false`. The winner also stops the thread's wakeup
/// timer.
pub(crate) fn wake_thread(t: &ThreadNode) -> bool {
    if crate::scheduler::queue_ready_thread(thread::SUSPENDED, t.clone()) {
        t.stop_timer();
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadKind;
    use alloc::sync::Arc;

    fn mk(priority: u8) -> ThreadNode {
        Arc::new(Thread::new(ThreadKind::Kernel, priority, 0))
    }

    #[test]
    fn fifo_order_ignores_priority() {
        let mut wq = WaitQueue::new(WaitOrder::Fifo);
        let a = mk(20);
        let b = mk(1);
        wq.insert(a.clone());
        wq.insert(b.clone());
        assert_eq!(wq.pop_front().unwrap().tid(), a.tid());
        assert_eq!(wq.pop_front().unwrap().tid(), b.tid());
    }

    #[test]
    fn priority_order_is_stable_among_equals() {
        let mut wq = WaitQueue::new(WaitOrder::Priority);
        let a = mk(10);
        let b = mk(5);
        let c = mk(10);
        let d = mk(5);
        for t in [&a, &b, &c, &d] {
            wq.insert(t.clone());
        }
        assert_eq!(wq.pop_front().unwrap().tid(), b.tid());
        assert_eq!(wq.pop_front().unwrap().tid(), d.tid());
        assert_eq!(wq.pop_front().unwrap().tid(), a.tid());
        assert_eq!(wq.pop_front().unwrap().tid(), c.tid());
    }

    #[test]
    fn remove_detaches_only_the_target() {
        let mut wq = WaitQueue::new(WaitOrder::Fifo);
        let a = mk(10);
        let b = mk(10);
        wq.insert(a.clone());
        wq.insert(b.clone());
        assert!(wq.remove(&a));
        assert!(!wq.remove(&a));
        assert_eq!(wq.len(), 1);
        assert_eq!(wq.pop_front().unwrap().tid(), b.tid());
    }

    #[test]
    fn extract_partitions_in_order() {
        let mut wq = WaitQueue::new(WaitOrder::Fifo);
        let ids: alloc::vec::Vec<_> = (0u8..4).map(|_| mk(10)).collect();
        for t in &ids {
            wq.insert(t.clone());
        }
        let even: alloc::vec::Vec<u32> = ids.iter().step_by(2).map(|t| t.tid()).collect();
        let taken = wq.extract(|t| even.contains(&t.tid()));
        assert_eq!(taken.len(), 2);
        assert_eq!(wq.len(), 2);
        assert_eq!(taken[0].tid(), ids[0].tid());
        assert_eq!(wq.pop_front().unwrap().tid(), ids[1].tid());
    }
}
