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

use crate::config::NUM_PRIORITIES;
use crate::thread::{Thread, ThreadNode};
use alloc::{collections::VecDeque, sync::Arc};

/// Per-priority FIFO ready queues with an occupancy bitmap; selection is
/// find-first-set over the bitmap, so the strongest non-empty priority wins
/// and equal-priority threads run in insertion order.
pub struct ReadyTable {
    queues: [VecDeque<ThreadNode>; NUM_PRIORITIES],
    active: u32,
}

impl ReadyTable {
    pub fn new() -> Self {
        Self {
            queues: core::array::from_fn(|_| VecDeque::new()),
            active: 0,
        }
    }

    #[inline]
    fn mark(&mut self, priority: usize) {
        if self.queues[priority].is_empty() {
            self.active &= !(1 << priority);
        } else {
            self.active |= 1 << priority;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    pub fn enqueue(&mut self, t: ThreadNode) {
        let priority = t.priority() as usize;
        debug_assert!(priority < NUM_PRIORITIES);
        self.queues[priority].push_back(t);
        self.active |= 1 << priority;
    }

    /// Queues at the head of its priority; used for a preempted thread which
    /// has not finished its turn.
    pub fn enqueue_front(&mut self, t: ThreadNode) {
        let priority = t.priority() as usize;
        debug_assert!(priority < NUM_PRIORITIES);
        self.queues[priority].push_front(t);
        self.active |= 1 << priority;
    }

    fn pop_from_mask(&mut self, mask: u32) -> Option<ThreadNode> {
        let bits = self.active & mask;
        if bits == 0 {
            return None;
        }
        let priority = bits.trailing_zeros() as usize;
        let t = self.queues[priority].pop_front();
        self.mark(priority);
        t
    }

    /// Strongest ready thread, FIFO within its priority.
    pub fn pop_highest(&mut self) -> Option<ThreadNode> {
        self.pop_from_mask(u32::MAX)
    }

    /// Strongest ready thread strictly stronger than `priority`.
    pub fn pop_stronger_than(&mut self, priority: u8) -> Option<ThreadNode> {
        self.pop_from_mask((1u32 << priority) - 1)
    }

    /// Strongest ready thread at least as strong as `priority`.
    pub fn pop_at_least(&mut self, priority: u8) -> Option<ThreadNode> {
        let mask = if priority as usize + 1 >= NUM_PRIORITIES {
            u32::MAX
        } else {
            (1u32 << (priority + 1)) - 1
        };
        self.pop_from_mask(mask)
    }

    pub fn remove(&mut self, t: &Thread) -> bool {
        for priority in 0..NUM_PRIORITIES {
            let queue = &mut self.queues[priority];
            let before = queue.len();
            queue.retain(|other| other.tid() != t.tid());
            if queue.len() != before {
                self.mark(priority);
                return true;
            }
        }
        false
    }
}

impl Default for ReadyTable {
    fn default() -> Self {
        Self::new()
    }
}

// Allow `remove(&Arc<Thread>)` call sites to read naturally.
impl ReadyTable {
    pub fn remove_node(&mut self, t: &ThreadNode) -> bool {
        self.remove(Arc::as_ref(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{Thread, ThreadKind};

    fn mk(priority: u8) -> ThreadNode {
        Arc::new(Thread::new(ThreadKind::Kernel, priority, 0))
    }

    #[test]
    fn strongest_priority_wins() {
        let mut rt = ReadyTable::new();
        let low = mk(20);
        let high = mk(5);
        let mid = mk(10);
        rt.enqueue(low.clone());
        rt.enqueue(high.clone());
        rt.enqueue(mid.clone());
        assert_eq!(rt.pop_highest().unwrap().tid(), high.tid());
        assert_eq!(rt.pop_highest().unwrap().tid(), mid.tid());
        assert_eq!(rt.pop_highest().unwrap().tid(), low.tid());
        assert!(rt.pop_highest().is_none());
        assert!(rt.is_empty());
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut rt = ReadyTable::new();
        let a = mk(7);
        let b = mk(7);
        let c = mk(7);
        rt.enqueue(a.clone());
        rt.enqueue(b.clone());
        rt.enqueue(c.clone());
        assert_eq!(rt.pop_highest().unwrap().tid(), a.tid());
        assert_eq!(rt.pop_highest().unwrap().tid(), b.tid());
        assert_eq!(rt.pop_highest().unwrap().tid(), c.tid());
    }

    #[test]
    fn preempted_thread_resumes_before_its_peers() {
        let mut rt = ReadyTable::new();
        let a = mk(7);
        let b = mk(7);
        rt.enqueue(a.clone());
        rt.enqueue_front(b.clone());
        assert_eq!(rt.pop_highest().unwrap().tid(), b.tid());
    }

    #[test]
    fn bounded_pops_respect_the_threshold() {
        let mut rt = ReadyTable::new();
        let t10 = mk(10);
        rt.enqueue(t10.clone());
        assert!(rt.pop_stronger_than(10).is_none());
        assert!(rt.pop_stronger_than(5).is_none());
        assert_eq!(rt.pop_at_least(10).unwrap().tid(), t10.tid());

        let t3 = mk(3);
        rt.enqueue(t3.clone());
        assert_eq!(rt.pop_stronger_than(10).unwrap().tid(), t3.tid());
    }

    #[test]
    fn remove_unlinks_and_clears_the_bit() {
        let mut rt = ReadyTable::new();
        let a = mk(4);
        let b = mk(4);
        rt.enqueue(a.clone());
        rt.enqueue(b.clone());
        assert!(rt.remove_node(&a));
        assert!(!rt.remove_node(&a));
        assert_eq!(rt.pop_highest().unwrap().tid(), b.tid());
        assert!(rt.is_empty());
    }
}
