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

use super::{Entry, Stack, Thread, ThreadKind, ThreadNode};
use crate::config;
use crate::error::{code, Error};
use crate::scheduler;
use crate::support::Storage;
use alloc::{boxed::Box, string::String, sync::Arc};

/// Builds a thread: entry, name, priority, stack. The thread is registered
/// but not runnable until [`start`] queues it.
pub struct Builder {
    entry: Entry,
    name: Option<String>,
    kind: ThreadKind,
    priority: u8,
    timeslice: usize,
    stack_size: usize,
    stack_storage: Option<Storage>,
}

impl Builder {
    pub fn new(entry: Entry) -> Self {
        Self {
            entry,
            name: None,
            kind: ThreadKind::Kernel,
            priority: config::DEFAULT_THREAD_PRIORITY,
            timeslice: 0,
            stack_size: config::DEFAULT_STACK_SIZE,
            stack_storage: None,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(String::from(name));
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Accepted for API compatibility; the scheduler currently runs strict
    /// FIFO within a priority and never rotates on the slice.
    pub fn timeslice(mut self, ticks: usize) -> Self {
        self.timeslice = ticks;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// Uses caller-supplied stack memory instead of a kernel allocation; the
    /// caller keeps ownership and must outlive the thread.
    ///
    /// # Safety
    ///
    /// `base..base+size` must stay valid and unaliased for the thread's
    /// lifetime.
    pub unsafe fn stack_memory(mut self, base: *mut u8, size: usize) -> Self {
        self.stack_storage = Some(Storage::from_raw(base, size));
        self
    }

    pub(crate) fn kind(mut self, kind: ThreadKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn build(self) -> Result<ThreadNode, Error> {
        if self.priority > config::MAX_THREAD_PRIORITY {
            return Err(code::EINVAL);
        }
        let storage = match self.stack_storage {
            Some(storage) => {
                if storage.size() < config::MIN_STACK_SIZE {
                    return Err(code::EINVAL);
                }
                storage
            }
            None => {
                let size = self.stack_size.max(config::MIN_STACK_SIZE);
                Storage::alloc(size, config::STACK_ALIGN).ok_or(code::ENOMEM)?
            }
        };

        let (trampoline, arg) = match self.entry {
            Entry::C(f) => (super::run_c_entry as usize, f as usize),
            Entry::Closure(f) => {
                let thin: Box<Box<dyn FnOnce() + Send>> = Box::new(f);
                (super::run_closure_entry as usize, Box::into_raw(thin) as usize)
            }
        };

        let mut stack = Stack::new(storage);
        let sp = stack.init_frame(trampoline, arg);

        let t = Arc::new(Thread::new(self.kind, self.priority, self.timeslice));
        if let Some(name) = &self.name {
            t.set_name(name);
        }
        t.set_stack(stack, sp);
        super::register(t.clone());
        log::trace!("built thread {} prio {}", t.debug_name(), t.priority());
        Ok(t)
    }

    /// Builds and immediately queues the thread ready.
    pub fn spawn(self) -> Result<ThreadNode, Error> {
        let t = self.build()?;
        start(&t)?;
        Ok(t)
    }
}

/// Makes a freshly built thread runnable and reschedules if it is stronger
/// than the caller.
pub fn start(t: &ThreadNode) -> Result<(), Error> {
    if scheduler::queue_ready_thread(super::IDLE, t.clone()) {
        scheduler::yield_me_now_or_later();
        Ok(())
    } else {
        Err(code::EINVAL)
    }
}
