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

//! The idle thread: weakest priority, never queued in the ready table, runs
//! the schedule loop whenever nothing else is runnable.

use crate::arch;
use crate::config;
use crate::scheduler;
use crate::sync::SpinLock;
use crate::thread::{self, Builder, Entry, ThreadKind, ThreadNode};

static IDLE_THREAD: spin::Once<ThreadNode> = spin::Once::new();
static IDLE_HOOK: SpinLock<Option<fn()>> = SpinLock::new(None);

/// Runs `hook` on every empty schedule pass, e.g. a power-down hint.
pub fn set_idle_hook(hook: fn()) {
    *IDLE_HOOK.irqsave_lock() = Some(hook);
}

pub(crate) fn idle_thread() -> ThreadNode {
    IDLE_THREAD.get().expect("scheduler not started").clone()
}

/// Builds the idle thread, installs it as the running thread and starts its
/// schedule loop. Called once at kernel init, before interrupts tick.
pub(crate) fn init() {
    let idle = Builder::new(Entry::C(idle_entry))
        .kind(ThreadKind::Idle)
        .name("idle")
        .priority(config::IDLE_THREAD_PRIORITY)
        .stack_size(config::DEFAULT_STACK_SIZE)
        .build()
        .expect("failed to build the idle thread");
    let ok = idle.transfer_state(thread::IDLE, thread::RUNNING);
    debug_assert!(ok);
    scheduler::set_current(idle.clone());
    IDLE_THREAD.call_once(|| idle.clone());
    arch::dispatch(&idle);
}

extern "C" fn idle_entry() {
    loop {
        scheduler::yield_me();
        let hook = *IDLE_HOOK.irqsave_lock();
        match hook {
            Some(hook) => hook(),
            None => arch::idle_wait(),
        }
    }
}
