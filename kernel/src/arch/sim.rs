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

//! Hosted simulation port.
//!
//! Every kernel thread is backed by a host (std) thread that is allowed to
//! run only while it holds the baton: a per-thread latched gate. A context
//! switch opens the gate of the incoming thread and parks the outgoing one
//! on its own gate, so at most one kernel thread executes at a time and the
//! single-RUNNING invariant carries over from real ports. The gate is a
//! latch on purpose: a thread that is woken before it has finished parking
//! simply falls straight through its next wait.
//!
//! Interrupt masking has no hosted equivalent; the save/restore tokens keep
//! their nesting semantics over a per-host-thread depth counter and mutual
//! exclusion comes from the spinlocks layered on top.

use crate::arch::Context;
use crate::thread::ThreadNode;
use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

std::thread_local! {
    static IRQ_MASK_DEPTH: Cell<usize> = const { Cell::new(0) };
    static IRQ_NESTING: Cell<usize> = const { Cell::new(0) };
    static ON_KERNEL_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling host thread carries a kernel thread. Host threads
/// outside the scheduler (test harness, device pollers) may poke kernel
/// objects but must never context-switch; they defer via the pend flag.
pub fn on_kernel_thread() -> bool {
    ON_KERNEL_THREAD.with(|k| k.get())
}

/// Opaque prior-masking-state token returned by [`local_irq_save`].
#[must_use]
pub struct IrqLevel(usize);

pub fn local_irq_save() -> IrqLevel {
    IRQ_MASK_DEPTH.with(|d| {
        let prev = d.get();
        d.set(prev + 1);
        IrqLevel(prev)
    })
}

pub fn local_irq_restore(level: IrqLevel) {
    IRQ_MASK_DEPTH.with(|d| {
        debug_assert_eq!(d.get(), level.0 + 1);
        d.set(level.0);
    });
}

pub fn local_irq_enabled() -> bool {
    IRQ_MASK_DEPTH.with(|d| d.get() == 0)
}

pub fn irq_nesting_enter() {
    IRQ_NESTING.with(|d| d.set(d.get() + 1));
}

pub fn irq_nesting_leave() {
    IRQ_NESTING.with(|d| {
        debug_assert!(d.get() > 0);
        d.set(d.get() - 1);
    });
}

pub fn irq_nesting() -> usize {
    IRQ_NESTING.with(|d| d.get())
}

static PENDING_SWITCH: AtomicBool = AtomicBool::new(false);

/// Records that a reschedule was requested in a context that cannot switch
/// (interrupt handler, preemption disabled). Consumed at the next switch
/// point.
pub fn pend_switch_context() {
    PENDING_SWITCH.store(true, Ordering::Release);
}

pub fn take_pending_switch() -> bool {
    PENDING_SWITCH.swap(false, Ordering::AcqRel)
}

struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            open: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn open(&self) {
        let mut open = self.open.lock().unwrap();
        *open = true;
        self.cond.notify_one();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cond.wait(open).unwrap();
        }
        *open = false;
    }
}

/// Per-thread port state embedded in the TCB.
pub struct PortThread {
    started: AtomicBool,
    gate: Gate,
}

impl PortThread {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            gate: Gate::new(),
        }
    }
}

impl Default for PortThread {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands the CPU to `next`: lazily spawns its host thread on first dispatch,
/// then opens its gate.
pub(crate) fn dispatch(next: &ThreadNode) {
    let port = next.port();
    if !port.started.swap(true, Ordering::AcqRel) {
        let t = next.clone();
        std::thread::Builder::new()
            .name(t.debug_name())
            .spawn(move || host_entry(t))
            .expect("failed to spawn host thread");
    }
    port.gate.open();
}

/// Parks the calling host thread until its kernel thread is dispatched
/// again.
pub(crate) fn wait_for_turn(me: &ThreadNode) {
    me.port().gate.wait();
}

fn host_entry(t: ThreadNode) {
    ON_KERNEL_THREAD.with(|k| k.set(true));
    wait_for_turn(&t);
    let (entry, arg) = {
        let frame = unsafe { &*(t.saved_sp() as *const Context) };
        (frame.return_address, frame.arg)
    };
    let entry: extern "C" fn(usize) = unsafe { core::mem::transmute(entry) };
    // The trampoline retires the thread before returning here.
    entry(arg);
}

/// What the idle loop does when there is nothing to run.
pub fn idle_wait() {
    std::thread::sleep(Duration::from_micros(200));
}

/// Polite busy-wait step for bounded validation/delay loops.
pub fn relax() {
    std::thread::yield_now();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_level_tokens_nest() {
        assert!(local_irq_enabled());
        let a = local_irq_save();
        let b = local_irq_save();
        assert!(!local_irq_enabled());
        local_irq_restore(b);
        assert!(!local_irq_enabled());
        local_irq_restore(a);
        assert!(local_irq_enabled());
    }

    #[test]
    fn pend_flag_is_consumed_once() {
        pend_switch_context();
        assert!(take_pending_switch());
    }

    #[test]
    fn gate_is_a_latch() {
        let gate = std::sync::Arc::new(Gate::new());
        // Open before wait: the waiter falls straight through.
        gate.open();
        gate.wait();

        let g2 = gate.clone();
        let h = std::thread::spawn(move || g2.wait());
        std::thread::sleep(Duration::from_millis(10));
        gate.open();
        h.join().unwrap();
    }
}
