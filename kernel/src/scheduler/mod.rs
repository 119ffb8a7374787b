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

//! Priority-preemptive scheduler.
//!
//! Exactly one thread is RUNNING at a time; everything runnable sits in the
//! ready table. Suspension always goes through [`suspend_me_for`] or
//! [`suspend_me_with_timeout`]; waking always goes through
//! [`queue_ready_thread`], whose state CAS settles races between an event
//! wake and a timeout callback. Both sides of every switch get a stack
//! health check; a violation dumps the thread list and panics.

pub(crate) mod idle;
pub mod ready_queue;
pub mod wait_queue;

pub use wait_queue::{WaitOrder, WaitQueue};

use crate::arch;
use crate::config;
use crate::error::{code, Error};
use crate::irq;
use crate::sync::{SpinLock, SpinLockGuard};
use crate::thread::{self, ThreadNode};
use crate::time::{self, timer::Timer, timer::TimerCallback, WAITING_FOREVER};
use alloc::{boxed::Box, sync::Arc};
use core::sync::atomic::{AtomicBool, Ordering};
use ready_queue::ReadyTable;

static READY: spin::Lazy<SpinLock<ReadyTable>> =
    spin::Lazy::new(|| SpinLock::new(ReadyTable::new()));
static CURRENT: spin::Lazy<SpinLock<Option<ThreadNode>>> =
    spin::Lazy::new(|| SpinLock::new(None));

pub fn current_thread() -> ThreadNode {
    try_current_thread().expect("scheduler not started")
}

pub fn try_current_thread() -> Option<ThreadNode> {
    CURRENT.irqsave_lock().clone()
}

pub(crate) fn set_current(t: ThreadNode) {
    *CURRENT.irqsave_lock() = Some(t);
}

/// Moves `t` from `old_state` to READY and queues it. Returns `false` when
/// someone else already transitioned the thread; the loser must not touch
/// it further.
pub fn queue_ready_thread(old_state: thread::State, t: ThreadNode) -> bool {
    if !t.transfer_state(old_state, thread::READY) {
        return false;
    }
    debug_assert!(!t.is_idle());
    READY.irqsave_lock().enqueue(t);
    true
}

/// Voluntarily gives the CPU to the strongest ready thread of at least our
/// own priority; with equals this rotates FIFO.
pub fn yield_me() {
    debug_assert!(!irq::is_in_irq());
    let me = current_thread();
    let next = {
        let mut rt = READY.irqsave_lock();
        let Some(next) = rt.pop_at_least(me.priority()) else {
            return;
        };
        let ok = me.transfer_state(thread::RUNNING, thread::READY);
        debug_assert!(ok);
        if !me.is_idle() {
            rt.enqueue(me.clone());
        }
        next
    };
    transfer_to(&me, next);
}

/// Reschedules right away when called from thread context, or records a
/// deferred switch when called from an interrupt handler; real ports consume
/// the flag in the ISR epilogue, the simulator at the next switch point.
pub fn yield_me_now_or_later() {
    if irq::is_in_irq() || !arch::on_kernel_thread() {
        arch::pend_switch_context();
        return;
    }
    if try_current_thread().is_none() {
        return;
    }
    preempt_to_stronger();
}

fn preempt_to_stronger() {
    let me = current_thread();
    let next = {
        let mut rt = READY.irqsave_lock();
        let Some(next) = rt.pop_stronger_than(me.priority()) else {
            return;
        };
        let ok = me.transfer_state(thread::RUNNING, thread::READY);
        debug_assert!(ok);
        // The preempted thread has not finished its turn.
        if !me.is_idle() {
            rt.enqueue_front(me.clone());
        }
        next
    };
    transfer_to(&me, next);
}

fn arm_timeout(me: &ThreadNode, ticks: usize) -> Option<Arc<AtomicBool>> {
    if ticks == WAITING_FOREVER {
        return None;
    }
    let timed_out = Arc::new(AtomicBool::new(false));
    let waiter = me.clone();
    let flag = timed_out.clone();
    let timer = Timer::new_oneshot(
        ticks,
        TimerCallback::Do(Box::new(move || {
            // Only the transition winner reports the timeout.
            if queue_ready_thread(thread::SUSPENDED, waiter.clone()) {
                flag.store(true, Ordering::Release);
            }
        })),
    );
    me.set_timer(timer.clone());
    Timer::start(&timer);
    Some(timed_out)
}

/// Suspends the caller for `ticks` (or until [`resume_thread`] when
/// `WAITING_FOREVER`). Returns whether the wakeup came from the timeout.
pub fn suspend_me_for(ticks: usize) -> bool {
    debug_assert!(!irq::is_in_irq());
    if ticks == time::NO_WAITING {
        yield_me();
        return false;
    }
    let me = current_thread();
    let ok = me.transfer_state(thread::RUNNING, thread::SUSPENDED);
    debug_assert!(ok);
    let timed_out = arm_timeout(&me, ticks);
    schedule_away(&me);
    me.clear_timer();
    timed_out.is_some_and(|flag| flag.load(Ordering::Acquire))
}

/// Sleeps for at least `ms` milliseconds.
pub fn msleep(ms: usize) {
    suspend_me_for(time::tick_from_millisecond(ms));
}

/// Blocks the caller after it has queued itself on a wait queue protected by
/// `guard`. The state transition happens before the guard drops, so a waker
/// that grabs the object lock right after us cannot lose the wakeup.
/// Returns `true` when the wait timed out.
pub fn suspend_me_with_timeout<T>(guard: SpinLockGuard<'_, T>, ticks: usize) -> bool {
    debug_assert!(!irq::is_in_irq());
    debug_assert!(ticks != time::NO_WAITING);
    let me = current_thread();
    let ok = me.transfer_state(thread::RUNNING, thread::SUSPENDED);
    debug_assert!(ok);
    let timed_out = arm_timeout(&me, ticks);
    drop(guard);
    schedule_away(&me);
    me.clear_timer();
    timed_out.is_some_and(|flag| flag.load(Ordering::Acquire))
}

/// Suspends an arbitrary thread: the caller itself, or a READY thread which
/// is then pulled out of the ready table.
pub fn suspend_thread(t: &ThreadNode) -> Result<(), Error> {
    if t.is_idle() {
        return Err(code::EPERM);
    }
    let me = current_thread();
    if Arc::ptr_eq(&me, t) {
        let ok = me.transfer_state(thread::RUNNING, thread::SUSPENDED);
        debug_assert!(ok);
        schedule_away(&me);
        return Ok(());
    }
    if t.transfer_state(thread::READY, thread::SUSPENDED) {
        READY.irqsave_lock().remove_node(t);
        Ok(())
    } else {
        Err(code::EBUSY)
    }
}

pub fn resume_thread(t: &ThreadNode) -> Result<(), Error> {
    if queue_ready_thread(thread::SUSPENDED, t.clone()) {
        yield_me_now_or_later();
        Ok(())
    } else {
        Err(code::EINVAL)
    }
}

pub enum TaskControl {
    SetPriority(u8),
}

pub fn control(t: &ThreadNode, cmd: TaskControl) -> Result<(), Error> {
    match cmd {
        TaskControl::SetPriority(priority) => set_thread_priority(t, priority),
    }
}

pub fn set_thread_priority(t: &ThreadNode, priority: u8) -> Result<(), Error> {
    if priority > config::MAX_THREAD_PRIORITY {
        return Err(code::EINVAL);
    }
    {
        let mut rt = READY.irqsave_lock();
        if rt.remove_node(t) {
            t.set_priority(priority);
            rt.enqueue(t.clone());
        } else {
            t.set_priority(priority);
        }
    }
    if !irq::is_in_irq() && try_current_thread().is_some() {
        preempt_to_stronger();
    }
    Ok(())
}

/// Ends the calling thread: cleanup hook, registry removal, final switch.
/// The entry trampolines land here when the entry function returns.
pub fn retire_me() {
    debug_assert!(!irq::is_in_irq());
    let me = current_thread();
    let ok = me.transfer_state(thread::RUNNING, thread::RETIRED);
    debug_assert!(ok);
    if let Some(cleanup) = me.take_cleanup() {
        cleanup();
    }
    thread::unregister(&me);
    log::trace!("thread {} retired", me.debug_name());
    schedule_away(&me);
}

fn schedule_away(me: &ThreadNode) {
    let next = { READY.irqsave_lock().pop_highest() }.unwrap_or_else(idle::idle_thread);
    transfer_to(me, next);
}

fn transfer_to(me: &ThreadNode, next: ThreadNode) {
    if Arc::ptr_eq(me, &next) {
        // Woken again before we ever left the CPU.
        let ok = next.transfer_state(thread::READY, thread::RUNNING);
        debug_assert!(ok);
    } else {
        assert_stack_healthy(me);
        assert_stack_healthy(&next);
        let ok = next.transfer_state(thread::READY, thread::RUNNING);
        debug_assert!(ok, "incoming thread not ready: {:?}", next);
        set_current(next.clone());
        log::trace!("switch {} -> {}", me.tid(), next.tid());
        arch::dispatch(&next);
        if me.state() == thread::RETIRED {
            return;
        }
        arch::wait_for_turn(me);
    }
    honor_deferred_switch();
}

/// Acts on a reschedule that was pended while the caller was off the CPU or
/// in a context that could not switch.
fn honor_deferred_switch() {
    if arch::take_pending_switch() {
        preempt_to_stronger();
    }
}

fn assert_stack_healthy(t: &ThreadNode) {
    if t.stack_healthy() {
        return;
    }
    log::error!("stack overflow on thread {}", t.debug_name());
    thread::dump_threads();
    panic!("stack overflow on thread {}", t.debug_name());
}
