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

//! Software timers.
//!
//! A timer never sits in an intrusive list; the manager holds `(deadline,
//! generation)` entries and [`Timer::stop`] simply bumps the generation, so
//! cancelled entries are skipped lazily when they surface. Expiry callbacks
//! run in tick-interrupt context unless the timer is SOFT, in which case
//! they are handed to the timer worker thread.

use crate::error::{code, Error};
use crate::scheduler::wait_queue;
use crate::sync::SpinLock;
use crate::thread::ThreadNode;
use crate::time;
use alloc::{boxed::Box, sync::Arc};
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct TimerFlags: u8 {
        const ACTIVATED = 1 << 0;
        const PERIODIC = 1 << 1;
        /// Expiry callback runs on the timer worker thread instead of in
        /// interrupt context.
        const SOFT = 1 << 2;
    }
}

pub enum TimerCallback {
    Nothing,
    /// Requeue a suspended thread ready.
    Wake(ThreadNode),
    Do(Box<dyn Fn() + Send>),
}

pub(crate) struct TimerInner {
    pub flags: TimerFlags,
    /// Interval in ticks; the period for periodic timers.
    pub interval: usize,
    /// Absolute expiry tick while activated.
    pub timeout_tick: u64,
    /// Bumped on every start/stop; manager entries carrying an older value
    /// are dead.
    pub generation: u64,
    pub callback: TimerCallback,
}

pub struct Timer {
    pub(crate) inner: SpinLock<TimerInner>,
}

impl Timer {
    fn make(interval: usize, flags: TimerFlags, callback: TimerCallback) -> Arc<Self> {
        Arc::new(Self {
            inner: SpinLock::new(TimerInner {
                flags,
                interval,
                timeout_tick: 0,
                generation: 0,
                callback,
            }),
        })
    }

    pub fn new_oneshot(ticks: usize, callback: TimerCallback) -> Arc<Self> {
        Self::make(ticks, TimerFlags::empty(), callback)
    }

    pub fn new_periodic(ticks: usize, callback: TimerCallback) -> Arc<Self> {
        Self::make(ticks, TimerFlags::PERIODIC, callback)
    }

    pub fn new_soft_periodic(ticks: usize, callback: TimerCallback) -> Arc<Self> {
        Self::make(ticks, TimerFlags::PERIODIC | TimerFlags::SOFT, callback)
    }

    pub fn new_soft_oneshot(ticks: usize, callback: TimerCallback) -> Arc<Self> {
        Self::make(ticks, TimerFlags::SOFT, callback)
    }

    /// Arms the timer `interval` ticks from now. Restarting an armed timer
    /// reschedules it; the superseded deadline dies by generation.
    pub fn start(me: &Arc<Self>) {
        let (deadline, generation) = {
            let mut inner = me.inner.irqsave_lock();
            inner.generation += 1;
            inner.flags.insert(TimerFlags::ACTIVATED);
            inner.timeout_tick = time::get_sys_ticks() + inner.interval as u64;
            (inner.timeout_tick, inner.generation)
        };
        time::timer_manager::system()
            .irqsave_lock()
            .schedule(me.clone(), deadline, generation);
    }

    pub fn stop(&self) {
        let mut inner = self.inner.irqsave_lock();
        inner.flags.remove(TimerFlags::ACTIVATED);
        inner.generation += 1;
    }

    pub fn is_activated(&self) -> bool {
        self.inner
            .irqsave_lock()
            .flags
            .contains(TimerFlags::ACTIVATED)
    }

    pub fn timeout_tick(&self) -> Option<u64> {
        let inner = self.inner.irqsave_lock();
        inner
            .flags
            .contains(TimerFlags::ACTIVATED)
            .then_some(inner.timeout_tick)
    }

    /// Reconfigures a stopped timer.
    pub fn control(&self, cmd: TimerControl) -> Result<(), Error> {
        let mut inner = self.inner.irqsave_lock();
        if inner.flags.contains(TimerFlags::ACTIVATED) {
            return Err(code::EBUSY);
        }
        match cmd {
            TimerControl::SetTicks(ticks) => {
                if ticks == 0 || ticks == time::WAITING_FOREVER {
                    return Err(code::EINVAL);
                }
                inner.interval = ticks;
            }
            TimerControl::SetOneshot => inner.flags.remove(TimerFlags::PERIODIC),
            TimerControl::SetPeriodic => inner.flags.insert(TimerFlags::PERIODIC),
        }
        Ok(())
    }
}

pub enum TimerControl {
    SetTicks(usize),
    SetOneshot,
    SetPeriodic,
}

/// Runs one matured manager entry: decides under the timer lock, invokes the
/// callback outside it. Returns the follow-up deadline for a periodic timer
/// and whether a callback actually ran.
pub(crate) fn run_matured(timer: &Arc<Timer>, generation: u64) -> (Option<(u64, u64)>, bool) {
    let (callback, rearm) = {
        let mut inner = timer.inner.irqsave_lock();
        if inner.generation != generation || !inner.flags.contains(TimerFlags::ACTIVATED) {
            return (None, false);
        }
        let rearm = if inner.flags.contains(TimerFlags::PERIODIC) {
            inner.timeout_tick += inner.interval as u64;
            Some((inner.timeout_tick, generation))
        } else {
            inner.flags.remove(TimerFlags::ACTIVATED);
            None
        };
        (
            core::mem::replace(&mut inner.callback, TimerCallback::Nothing),
            rearm,
        )
    };

    let ran = match &callback {
        TimerCallback::Nothing => false,
        TimerCallback::Wake(t) => wait_queue::wake_thread(t),
        TimerCallback::Do(f) => {
            f();
            true
        }
    };

    // Reinstall so the timer can be started again. Nothing else writes the
    // callback slot after construction.
    let mut inner = timer.inner.irqsave_lock();
    if matches!(inner.callback, TimerCallback::Nothing) {
        inner.callback = callback;
    }
    (rearm, ran)
}

pub(crate) fn is_soft(timer: &Arc<Timer>) -> bool {
    timer.inner.irqsave_lock().flags.contains(TimerFlags::SOFT)
}
