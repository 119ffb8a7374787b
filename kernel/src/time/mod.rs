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

//! System tick and tick arithmetic.

pub mod timer;
pub mod timer_manager;

use crate::config::{MSEC_PER_SEC, TICKS_PER_SECOND};
use core::sync::atomic::{AtomicU64, Ordering};

/// Timeout sentinel: block until the event arrives.
pub const WAITING_FOREVER: usize = usize::MAX;
/// Timeout sentinel: never block.
pub const NO_WAITING: usize = 0;

static SYS_TICKS: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn get_sys_ticks() -> u64 {
    SYS_TICKS.load(Ordering::Acquire)
}

/// Tick heartbeat, called from the clockevent handler in interrupt context:
/// advance the counter, keep the clocksources fresh, expire due timers and
/// request a reschedule when a wakeup happened.
pub fn handle_tick(elapsed: u64) {
    let now = SYS_TICKS.fetch_add(elapsed, Ordering::AcqRel) + elapsed;
    crate::devices::clock::clocksource::update_all();
    if timer_manager::expire_system(now) {
        crate::scheduler::yield_me_now_or_later();
    }
}

/// Ticks covering at least `ms` milliseconds (rounds up, minimum one tick
/// for a non-zero duration).
pub fn tick_from_millisecond(ms: usize) -> usize {
    if ms == 0 {
        return 0;
    }
    let ticks = (ms as u64 * TICKS_PER_SECOND).div_ceil(MSEC_PER_SEC);
    ticks.max(1) as usize
}

pub fn tick_to_millisecond(ticks: usize) -> usize {
    (ticks as u64 * MSEC_PER_SEC / TICKS_PER_SECOND) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_conversion_rounds_up() {
        assert_eq!(tick_from_millisecond(0), 0);
        // One tick is 10ms at 100 ticks/s; anything shorter still waits a
        // full tick.
        assert_eq!(tick_from_millisecond(1), 1);
        assert_eq!(tick_from_millisecond(10), 1);
        assert_eq!(tick_from_millisecond(11), 2);
        assert_eq!(tick_from_millisecond(1000), TICKS_PER_SECOND as usize);
        assert_eq!(tick_to_millisecond(1), 10);
    }

    #[test]
    fn the_system_tick_advances_in_real_time() {
        crate::test_support::init_logging();
        crate::init();
        let start = get_sys_ticks();
        std::thread::sleep(std::time::Duration::from_millis(100));
        let elapsed = get_sys_ticks() - start;
        assert!(elapsed >= 5, "{elapsed} ticks in 100ms");
    }

    #[test]
    fn soft_periodic_timer_fires_until_stopped() {
        use crate::time::timer::{Timer, TimerCallback};
        use alloc::boxed::Box;
        use alloc::sync::Arc;
        use core::sync::atomic::AtomicUsize;

        crate::test_support::init_logging();
        crate::init();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let timer = Timer::new_soft_periodic(
            2,
            TimerCallback::Do(Box::new(move || {
                f.fetch_add(1, Ordering::AcqRel);
            })),
        );
        Timer::start(&timer);
        std::thread::sleep(std::time::Duration::from_millis(200));
        let while_running = fired.load(Ordering::Acquire);
        assert!(while_running >= 3, "fired {while_running} times in 200ms");

        timer.stop();
        std::thread::sleep(std::time::Duration::from_millis(100));
        let after_stop = fired.load(Ordering::Acquire);
        // One expiry may already have been in flight when we stopped.
        assert!(after_stop <= while_running + 1);
    }

    #[test]
    fn hard_oneshot_timer_fires_exactly_once() {
        use crate::time::timer::{Timer, TimerCallback};
        use alloc::boxed::Box;
        use alloc::sync::Arc;
        use core::sync::atomic::AtomicUsize;

        crate::test_support::init_logging();
        crate::init();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let timer = Timer::new_oneshot(
            3,
            TimerCallback::Do(Box::new(move || {
                f.fetch_add(1, Ordering::AcqRel);
            })),
        );
        Timer::start(&timer);
        std::thread::sleep(std::time::Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::Acquire), 1);
        assert!(!timer.is_activated());
    }
}
