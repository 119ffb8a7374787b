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

//! Hosted clock devices.
//!
//! The clocksource is a 32-bit microsecond counter over `std::time::Instant`.
//! The clockevent is a pretend count-down timer: a poller thread watches the
//! armed deadline and raises the expiry from outside the kernel threads,
//! which is exactly the asynchrony a hardware timer interrupt has.

use crate::config::{NSEC_PER_SEC, TICKS_PER_SECOND};
use crate::devices::clock::clockevent::{
    self, ClockEvent, ClockEventDevice, ClockEventFeature,
};
use crate::devices::clock::clocksource::{self, ClockSource};
use crate::sync::SpinLock;
use crate::time;
use alloc::{boxed::Box, sync::Arc};
use std::time::{Duration, Instant};

const SIM_FREQ: u32 = 1_000_000; // 1MHz, one count per microsecond
const NSEC_PER_COUNT: u64 = NSEC_PER_SEC / SIM_FREQ as u64;
const POLL_INTERVAL: Duration = Duration::from_micros(200);

static EPOCH: spin::Lazy<Instant> = spin::Lazy::new(Instant::now);

fn counter_now() -> u64 {
    (EPOCH.elapsed().as_micros() as u64) & u64::from(u32::MAX)
}

struct Armed {
    deadline: Instant,
    /// Reload interval while the device runs in auto-period mode.
    period: Duration,
}

struct SimTimerState {
    armed: spin::Mutex<Option<Armed>>,
}

struct SimTimerDevice(Arc<SimTimerState>);

impl ClockEventDevice for SimTimerDevice {
    fn start(&mut self, prescaler: u32, count: u64) {
        let nsec = count * u64::from(prescaler.max(1)) * NSEC_PER_COUNT;
        let period = Duration::from_nanos(nsec);
        *self.0.armed.lock() = Some(Armed {
            deadline: Instant::now() + period,
            period,
        });
    }

    fn stop(&mut self) {
        *self.0.armed.lock() = None;
    }
}

/// Runs on its own host thread for the life of the process, standing in for
/// the interrupt controller.
fn poller(state: Arc<SimTimerState>, ce: Arc<SpinLock<ClockEvent>>) {
    loop {
        let due = {
            let mut armed = state.armed.lock();
            match armed.as_mut() {
                Some(slot) if Instant::now() >= slot.deadline => {
                    // Hardware auto-reload; a oneshot user reprograms or
                    // stops the device from the isr anyway.
                    slot.deadline += slot.period;
                    true
                }
                _ => false,
            }
        };
        if due {
            clockevent::isr(&ce);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

static BOOT: spin::Once<()> = spin::Once::new();

/// Registers the hosted clock devices, brings the best clockevent into
/// service, and starts the periodic system tick.
pub fn init() {
    BOOT.call_once(|| {
        clocksource::register(ClockSource::new(
            "sim-instant",
            400,
            SIM_FREQ,
            u64::from(u32::MAX),
            Box::new(counter_now),
        ))
        .expect("hosted clocksource failed validation");

        let state = Arc::new(SimTimerState {
            armed: spin::Mutex::new(None),
        });
        let ce = clockevent::register(ClockEvent::new(
            "sim-timer",
            400,
            SIM_FREQ,
            32,
            8,
            ClockEventFeature::Period,
            Box::new(SimTimerDevice(state.clone())),
        ));

        {
            let state = state.clone();
            let ce = ce.clone();
            std::thread::Builder::new()
                .name("clock-sim".into())
                .spawn(move || poller(state, ce))
                .expect("failed to spawn the clock poller");
        }

        let best = clockevent::select_best().expect("no usable clockevent");
        {
            let mut guard = best.irqsave_lock();
            guard.set_handler(Some(Arc::new(|| time::handle_tick(1))));
            guard.start_period(NSEC_PER_SEC / TICKS_PER_SECOND);
        }
        log::info!(
            "system tick running at {}Hz on {}",
            TICKS_PER_SECOND,
            best.irqsave_lock().name()
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_advances_in_microseconds() {
        let a = counter_now();
        std::thread::sleep(Duration::from_millis(2));
        let b = counter_now();
        let elapsed = b.wrapping_sub(a) & u64::from(u32::MAX);
        assert!((1_000..100_000).contains(&elapsed), "elapsed {elapsed}us");
    }

    #[test]
    fn armed_device_reloads_on_expiry() {
        let state = Arc::new(SimTimerState {
            armed: spin::Mutex::new(None),
        });
        let mut dev = SimTimerDevice(state.clone());
        dev.start(1, 500); // 500us
        std::thread::sleep(Duration::from_millis(1));
        {
            let mut armed = state.armed.lock();
            let slot = armed.as_mut().unwrap();
            assert!(Instant::now() >= slot.deadline);
            assert_eq!(slot.period, Duration::from_micros(500));
        }
        dev.stop();
        assert!(state.armed.lock().is_none());
    }

    #[test]
    fn kernel_clock_advances_monotonically() {
        crate::test_support::init_logging();
        crate::init();
        let t0 = clocksource::current_time_nsec();
        std::thread::sleep(Duration::from_millis(5));
        let t1 = clocksource::current_time_nsec();
        assert!(t1 > t0);
        assert!(t1 - t0 >= 4_000_000, "advanced {}ns in 5ms", t1 - t0);
    }

    #[test]
    fn ndelay_spins_for_wall_time() {
        crate::test_support::init_logging();
        crate::init();
        let before = Instant::now();
        clocksource::ndelay(2_000_000);
        assert!(before.elapsed() >= Duration::from_micros(1_500));
    }
}
