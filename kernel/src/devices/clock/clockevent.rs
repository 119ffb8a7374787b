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

//! Programmable timer interrupts.
//!
//! A clockevent turns a hardware count-down device into nanosecond-dated
//! interrupts. Devices with period support and a wide enough counter run in
//! auto-period mode; everything else is reprogrammed in oneshot mode on
//! every expiry, with catch-up when the deadline already passed.

use crate::config::{NSEC_PER_MSEC, NSEC_PER_SEC};
use crate::devices::clock::clocksource;
use crate::error::{code, Error};
use crate::irq;
use crate::sync::SpinLock;
use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};
use emberos_infra::mult_shift::calc_mult_shift;

/// Guard window: a deadline closer than this is treated as already due,
/// since programming the device takes time too.
const PROGRAM_GUARD_NSEC: u64 = 5_000;
/// Poll budget when probing whether a device can deliver an interrupt.
const VALID_POLLS: u32 = 1_000_000;

/// One hardware count-down timer. `start` programs a prescaler and an
/// initial count and lets it run; the device calls [`isr`] on expiry.
pub trait ClockEventDevice: Send {
    fn start(&mut self, prescaler: u32, count: u64);
    fn stop(&mut self);
    /// Current residual count, for devices that expose it.
    fn read(&self) -> u64 {
        0
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClockEventFeature {
    Oneshot,
    Period,
}

pub type EventHandler = Arc<dyn Fn() + Send + Sync>;

pub struct ClockEvent {
    name: String,
    rating: u32,
    freq: u32,
    count_bits: u32,
    count_mask: u64,
    prescaler_mask: u32,
    feature: ClockEventFeature,
    mult: u32,
    shift: u32,
    min_nsec: u64,
    max_nsec: u64,
    next_nsec: u64,
    period_nsec: u64,
    period_count: u64,
    prescaler: u32,
    count: u64,
    handler: Option<EventHandler>,
    dev: Box<dyn ClockEventDevice>,
}

impl ClockEvent {
    pub fn new(
        name: &str,
        rating: u32,
        freq: u32,
        count_bits: u32,
        prescaler_bits: u32,
        feature: ClockEventFeature,
        dev: Box<dyn ClockEventDevice>,
    ) -> Self {
        debug_assert!(freq > 0);
        debug_assert!(count_bits > 0 && count_bits <= 64);
        let count_mask = if count_bits == 64 {
            u64::MAX
        } else {
            (1u64 << count_bits) - 1
        };
        let prescaler_mask = if prescaler_bits >= 32 {
            u32::MAX
        } else {
            (1u32 << prescaler_bits) - 1
        };
        let mut msec = count_mask / u64::from(freq);
        if msec == 0 {
            msec = 1;
        } else if msec > 600_000 && count_mask > u64::from(u32::MAX) {
            msec = 600_000;
        }
        let (mult, shift) = calc_mult_shift(NSEC_PER_SEC as u32, freq, (msec / 1_000) as u32);
        Self {
            name: String::from(name),
            rating,
            freq,
            count_bits,
            count_mask,
            prescaler_mask,
            feature,
            mult,
            shift,
            min_nsec: NSEC_PER_SEC / u64::from(freq),
            max_nsec: msec * NSEC_PER_MSEC,
            next_nsec: 0,
            period_nsec: 0,
            period_count: 0,
            prescaler: 0,
            count: 0,
            handler: None,
            dev,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rating(&self) -> u32 {
        self.rating
    }

    pub fn min_nsec(&self) -> u64 {
        self.min_nsec
    }

    pub fn max_nsec(&self) -> u64 {
        self.max_nsec
    }

    pub fn set_handler(&mut self, handler: Option<EventHandler>) {
        if self.handler.is_some() && handler.is_some() {
            log::warn!("clockevent {} handler replaced", self.name);
        }
        self.handler = handler;
    }

    pub fn read(&self) -> u64 {
        self.dev.read()
    }

    /// Whether the device runs free after one programming, i.e. periodic
    /// hardware whose period fits the counter.
    fn auto_period(&self) -> bool {
        self.feature == ClockEventFeature::Period
            && self.period_count != 0
            && (self.period_count & !self.count_mask) == 0
    }

    fn nsec_to_count(&self, nsec: u64) -> u64 {
        nsec.wrapping_mul(u64::from(self.mult)) >> self.shift
    }

    /// Picks prescaler and count for the next expiry relative to `now_nsec`.
    /// Returns how many periods already lapsed, i.e. how many handler
    /// invocations the caller owes.
    fn calc_param(&mut self, now_nsec: u64) -> i32 {
        let mut trig_isr = 0;

        if self.next_nsec <= now_nsec + PROGRAM_GUARD_NSEC {
            if self.period_nsec == 0 {
                self.count = 0;
                return 1;
            }
            while self.next_nsec <= now_nsec {
                self.next_nsec += self.period_nsec;
                trig_isr += 1;
            }
        }

        let (prescaler, count) = if self.auto_period() {
            (1 & self.prescaler_mask, self.period_count)
        } else {
            let nsec = (self.next_nsec - now_nsec).max(self.min_nsec);
            let evt = self.nsec_to_count(nsec);
            if evt & !self.count_mask == 0 {
                (1 & self.prescaler_mask, evt)
            } else if (evt & self.count_mask) > self.count_mask / 2
                || (evt >> self.count_bits) > 1
            {
                // Too far out for the bare counter: stretch with the
                // prescaler at full count.
                (
                    ((evt >> self.count_bits) as u32) & self.prescaler_mask,
                    self.count_mask,
                )
            } else {
                (1 & self.prescaler_mask, self.count_mask / 2)
            }
        };

        self.prescaler = prescaler;
        self.count = count.max(1);
        trig_isr
    }

    fn next(&mut self, now_nsec: u64, force_trig: bool) -> i32 {
        let trig_isr = self.calc_param(now_nsec);
        if self.count != 0 {
            self.dev.start(self.prescaler, self.count);
        } else if force_trig {
            self.prescaler = 1 & self.prescaler_mask;
            self.count = 1;
            self.dev.start(self.prescaler, self.count);
        }
        trig_isr
    }

    /// Fires once, `nsec` from now.
    pub fn start_oneshot(&mut self, nsec: u64) {
        let nsec = nsec.max(self.min_nsec);
        self.next_nsec = clocksource::current_time_nsec() + nsec;
        self.period_nsec = 0;
        self.period_count = 0;
        self.next(clocksource::current_time_nsec(), true);
    }

    /// Fires every `nsec` until stopped.
    pub fn start_period(&mut self, nsec: u64) {
        let nsec = nsec.max(self.min_nsec);
        self.next_nsec = clocksource::current_time_nsec() + nsec;
        self.period_nsec = nsec;
        self.period_count = self.nsec_to_count(nsec).max(1);
        self.next(clocksource::current_time_nsec(), true);
    }

    pub fn stop(&mut self) {
        self.next_nsec = 0;
        self.period_nsec = 0;
        self.dev.stop();
    }
}

/// Device expiry entry point. Auto-period devices just run the handler;
/// oneshot devices are stopped, reprogrammed for the next deadline, and the
/// handler runs once per lapsed period.
pub fn isr(ce: &Arc<SpinLock<ClockEvent>>) {
    let (handler, trig) = {
        let mut guard = ce.irqsave_lock();
        if guard.auto_period() {
            (guard.handler.clone(), 1)
        } else {
            guard.dev.stop();
            let trig = guard.next(clocksource::current_time_nsec(), false);
            (guard.handler.clone(), trig)
        }
    };
    if trig != 0 {
        if let Some(handler) = handler {
            irq::enter();
            for _ in 0..trig {
                handler();
            }
            irq::leave();
        }
    }
}

/// Rating-ordered clockevent registry. Unlike clocksources, candidates can
/// only be validated by actually taking an interrupt, so the best device is
/// chosen explicitly once the drivers are up.
pub struct ClockEventSet {
    events: Vec<Arc<SpinLock<ClockEvent>>>,
    best: Option<Arc<SpinLock<ClockEvent>>>,
}

impl ClockEventSet {
    pub const fn new() -> Self {
        Self {
            events: Vec::new(),
            best: None,
        }
    }

    pub fn register(&mut self, ce: ClockEvent) -> Arc<SpinLock<ClockEvent>> {
        log::debug!(
            "clockevent {} rating {} freq {} window {}ns",
            ce.name(),
            ce.rating(),
            ce.freq,
            ce.max_nsec()
        );
        let rating = ce.rating();
        let node = Arc::new(SpinLock::new(ce));
        let at = self
            .events
            .iter()
            .position(|other| other.irqsave_lock().rating() < rating)
            .unwrap_or(self.events.len());
        self.events.insert(at, node.clone());
        node
    }

    /// Probes candidates in rating order; the first that demonstrably
    /// delivers an interrupt becomes the device in service.
    pub fn select_best(&mut self) -> Result<Arc<SpinLock<ClockEvent>>, Error> {
        if let Some(prev) = self.best.take() {
            let mut guard = prev.irqsave_lock();
            guard.stop();
            guard.set_handler(None);
        }
        for ce in &self.events {
            if Self::validate(ce) {
                self.best = Some(ce.clone());
                return Ok(ce.clone());
            }
            log::warn!("invalid clockevent {}", ce.irqsave_lock().name());
        }
        Err(code::ENOENT)
    }

    fn validate(ce: &Arc<SpinLock<ClockEvent>>) -> bool {
        let fired = Arc::new(AtomicBool::new(false));
        {
            let flag = fired.clone();
            let mut guard = ce.irqsave_lock();
            guard.handler = Some(Arc::new(move || {
                flag.store(true, Ordering::Release);
            }));
            let prescaler = 1 & guard.prescaler_mask;
            guard.dev.start(prescaler, 1);
        }
        let mut ok = false;
        for _ in 0..VALID_POLLS {
            if fired.load(Ordering::Acquire) {
                ok = true;
                break;
            }
            crate::arch::relax();
        }
        let mut guard = ce.irqsave_lock();
        guard.dev.stop();
        guard.handler = None;
        ok
    }

    pub fn best(&self) -> Option<Arc<SpinLock<ClockEvent>>> {
        self.best.clone()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for ClockEventSet {
    fn default() -> Self {
        Self::new()
    }
}

static EVENTS: SpinLock<ClockEventSet> = SpinLock::new(ClockEventSet::new());

pub fn register(ce: ClockEvent) -> Arc<SpinLock<ClockEvent>> {
    EVENTS.irqsave_lock().register(ce)
}

pub fn select_best() -> Result<Arc<SpinLock<ClockEvent>>, Error> {
    EVENTS.irqsave_lock().select_best()
}

pub fn best() -> Option<Arc<SpinLock<ClockEvent>>> {
    EVENTS.irqsave_lock().best()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use spin::Mutex;

    #[derive(Default)]
    struct Recording {
        starts: Vec<(u32, u64)>,
        stops: usize,
    }

    struct RecordingDevice(Arc<Mutex<Recording>>);

    impl ClockEventDevice for RecordingDevice {
        fn start(&mut self, prescaler: u32, count: u64) {
            self.0.lock().starts.push((prescaler, count));
        }
        fn stop(&mut self) {
            self.0.lock().stops += 1;
        }
    }

    fn event(freq: u32, count_bits: u32, feature: ClockEventFeature) -> (ClockEvent, Arc<Mutex<Recording>>) {
        let rec = Arc::new(Mutex::new(Recording::default()));
        let ce = ClockEvent::new(
            "mock",
            300,
            freq,
            count_bits,
            8,
            feature,
            Box::new(RecordingDevice(rec.clone())),
        );
        (ce, rec)
    }

    #[test]
    fn oneshot_deadline_in_range_uses_plain_count() {
        let (mut ce, _) = event(1_000_000, 32, ClockEventFeature::Oneshot);
        // 1ms out at 1MHz is 1000 counts, well within 32 bits.
        ce.next_nsec = 10_000_000;
        ce.period_nsec = 0;
        let trig = ce.calc_param(9_000_000);
        assert_eq!(trig, 0);
        assert_eq!(ce.prescaler, 1);
        let drift = ce.count.abs_diff(1_000);
        assert!(drift <= 1, "count {}", ce.count);
    }

    #[test]
    fn lapsed_oneshot_fires_immediately() {
        let (mut ce, _) = event(1_000_000, 32, ClockEventFeature::Oneshot);
        ce.next_nsec = 1_000;
        ce.period_nsec = 0;
        let trig = ce.calc_param(500_000);
        assert_eq!(trig, 1);
        assert_eq!(ce.count, 0);
    }

    #[test]
    fn periodic_catch_up_counts_lapsed_periods() {
        let (mut ce, _) = event(1_000_000, 32, ClockEventFeature::Oneshot);
        ce.next_nsec = 1_000_000;
        ce.period_nsec = 1_000_000; // 1ms period
        // now is 3.5ms: periods at 1, 2, 3ms lapsed.
        let trig = ce.calc_param(3_500_000);
        assert_eq!(trig, 3);
        assert_eq!(ce.next_nsec, 4_000_000);
        assert!(ce.count > 0);
    }

    #[test]
    fn auto_period_reuses_the_period_count() {
        let (mut ce, _) = event(1_000_000, 32, ClockEventFeature::Period);
        ce.next_nsec = 20_000_000;
        ce.period_nsec = 10_000_000;
        ce.period_count = 10_000;
        assert!(ce.auto_period());
        let trig = ce.calc_param(12_000_000);
        assert_eq!(trig, 0);
        assert_eq!(ce.count, 10_000);
        assert_eq!(ce.prescaler, 1);
    }

    #[test]
    fn overlong_deadline_stretches_with_the_prescaler() {
        // 16-bit counter at 1MHz: 65ms max per count cycle.
        let (mut ce, _) = event(1_000_000, 16, ClockEventFeature::Oneshot);
        ce.next_nsec = 1_000_000_000; // 1s out
        ce.period_nsec = 0;
        let trig = ce.calc_param(0);
        assert_eq!(trig, 0);
        // ~1e6 counts needed; counter holds 65535, so either the prescaler
        // stretches at full count or the half-mask fallback runs.
        assert!(ce.count == ce.count_mask || ce.count == ce.count_mask / 2);
        assert!(ce.count != 0);
    }

    #[test]
    fn start_period_programs_the_device() {
        let (mut ce, rec) = event(1_000_000, 32, ClockEventFeature::Period);
        ce.start_period(10_000_000); // 10ms
        let rec = rec.lock();
        assert_eq!(rec.starts.len(), 1);
        let (prescaler, count) = rec.starts[0];
        assert_eq!(prescaler, 1);
        let drift = count.abs_diff(10_000);
        assert!(drift <= 1, "count {count}");
        assert_eq!(ce.period_count, count);
    }

    #[test]
    fn stop_halts_the_device_and_clears_the_schedule() {
        let (mut ce, rec) = event(1_000_000, 32, ClockEventFeature::Oneshot);
        ce.start_oneshot(5_000_000);
        ce.stop();
        assert_eq!(ce.next_nsec, 0);
        assert_eq!(ce.period_nsec, 0);
        assert_eq!(rec.lock().stops, 1);
    }

    #[test]
    fn registry_orders_by_rating() {
        let mut set = ClockEventSet::new();
        let (weak, _) = event(1_000_000, 32, ClockEventFeature::Oneshot);
        let weak = ClockEvent { rating: 100, ..weak };
        let (strong, _) = event(1_000_000, 32, ClockEventFeature::Oneshot);
        let strong = ClockEvent {
            rating: 400,
            ..strong
        };
        set.register(weak);
        set.register(strong);
        assert_eq!(set.len(), 2);
        assert_eq!(set.events[0].irqsave_lock().rating(), 400);
    }
}
