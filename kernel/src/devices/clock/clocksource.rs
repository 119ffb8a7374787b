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

//! Monotonic time over a free-running counter.
//!
//! `gettime` extends a possibly narrow hardware counter into cumulative
//! nanoseconds: deltas against the last baseline are masked to the counter
//! width, so the periodic [`update`](ClockSource::update) from the tick path
//! only has to re-baseline before half the wraparound window elapses and no
//! time is ever lost.

use crate::arch;
use crate::config::{MSEC_PER_SEC, NSEC_PER_MSEC, NSEC_PER_SEC, NSEC_PER_USEC, TICKS_PER_SECOND};
use crate::error::{code, Error};
use crate::sync::SpinLock;
use crate::time;
use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
use emberos_infra::mult_shift::calc_mult_shift;

/// Longest re-baseline window granted to wide counters, in milliseconds.
const MAX_WINDOW_MSEC: u64 = 600_000;
/// Poll budget when probing whether a counter advances at all.
const VALID_POLLS: u32 = 10_000;

pub struct ClockSource {
    name: String,
    rating: u32,
    freq: u32,
    mask: u64,
    mult: u32,
    shift: u32,
    // Reverse direction (nsec -> counts), used by ndelay.
    mult_t: u32,
    shift_t: u32,
    min_nsec: u64,
    max_nsec: u64,
    last_update_count: u64,
    last_update_nsec: u64,
    read: Box<dyn Fn() -> u64 + Send>,
}

impl ClockSource {
    pub fn new(
        name: &str,
        rating: u32,
        freq: u32,
        mask: u64,
        read: Box<dyn Fn() -> u64 + Send>,
    ) -> Self {
        debug_assert!(freq > 0);
        let mut msec = (MSEC_PER_SEC as u128 * mask as u128 / freq as u128).min(u64::MAX as u128) as u64;
        if msec == 0 {
            msec = 1;
        } else if msec > MAX_WINDOW_MSEC && mask > u64::from(u32::MAX) {
            msec = MAX_WINDOW_MSEC;
        }
        let window_sec = (msec / MSEC_PER_SEC) as u32;
        let (mult, shift) = calc_mult_shift(freq, NSEC_PER_SEC as u32, window_sec);
        let (mult_t, shift_t) = calc_mult_shift(NSEC_PER_SEC as u32, freq, window_sec);
        Self {
            name: String::from(name),
            rating,
            freq,
            mask,
            mult,
            shift,
            mult_t,
            shift_t,
            min_nsec: NSEC_PER_SEC / u64::from(freq),
            max_nsec: msec * NSEC_PER_MSEC,
            last_update_count: 0,
            last_update_nsec: 0,
            read,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rating(&self) -> u32 {
        self.rating
    }

    pub fn freq(&self) -> u32 {
        self.freq
    }

    pub fn min_nsec(&self) -> u64 {
        self.min_nsec
    }

    pub fn max_nsec(&self) -> u64 {
        self.max_nsec
    }

    #[inline]
    fn read_counter(&self) -> u64 {
        (self.read)()
    }

    #[inline]
    fn counts_to_nsec(&self, counts: u64) -> u64 {
        (counts & self.mask).wrapping_mul(u64::from(self.mult)) >> self.shift
    }

    /// Cumulative nanoseconds since registration.
    pub fn gettime(&self) -> u64 {
        let delta = self.read_counter().wrapping_sub(self.last_update_count);
        self.last_update_nsec + self.counts_to_nsec(delta)
    }

    /// Re-baselines once more than half the wraparound window has elapsed.
    /// Must run at least once per window or time silently disappears.
    pub fn update(&mut self) {
        let count = self.read_counter();
        let nsec = self.counts_to_nsec(count.wrapping_sub(self.last_update_count));
        if nsec > self.max_nsec / 2 {
            self.last_update_count = count;
            self.last_update_nsec += nsec;
        }
    }

    /// Whether the counter demonstrably advances: two distinct reads within
    /// a bounded poll.
    pub fn valid(&self) -> bool {
        let start = self.read_counter();
        for _ in 0..VALID_POLLS {
            if self.read_counter() != start {
                return true;
            }
            arch::relax();
        }
        false
    }

    /// Busy-waits `nsec` nanoseconds on the counter. Deltas wider than the
    /// counter are walked in half-mask steps so intermediate targets never
    /// alias across a wraparound.
    pub fn ndelay(&self, nsec: u64) {
        let mut target = self.read_counter();
        let mut delta = nsec.wrapping_mul(u64::from(self.mult_t)) >> self.shift_t;
        let half = (self.mask >> 1) + 1;
        while delta > 0 {
            if delta > self.mask {
                target = target.wrapping_add(half);
                delta -= half;
            } else if delta > half {
                target = target.wrapping_add(delta >> 1);
                delta -= delta >> 1;
            } else {
                target = target.wrapping_add(delta);
                delta = 0;
            }
            while (target.wrapping_sub(self.read_counter()) & self.mask) <= half {
                arch::relax();
            }
        }
    }
}

/// Fallback delay when no clocksource is in service: a plain bounded spin.
fn raw_ndelay(nsec: u64) {
    for _ in 0..nsec {
        core::hint::spin_loop();
    }
}

/// Rating-ordered clocksource registry; the head of the list is the source
/// in service.
pub struct ClockSourceSet {
    sources: Vec<Arc<SpinLock<ClockSource>>>,
}

impl ClockSourceSet {
    pub const fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Validates and inserts; a counter that never advances is refused.
    pub fn register(&mut self, cs: ClockSource) -> Result<Arc<SpinLock<ClockSource>>, Error> {
        if !cs.valid() {
            log::warn!("invalid clocksource {}", cs.name());
            return Err(code::EINVAL);
        }
        log::debug!(
            "clocksource {} rating {} freq {} window {}ns",
            cs.name(),
            cs.rating(),
            cs.freq(),
            cs.max_nsec()
        );
        let rating = cs.rating();
        let node = Arc::new(SpinLock::new(cs));
        let at = self
            .sources
            .iter()
            .position(|other| other.irqsave_lock().rating() < rating)
            .unwrap_or(self.sources.len());
        self.sources.insert(at, node.clone());
        Ok(node)
    }

    pub fn best(&self) -> Option<Arc<SpinLock<ClockSource>>> {
        self.sources.first().cloned()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn update_all(&self) {
        for cs in &self.sources {
            cs.irqsave_lock().update();
        }
    }
}

impl Default for ClockSourceSet {
    fn default() -> Self {
        Self::new()
    }
}

static SOURCES: SpinLock<ClockSourceSet> = SpinLock::new(ClockSourceSet::new());

pub fn register(cs: ClockSource) -> Result<Arc<SpinLock<ClockSource>>, Error> {
    SOURCES.irqsave_lock().register(cs)
}

pub fn best() -> Option<Arc<SpinLock<ClockSource>>> {
    SOURCES.irqsave_lock().best()
}

/// Cumulative nanoseconds from the best source, or tick-derived time before
/// any source is in service.
pub fn current_time_nsec() -> u64 {
    match best() {
        Some(cs) => cs.irqsave_lock().gettime(),
        None => time::get_sys_ticks() * NSEC_PER_SEC / TICKS_PER_SECOND,
    }
}

pub fn update_all() {
    SOURCES.irqsave_lock().update_all();
}

pub fn ndelay(nsec: u64) {
    match best() {
        Some(cs) => cs.irqsave_lock().ndelay(nsec),
        None => raw_ndelay(nsec),
    }
}

pub fn us_delay(us: u32) {
    ndelay(u64::from(us) * NSEC_PER_USEC);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU64, Ordering};

    fn stepping_counter(step: u64) -> (Arc<AtomicU64>, Box<dyn Fn() -> u64 + Send>) {
        let raw = Arc::new(AtomicU64::new(0));
        let reader = raw.clone();
        (
            raw,
            Box::new(move || reader.fetch_add(step, Ordering::AcqRel)),
        )
    }

    fn held_counter() -> (Arc<AtomicU64>, Box<dyn Fn() -> u64 + Send>) {
        let raw = Arc::new(AtomicU64::new(0));
        let reader = raw.clone();
        (raw, Box::new(move || reader.load(Ordering::Acquire)))
    }

    #[test]
    fn window_is_clamped_to_at_least_one_msec() {
        let (_, read) = held_counter();
        // 4-bit counter at 1MHz wraps in 16us; window still 1ms.
        let cs = ClockSource::new("tiny", 100, 1_000_000, 0xF, read);
        assert_eq!(cs.max_nsec(), NSEC_PER_MSEC);
        assert_eq!(cs.min_nsec(), 1_000);
    }

    #[test]
    fn wide_counter_window_is_capped() {
        let (_, read) = held_counter();
        let cs = ClockSource::new("wide", 100, 1_000_000, u64::MAX, read);
        assert_eq!(cs.max_nsec(), MAX_WINDOW_MSEC * NSEC_PER_MSEC);
    }

    #[test]
    fn narrow_32bit_counter_keeps_its_natural_window() {
        let (_, read) = held_counter();
        // 2^32 counts at 1MHz is ~4295s; mask does not exceed 32 bits, so
        // no cap applies.
        let cs = ClockSource::new("u32", 100, 1_000_000, u64::from(u32::MAX), read);
        assert!(cs.max_nsec() > MAX_WINDOW_MSEC * NSEC_PER_MSEC);
    }

    #[test]
    fn gettime_advances_with_the_counter() {
        let (raw, read) = held_counter();
        let cs = ClockSource::new("probe", 100, 1_000_000, u64::from(u32::MAX), read);
        let t0 = cs.gettime();
        raw.store(1_000, Ordering::Release); // 1000us
        let t1 = cs.gettime();
        assert!(t1 > t0);
        let elapsed = t1 - t0;
        assert!(
            (999_000..=1_001_000).contains(&elapsed),
            "elapsed {elapsed}ns"
        );
    }

    #[test]
    fn time_survives_wraparound_with_periodic_update() {
        let (raw, read) = held_counter();
        // 16-bit counter at 1MHz: wraps every ~65ms.
        let mut cs = ClockSource::new("wrap", 100, 1_000_000, 0xFFFF, read);
        let mut simulated: u64 = 0;
        let mut last = cs.gettime();
        // Step 40000 counts (40ms) at a time, past several wraparounds,
        // re-baselining in between like the tick path does.
        for _ in 0..8 {
            simulated += 40_000;
            raw.store(simulated & 0xFFFF, Ordering::Release);
            cs.update();
            let now = cs.gettime();
            assert!(now >= last, "time went backwards: {last} -> {now}");
            last = now;
        }
        let expected = simulated * 1_000; // 1us per count
        let drift = last.abs_diff(expected);
        assert!(drift < NSEC_PER_MSEC, "drift {drift}ns after wraparounds");
    }

    #[test]
    fn registration_refuses_a_stuck_counter() {
        let (_, read) = held_counter();
        let mut set = ClockSourceSet::new();
        let err = set
            .register(ClockSource::new("stuck", 100, 1_000_000, 0xFFFF, read))
            .unwrap_err();
        assert_eq!(err, code::EINVAL);
        assert!(set.is_empty());
    }

    #[test]
    fn best_is_the_highest_rating() {
        let mut set = ClockSourceSet::new();
        let (_, read) = stepping_counter(7);
        set.register(ClockSource::new("weak", 100, 1_000_000, 0xFFFF, read))
            .unwrap();
        let (_, read) = stepping_counter(7);
        set.register(ClockSource::new("strong", 400, 1_000_000, 0xFFFF, read))
            .unwrap();
        let (_, read) = stepping_counter(7);
        set.register(ClockSource::new("middle", 250, 1_000_000, 0xFFFF, read))
            .unwrap();
        assert_eq!(set.len(), 3);
        let best = set.best().unwrap();
        assert_eq!(best.irqsave_lock().name(), "strong");
    }

    #[test]
    fn ndelay_terminates_across_wraparound() {
        // Counter advances 500 counts per read; 16-bit mask. A delay longer
        // than the counter width must still terminate via half-mask steps.
        let (_, read) = stepping_counter(500);
        let cs = ClockSource::new("delay", 100, 1_000_000, 0xFFFF, read);
        cs.ndelay(200_000_000); // 200ms => ~200000 counts, >> mask
        cs.ndelay(1_000); // short path
    }
}
