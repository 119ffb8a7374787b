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

//! Fixed-point rate conversion factors.
//!
//! `value_to * 2^shift / value_from` approximated as `value * mult >> shift`,
//! with `shift` chosen as large as possible while `value * mult` still fits
//! in 64 bits for every `value` up to `max_seconds * value_from`.

/// Computes `(mult, shift)` such that `x * mult >> shift` converts a quantity
/// counted in `from` units per second into `to` units per second, without
/// 64-bit overflow for inputs spanning up to `max_seconds` seconds.
pub fn calc_mult_shift(from: u32, to: u32, max_seconds: u32) -> (u32, u32) {
    // How many of the 64 bits the product may occupy before it would
    // overflow for the largest expected input.
    let mut accuracy = 32u32;
    let mut tmp = (u64::from(max_seconds) * u64::from(from)) >> 32;
    while tmp > 0 {
        tmp >>= 1;
        accuracy -= 1;
    }

    let mut sft = 32u32;
    while sft > 0 {
        tmp = u64::from(to) << sft;
        tmp += u64::from(from / 2);
        tmp /= u64::from(from);
        if (tmp >> accuracy) == 0 {
            break;
        }
        sft -= 1;
    }
    (tmp as u32, sft)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NSEC_PER_SEC: u32 = 1_000_000_000;

    #[test]
    fn cycles_to_nsec_close_to_exact() {
        // 24 MHz counter, one hour of range.
        let (mult, shift) = calc_mult_shift(24_000_000, NSEC_PER_SEC, 3600);
        let cycles: u64 = 24_000_000; // one second
        let nsec = cycles * u64::from(mult) >> shift;
        let err = nsec.abs_diff(u64::from(NSEC_PER_SEC));
        assert!(err < 100, "1s converted to {nsec}ns");
    }

    #[test]
    fn no_overflow_within_advertised_range() {
        for &(freq, secs) in &[(1_000u32, 1u32), (32_768, 600), (1_000_000, 600), (168_000_000, 3600)] {
            let (mult, shift) = calc_mult_shift(freq, NSEC_PER_SEC, secs);
            let max_cycles = u64::from(secs) * u64::from(freq);
            // The product must not wrap for any input in range.
            assert!(
                max_cycles.checked_mul(u64::from(mult)).is_some(),
                "freq={freq} secs={secs} mult={mult} shift={shift}"
            );
        }
    }

    #[test]
    fn reverse_direction_roundtrips() {
        let freq = 1_000_000u32;
        let (mult, shift) = calc_mult_shift(freq, NSEC_PER_SEC, 600);
        let (mult_t, shift_t) = calc_mult_shift(NSEC_PER_SEC, freq, 600);
        let cycles = 12_345u64;
        let nsec = cycles * u64::from(mult) >> shift;
        let back = nsec * u64::from(mult_t) >> shift_t;
        assert!(back.abs_diff(cycles) <= 1, "{cycles} -> {nsec} -> {back}");
    }
}
