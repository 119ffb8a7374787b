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

//! Interrupt-context tracking.
//!
//! Interrupt handlers bracket their work with [`enter`]/[`leave`]; blocking
//! kernel calls consult [`is_in_irq`] and refuse with `ENOTSUP` inside a
//! handler. The counter lives in the arch layer: per-CPU on real ports,
//! per host thread on the simulation port.

use crate::arch;

#[inline]
pub fn enter() {
    arch::irq_nesting_enter();
}

#[inline]
pub fn leave() {
    arch::irq_nesting_leave();
}

#[inline]
pub fn nesting() -> usize {
    arch::irq_nesting()
}

#[inline]
pub fn is_in_irq() -> bool {
    nesting() > 0
}
