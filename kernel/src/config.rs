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

//! Build-time kernel configuration.

/// Numerically largest (weakest) thread priority. Priority 0 is the
/// strongest; the idle thread runs at the weakest.
pub const MAX_THREAD_PRIORITY: u8 = 31;
pub const NUM_PRIORITIES: usize = MAX_THREAD_PRIORITY as usize + 1;
pub const IDLE_THREAD_PRIORITY: u8 = MAX_THREAD_PRIORITY;
pub const DEFAULT_THREAD_PRIORITY: u8 = 15;

pub const TICKS_PER_SECOND: u64 = 100;

pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;
pub const MIN_STACK_SIZE: usize = 1024;

/// Byte pattern filling the guard band at the stack base; a switch-time
/// check panics when it has been overwritten.
pub const STACK_SENTINEL: u8 = b'#';
pub const STACK_GUARD_SIZE: usize = 8;
pub const STACK_ALIGN: usize = 16;

/// Fabricated register frames are filled with this so a task consuming an
/// uninitialized register faults recognizably.
pub const REGISTER_POISON: usize = 0xdead_beef;

pub const NSEC_PER_SEC: u64 = 1_000_000_000;
pub const NSEC_PER_MSEC: u64 = 1_000_000;
pub const NSEC_PER_USEC: u64 = 1_000;
pub const MSEC_PER_SEC: u64 = 1_000;
