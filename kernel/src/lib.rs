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

//! EmberOS: a priority-preemptive RTOS kernel.
//!
//! The kernel proper is `no_std` over `alloc`; the `std` feature selects the
//! hosted simulator port, which backs each kernel thread with a host thread
//! and drives the system tick from a pretend timer interrupt. Real ports
//! supply the same `arch` surface for their targets.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod devices;
pub mod error;
pub mod irq;
pub mod scheduler;
pub mod support;
pub mod sync;
pub mod thread;
pub mod time;

pub use error::{code, Error};

#[cfg(any(test, feature = "std"))]
static BOOT: spin::Once<()> = spin::Once::new();

/// Brings the hosted kernel up: idle thread, soft-timer worker, clock
/// devices and the system tick. Idempotent; every test entry point calls it.
#[cfg(any(test, feature = "std"))]
pub fn init() {
    BOOT.call_once(|| {
        scheduler::idle::init();
        time::timer_manager::soft::spawn_worker();
        devices::clock::sim::init();
        log::info!("kernel up");
    });
}

#[cfg(test)]
mod test_support;
