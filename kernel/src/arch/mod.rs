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

//! Platform port seam.
//!
//! The kernel needs from its platform: an interrupt mask with save/restore
//! nesting, interrupt-nesting bookkeeping, a way to hand the CPU to another
//! thread and a deferred-switch flag for requests made from interrupt
//! context. The in-tree port (`sim`) runs the kernel hosted on std threads;
//! real MCU ports provide the same surface out of tree.

mod context;
pub use context::Context;

#[cfg(any(test, feature = "std"))]
mod sim;
#[cfg(any(test, feature = "std"))]
pub use sim::*;

#[cfg(not(any(test, feature = "std")))]
compile_error!(
    "no platform port selected: enable the `std` feature for the hosted simulator \
     or link an out-of-tree arch layer"
);
