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

use crate::config::REGISTER_POISON;

/// Default status word for a fresh frame (thumb-state bit on Cortex-M-class
/// ports; ignored by the simulator).
pub const INITIAL_STATUS: usize = 0x0100_0000;

/// Saved register frame fabricated at the top of a fresh thread stack.
///
/// Callee-saved registers are poisoned so that an entry function consuming a
/// register it never wrote faults on a recognizable value instead of
/// garbage.
#[repr(C)]
pub struct Context {
    pub callee_saved: [usize; 8],
    /// First argument register: trampoline argument.
    pub arg: usize,
    /// Link register: poisoned, a task entry must never return through it.
    pub link: usize,
    /// Program counter: the entry trampoline.
    pub return_address: usize,
    pub status: usize,
}

impl Context {
    pub fn init(&mut self, return_address: usize, arg: usize) {
        self.callee_saved = [REGISTER_POISON; 8];
        self.arg = arg;
        self.link = REGISTER_POISON;
        self.return_address = return_address;
        self.status = INITIAL_STATUS;
    }
}
