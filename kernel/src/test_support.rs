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

//! Harness for tests that must run *inside* the kernel: the test body is
//! spawned as a kernel thread and its outcome (including a panic) is carried
//! back to the host test thread over a channel.

use crate::thread::{Builder, Entry};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Runs `f` on a default-priority kernel thread and waits for it to finish.
/// Panics in `f` are replayed on the caller; a hung kernel fails the test
/// after a generous deadline instead of wedging the whole run.
pub fn run_in_kernel(f: impl FnOnce() + Send + 'static) {
    init_logging();
    crate::init();
    let (tx, rx) = mpsc::channel();
    Builder::new(Entry::Closure(Box::new(move || {
        let outcome = catch_unwind(AssertUnwindSafe(f));
        let _ = tx.send(outcome);
    })))
    .name("test-body")
    .spawn()
    .expect("failed to spawn the test thread");

    match rx.recv_timeout(Duration::from_secs(60)) {
        Ok(Ok(())) => {}
        Ok(Err(panic)) => std::panic::resume_unwind(panic),
        Err(_) => panic!("test body did not finish within the deadline"),
    }
}
