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

//! Synchronization and IPC objects.
//!
//! Every object follows the same discipline: one internal spinlock guards
//! its state and wait queues, waiters suspend through
//! `scheduler::suspend_me_with_timeout` while still holding that lock, and
//! wakers settle races against timeouts by the thread-state CAS. The wake
//! order of each object is fixed at creation.

pub mod event_flags;
pub mod mailbox;
pub mod mqueue;
pub mod mutex;
pub mod semaphore;
pub mod spinlock;

pub use event_flags::{EventFlags, EventMode};
pub use mailbox::Mailbox;
pub use mqueue::MessageQueue;
pub use mutex::Mutex;
pub use semaphore::Semaphore;
pub use spinlock::{SpinLock, SpinLockGuard};
