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

//! Thread control block and its state machine.

mod builder;
pub use builder::Builder;

use crate::arch::{self, Context};
use crate::config;
use crate::support::{DisableInterruptGuard, Storage};
use crate::sync::SpinLock;
use crate::time::timer::Timer;
use alloc::{
    boxed::Box,
    format,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use core::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};

pub type ThreadNode = Arc<Thread>;

pub type State = u8;
/// Built but never started.
pub const IDLE: State = 0;
pub const READY: State = 1;
pub const RUNNING: State = 2;
pub const SUSPENDED: State = 3;
pub const RETIRED: State = 4;

pub fn state_name(state: State) -> &'static str {
    match state {
        IDLE => "idle",
        READY => "ready",
        RUNNING => "running",
        SUSPENDED => "suspended",
        RETIRED => "retired",
        _ => "corrupt",
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThreadKind {
    Kernel,
    /// The schedule-loop thread; never enters the ready table.
    Idle,
}

/// What a thread starts executing. The closure form is consumed on entry;
/// both forms fall into `scheduler::retire_me` when they return.
pub enum Entry {
    C(extern "C" fn()),
    Closure(Box<dyn FnOnce() + Send + 'static>),
}

pub(crate) extern "C" fn run_c_entry(entry: usize) {
    let f: extern "C" fn() = unsafe { core::mem::transmute(entry) };
    f();
    crate::scheduler::retire_me();
}

pub(crate) extern "C" fn run_closure_entry(raw: usize) {
    let f = unsafe { Box::from_raw(raw as *mut Box<dyn FnOnce() + Send>) };
    f();
    crate::scheduler::retire_me();
}

/// Thread stack over [`Storage`] with a sentinel guard band at the base.
pub struct Stack {
    storage: Storage,
}

impl Stack {
    pub fn new(storage: Storage) -> Self {
        let mut stack = Self { storage };
        stack.write_sentinel();
        stack
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.storage.base() as usize
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.base() + self.storage.size()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.storage.size()
    }

    pub fn is_kernel_owned(&self) -> bool {
        self.storage.is_kernel_owned()
    }

    fn write_sentinel(&mut self) {
        let base = self.storage.base();
        for i in 0..config::STACK_GUARD_SIZE.min(self.size()) {
            unsafe { base.add(i).write(config::STACK_SENTINEL) };
        }
    }

    pub fn sentinel_intact(&self) -> bool {
        let base = self.storage.base();
        (0..config::STACK_GUARD_SIZE.min(self.size()))
            .all(|i| unsafe { base.add(i).read() } == config::STACK_SENTINEL)
    }

    /// Whether a saved stack pointer lies inside the usable region above the
    /// guard band.
    pub fn holds(&self, sp: usize) -> bool {
        sp >= self.base() + config::STACK_GUARD_SIZE && sp <= self.top()
    }

    /// Fabricates the initial register frame at the (aligned) stack top and
    /// returns the resulting stack pointer.
    pub fn init_frame(&mut self, return_address: usize, arg: usize) -> usize {
        let top = self.top() & !(config::STACK_ALIGN - 1);
        let sp = (top - core::mem::size_of::<Context>()) & !(config::STACK_ALIGN - 1);
        debug_assert!(self.holds(sp));
        let frame = sp as *mut Context;
        unsafe { (*frame).init(return_address, arg) };
        sp
    }
}

struct ThreadInner {
    name: Option<String>,
    stack: Option<Stack>,
    saved_sp: usize,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
    timer: Option<Arc<Timer>>,
    // Pending event-flags wait, written by the owner before it suspends and
    // read back after it wakes. Guarded by the owning EventFlags lock.
    event_mask: u32,
    event_mode: u8,
    event_matched: u32,
}

pub struct Thread {
    tid: u32,
    kind: ThreadKind,
    state: AtomicU8,
    priority: AtomicU8,
    origin_priority: AtomicU8,
    /// Round-robin budget; stored for the task API but unused while the
    /// scheduler runs strict FIFO within a priority.
    timeslice: AtomicUsize,
    inner: SpinLock<ThreadInner>,
    port: arch::PortThread,
}

static NEXT_TID: AtomicU32 = AtomicU32::new(1);

impl Thread {
    pub(crate) fn new(kind: ThreadKind, priority: u8, timeslice: usize) -> Self {
        Self {
            tid: NEXT_TID.fetch_add(1, Ordering::AcqRel),
            kind,
            state: AtomicU8::new(IDLE),
            priority: AtomicU8::new(priority),
            origin_priority: AtomicU8::new(priority),
            timeslice: AtomicUsize::new(timeslice),
            inner: SpinLock::new(ThreadInner {
                name: None,
                stack: None,
                saved_sp: 0,
                cleanup: None,
                timer: None,
                event_mask: 0,
                event_mode: 0,
                event_matched: 0,
            }),
            port: arch::PortThread::new(),
        }
    }

    #[inline]
    pub fn tid(&self) -> u32 {
        self.tid
    }

    #[inline]
    pub fn kind(&self) -> ThreadKind {
        self.kind
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.kind == ThreadKind::Idle
    }

    pub(crate) fn port(&self) -> &arch::PortThread {
        &self.port
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state.load(Ordering::Acquire)
    }

    /// Moves `from -> to` atomically; fails when the thread is no longer in
    /// `from`, which is how racing wakers (release vs. timeout) settle who
    /// wins.
    pub fn transfer_state(&self, from: State, to: State) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn priority(&self) -> u8 {
        self.priority.load(Ordering::Acquire)
    }

    pub(crate) fn set_priority(&self, priority: u8) {
        self.priority.store(priority, Ordering::Release);
    }

    #[inline]
    pub fn origin_priority(&self) -> u8 {
        self.origin_priority.load(Ordering::Acquire)
    }

    #[inline]
    pub fn timeslice(&self) -> usize {
        self.timeslice.load(Ordering::Acquire)
    }

    pub fn name(&self) -> Option<String> {
        self.inner.irqsave_lock().name.clone()
    }

    pub fn debug_name(&self) -> String {
        match self.name() {
            Some(name) => format!("{}-{}", self.tid, name),
            None => format!("{}", self.tid),
        }
    }

    pub(crate) fn set_name(&self, name: &str) {
        self.inner.irqsave_lock().name = Some(name.to_string());
    }

    pub(crate) fn set_stack(&self, stack: Stack, saved_sp: usize) {
        let mut inner = self.inner.irqsave_lock();
        inner.stack = Some(stack);
        inner.saved_sp = saved_sp;
    }

    pub(crate) fn saved_sp(&self) -> usize {
        self.inner.irqsave_lock().saved_sp
    }

    pub fn stack_size(&self) -> usize {
        self.inner.irqsave_lock().stack.as_ref().map_or(0, Stack::size)
    }

    pub(crate) fn stack_base(&self) -> usize {
        self.inner.irqsave_lock().stack.as_ref().map_or(0, Stack::base)
    }

    /// Switch-time health check: guard band intact and the saved stack
    /// pointer within bounds.
    pub fn stack_healthy(&self) -> bool {
        let inner = self.inner.irqsave_lock();
        match &inner.stack {
            Some(stack) => stack.sentinel_intact() && stack.holds(inner.saved_sp),
            None => true,
        }
    }

    pub fn set_cleanup(&self, cleanup: Box<dyn FnOnce() + Send>) {
        self.inner.irqsave_lock().cleanup = Some(cleanup);
    }

    pub(crate) fn take_cleanup(&self) -> Option<Box<dyn FnOnce() + Send>> {
        self.inner.irqsave_lock().cleanup.take()
    }

    pub(crate) fn set_timer(&self, timer: Arc<Timer>) {
        self.inner.irqsave_lock().timer = Some(timer);
    }

    pub(crate) fn clear_timer(&self) {
        self.inner.irqsave_lock().timer = None;
    }

    /// Stops the pending wakeup timer, if any. Wakers call this so a thread
    /// woken by its event does not also get a stale timeout callback.
    pub(crate) fn stop_timer(&self) {
        let timer = self.inner.irqsave_lock().timer.take();
        if let Some(timer) = timer {
            timer.stop();
        }
    }

    pub(crate) fn set_event_wait(&self, mask: u32, mode: u8) {
        let mut inner = self.inner.irqsave_lock();
        inner.event_mask = mask;
        inner.event_mode = mode;
        inner.event_matched = 0;
    }

    pub(crate) fn event_wait(&self) -> (u32, u8) {
        let inner = self.inner.irqsave_lock();
        (inner.event_mask, inner.event_mode)
    }

    pub(crate) fn set_event_matched(&self, matched: u32) {
        self.inner.irqsave_lock().event_matched = matched;
    }

    pub(crate) fn take_event_matched(&self) -> u32 {
        let mut inner = self.inner.irqsave_lock();
        core::mem::take(&mut inner.event_matched)
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("state", &state_name(self.state()))
            .field("priority", &self.priority())
            .finish()
    }
}

static THREADS: spin::Lazy<SpinLock<Vec<ThreadNode>>> =
    spin::Lazy::new(|| SpinLock::new(Vec::new()));

pub(crate) fn register(t: ThreadNode) {
    THREADS.irqsave_lock().push(t);
}

pub(crate) fn unregister(t: &ThreadNode) {
    THREADS
        .irqsave_lock()
        .retain(|other| !Arc::ptr_eq(other, t));
}

/// Looks a live thread up by name.
pub fn find_thread(name: &str) -> Option<ThreadNode> {
    THREADS
        .irqsave_lock()
        .iter()
        .find(|t| t.name().as_deref() == Some(name))
        .cloned()
}

/// Logs every registered thread. Called on fatal errors before panicking.
pub fn dump_threads() {
    let _guard = DisableInterruptGuard::new();
    let threads = THREADS.irqsave_lock();
    log::error!("{} threads:", threads.len());
    for t in threads.iter() {
        log::error!(
            "  tid={} name={} state={} prio={} stack_size={}",
            t.tid(),
            t.name().unwrap_or_default(),
            state_name(t.state()),
            t.priority(),
            t.stack_size(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_settles_races_by_cas() {
        let t = Thread::new(ThreadKind::Kernel, 10, 0);
        assert_eq!(t.state(), IDLE);
        assert!(t.transfer_state(IDLE, READY));
        assert!(t.transfer_state(READY, RUNNING));
        assert!(t.transfer_state(RUNNING, SUSPENDED));
        assert!(t.transfer_state(SUSPENDED, READY));
        // Second waker loses.
        assert!(!t.transfer_state(SUSPENDED, READY));
    }

    #[test]
    fn fresh_stack_has_sentinel_and_poisoned_frame() {
        let storage = Storage::alloc(4096, config::STACK_ALIGN).unwrap();
        let mut stack = Stack::new(storage);
        assert!(stack.sentinel_intact());
        let sp = stack.init_frame(0xabcd, 42);
        assert_eq!(sp % config::STACK_ALIGN, 0);
        assert!(stack.holds(sp));
        let frame = unsafe { &*(sp as *const Context) };
        assert_eq!(frame.return_address, 0xabcd);
        assert_eq!(frame.arg, 42);
        assert!(frame
            .callee_saved
            .iter()
            .all(|&r| r == config::REGISTER_POISON));
    }

    #[test]
    fn scribbled_guard_band_is_detected() {
        let storage = Storage::alloc(2048, config::STACK_ALIGN).unwrap();
        let mut stack = Stack::new(storage);
        let sp = stack.init_frame(0, 0);
        let base = stack.base();
        let t = Thread::new(ThreadKind::Kernel, 10, 0);
        t.set_stack(stack, sp);
        assert!(t.stack_healthy());
        unsafe { (base as *mut u8).write(0xff) };
        assert!(!t.stack_healthy());
    }

    #[test]
    fn registry_finds_by_name_until_unregistered() {
        let t = Arc::new(Thread::new(ThreadKind::Kernel, 10, 0));
        t.set_name("registry-probe");
        register(t.clone());
        let found = find_thread("registry-probe").unwrap();
        assert_eq!(found.tid(), t.tid());
        unregister(&t);
        assert!(find_thread("registry-probe").is_none());
    }
}
