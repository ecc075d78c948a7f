use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};

pub const SUSPEND_FLAG_SUSPEND: u32 = 0x1;
pub const SUSPEND_FLAG_TERMINATE: u32 = 0x2;

/// Outcome of a suspension poll.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SuspendOutcome {
    Continue,
    Terminated,
}

/// Per-executor suspend/terminate signalling used by the thread
/// manager. The dispatcher polls at call and branch boundaries; a
/// suspended executor parks on the condition variable until resumed or
/// terminated.
#[derive(Default)]
pub struct SuspendState {
    flags: AtomicU32,
    wait_lock: Mutex<()>,
    wait_cond: Condvar,
}

impl SuspendState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_suspend(&self) {
        self.flags.fetch_or(SUSPEND_FLAG_SUSPEND, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        let _guard = self.wait_lock.lock().expect("wait lock poisoned");
        self.flags.fetch_and(!SUSPEND_FLAG_SUSPEND, Ordering::SeqCst);
        self.wait_cond.notify_all();
    }

    pub fn request_terminate(&self) {
        let _guard = self.wait_lock.lock().expect("wait lock poisoned");
        self.flags.fetch_or(SUSPEND_FLAG_TERMINATE, Ordering::SeqCst);
        self.wait_cond.notify_all();
    }

    pub fn is_terminate_requested(&self) -> bool {
        self.flags.load(Ordering::SeqCst) & SUSPEND_FLAG_TERMINATE != 0
    }

    /// Called by the executor at its polling points. Live registers
    /// must already be synchronized to the frame when this blocks.
    pub fn check(&self) -> SuspendOutcome {
        if self.flags.load(Ordering::SeqCst) & SUSPEND_FLAG_TERMINATE != 0 {
            return SuspendOutcome::Terminated;
        }
        if self.flags.load(Ordering::SeqCst) & SUSPEND_FLAG_SUSPEND != 0 {
            let mut guard = self.wait_lock.lock().expect("wait lock poisoned");
            loop {
                let flags = self.flags.load(Ordering::SeqCst);
                if flags & SUSPEND_FLAG_TERMINATE != 0 {
                    return SuspendOutcome::Terminated;
                }
                if flags & SUSPEND_FLAG_SUSPEND == 0 {
                    break;
                }
                guard = self
                    .wait_cond
                    .wait(guard)
                    .expect("wait lock poisoned");
            }
        }
        SuspendOutcome::Continue
    }
}
