use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// Migration control flags threaded through the executor.
///
/// The checkpoint flag is honored at opcode boundaries only, which is
/// what guarantees the frame invariants hold when serialization
/// begins. The restore flag is consulted once, before the first
/// dispatch of an invocation.
#[derive(Default)]
pub struct MigrationContext {
    checkpoint_flag: AtomicBool,
    restore_flag: AtomicBool,
}

impl MigrationContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Host API equivalent of the interrupt signal.
    pub fn request_checkpoint(&self) {
        self.checkpoint_flag.store(true, Ordering::SeqCst);
    }

    pub fn checkpoint_requested(&self) -> bool {
        self.checkpoint_flag.load(Ordering::SeqCst)
    }

    pub fn clear_checkpoint_request(&self) {
        self.checkpoint_flag.store(false, Ordering::SeqCst);
    }

    /// Arms the restore path; the next executor invocation rebuilds
    /// its state from the image instead of marshalling arguments.
    pub fn set_restore(&self) {
        self.restore_flag.store(true, Ordering::SeqCst);
    }

    pub fn restore_requested(&self) -> bool {
        self.restore_flag.load(Ordering::SeqCst)
    }

    pub fn clear_restore(&self) {
        self.restore_flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(unix)]
mod sigint {
    use super::MigrationContext;
    use alloc::sync::Arc;
    use std::sync::OnceLock;

    static SIGNAL_TARGET: OnceLock<Arc<MigrationContext>> = OnceLock::new();

    extern "C" fn on_sigint(_signum: libc::c_int) {
        // only an atomic store happens here, the handler stays
        // async-signal-safe
        if let Some(ctx) = SIGNAL_TARGET.get() {
            ctx.request_checkpoint();
        }
    }

    /// Routes the process's interrupt signal to the given context.
    /// Only the first installation takes effect for the process.
    pub fn install_sigint_checkpoint(ctx: &Arc<MigrationContext>) {
        let installed = SIGNAL_TARGET.set(ctx.clone()).is_ok();
        if installed {
            let handler = on_sigint as extern "C" fn(libc::c_int);
            unsafe {
                libc::signal(libc::SIGINT, handler as libc::sighandler_t);
            }
        }
    }
}

#[cfg(unix)]
pub use sigint::install_sigint_checkpoint;

#[cfg(not(unix))]
pub fn install_sigint_checkpoint(_ctx: &alloc::sync::Arc<MigrationContext>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_toggle_independently() {
        let ctx = MigrationContext::new();
        assert!(!ctx.checkpoint_requested());
        assert!(!ctx.restore_requested());
        ctx.request_checkpoint();
        ctx.set_restore();
        assert!(ctx.checkpoint_requested());
        assert!(ctx.restore_requested());
        ctx.clear_checkpoint_request();
        ctx.clear_restore();
        assert!(!ctx.checkpoint_requested());
        assert!(!ctx.restore_requested());
    }
}
