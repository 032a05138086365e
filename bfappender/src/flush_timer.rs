use std::{sync::Weak, time::Duration};

use tokio::task::JoinHandle;

use crate::driver::SharedAppender;

/// A one-shot deferred trigger: fires at most once per [`FlushTimer::activate`]
/// call, and is cancelled by [`FlushTimer::deactivate`] or by rearming.
///
/// Rust has no analogue of Go's `time.AfterFunc` + `Timer.Stop`/`Reset`, so
/// this reproduces the same state machine (`SPEC_FULL.md` §4.6) with a
/// `tokio` task: arming aborts any previously spawned sleep before spawning a
/// new one, which is the async equivalent of `Timer.Reset`. Always called
/// with the file lock held, exactly like `activeFlushTimer`/
/// `deactiveFlushTimer` in the original.
#[derive(Debug, Default)]
pub(crate) struct FlushTimer {
    handle: Option<JoinHandle<()>>,
}

impl FlushTimer {
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Arms (or re-arms) the timer to fire `after` from now. On fire, the
    /// timer re-enters the write driver of `appender` (if it still exists)
    /// with a forced flush of any residual data.
    pub fn activate(&mut self, appender: &Weak<SharedAppender>, after: Duration) {
        self.cancel();
        let appender = appender.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(appender) = appender.upgrade() {
                let _ = tokio::task::spawn_blocking(move || appender.on_flush_timer_fire()).await;
            }
        }));
    }

    pub fn deactivate(&mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
