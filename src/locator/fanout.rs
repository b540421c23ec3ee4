/// Structured fan-out: spawn independent tasks, join them all, and honour the
/// caller's stop signal at the join point.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::errors::{LocatorError, LocatorResult};

/// Cooperative interruption shared between the caller and a running `locate`.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    flag: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Clear a previous trigger so the signal can guard the next call.
    pub fn reset(&self) {
        self.inner.flag.store(false, Ordering::SeqCst);
    }

    /// Resolves once `trigger` has been called.
    pub async fn triggered(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

/// What came back from a fan-out.
#[derive(Debug)]
pub struct Harvest<T> {
    pub values: Vec<T>,
    /// Tasks that failed with an absorbed (non-fatal) error or panicked.
    pub failed: usize,
    /// The stop signal fired; outstanding tasks were abandoned.
    pub interrupted: bool,
}

impl<T> Harvest<T> {
    fn new() -> Self {
        Self {
            values: Vec::new(),
            failed: 0,
            interrupted: false,
        }
    }
}

/// Join every task in `set`.
///
/// Non-fatal task errors count as empty contributions. An interruption (stop
/// signal or a task reporting `Interrupted`) aborts the rest and returns what
/// was collected so far with `interrupted = true`. `NonRetryable` aborts the
/// rest and propagates.
pub async fn harvest<T: Send + 'static>(
    mut set: JoinSet<LocatorResult<T>>,
    stop: &StopSignal,
    stage: &'static str,
) -> LocatorResult<Harvest<T>> {
    let mut out = Harvest::new();
    loop {
        tokio::select! {
            biased;
            _ = stop.triggered() => {
                tracing::warn!(stage, outstanding = set.len(), "stop requested, abandoning tasks");
                set.abort_all();
                out.interrupted = true;
                break;
            }
            next = set.join_next() => match next {
                None => break,
                Some(Ok(Ok(value))) => out.values.push(value),
                Some(Ok(Err(LocatorError::Interrupted))) => {
                    tracing::warn!(stage, "task reported interruption, abandoning the rest");
                    set.abort_all();
                    out.interrupted = true;
                    break;
                }
                Some(Ok(Err(e))) if e.is_fatal() => {
                    tracing::error!(stage, error = %e, "fatal task failure");
                    set.abort_all();
                    return Err(e);
                }
                Some(Ok(Err(e))) => {
                    tracing::warn!(stage, error = %e, "task failed, counting as empty");
                    out.failed += 1;
                }
                Some(Err(join_err)) => {
                    tracing::warn!(stage, error = %join_err, "task did not complete");
                    out.failed += 1;
                }
            }
        }
    }
    tracing::debug!(
        stage,
        collected = out.values.len(),
        failed = out.failed,
        interrupted = out.interrupted,
        "fan-out joined"
    );
    Ok(out)
}
