//! Cooperative cancellation
//!
//! A [`ProgressContext`] is passed explicitly through every layer. Each call
//! to [`ProgressContext::progress`] reports liveness to the listener and fails
//! with [`QueryError::Cancelled`] once the listener asks to stop.

use crate::error::{QueryError, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Observes a running query
pub trait ProgressListener: Send + Sync {
    fn progress_made(&self);

    fn is_cancelled(&self) -> bool;
}

#[derive(Clone, Default)]
pub struct ProgressContext {
    listener: Option<Arc<dyn ProgressListener>>,
}

impl ProgressContext {
    pub fn new(listener: Arc<dyn ProgressListener>) -> Self {
        Self {
            listener: Some(listener),
        }
    }

    /// Signal progress. Errors once the listener reports cancellation.
    pub fn progress(&self) -> Result<()> {
        match &self.listener {
            Some(listener) => {
                if listener.is_cancelled() {
                    return Err(QueryError::Cancelled);
                }
                listener.progress_made();
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ProgressContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressContext")
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

/// Listener backed by atomics; counts progress signals until cancelled
#[derive(Debug, Default)]
pub struct CancellationFlag {
    cancelled: AtomicBool,
    signals: AtomicU64,
}

impl CancellationFlag {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Number of progress signals received
    pub fn signals(&self) -> u64 {
        self.signals.load(Ordering::Relaxed)
    }
}

impl ProgressListener for CancellationFlag {
    fn progress_made(&self) {
        self.signals.fetch_add(1, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
