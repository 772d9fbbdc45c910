//! Cooperative cancellation context
//!
//! Every operation that can block on a backend (registry, blob store, L2
//! cache, transaction log) takes a `&Context` and must honour cancellation
//! within one polling interval. The context is cheap to clone and safe to
//! share across threads; background sweepers hold one and stop when the
//! owner cancels it.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// Cancellation token with an optional deadline.
///
/// # Example
///
/// ```
/// use keel_core::Context;
///
/// let ctx = Context::new();
/// assert!(ctx.check().is_ok());
/// ctx.cancel();
/// assert!(ctx.check().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// Create a context that never expires on its own.
    pub fn new() -> Self {
        Context {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: None,
            }),
        }
    }

    /// Create a context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Context {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: Some(Instant::now() + timeout),
            }),
        }
    }

    /// Cancel the context. All clones observe the cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Check whether the context was cancelled or its deadline passed.
    pub fn is_done(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match self.inner.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Return an error if the context is done.
    ///
    /// # Errors
    /// `Error::Cancelled` on explicit cancellation, `Error::Timeout` when the
    /// deadline passed.
    pub fn check(&self) -> Result<()> {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Timeout("context deadline exceeded".to_string()));
            }
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
