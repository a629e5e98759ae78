//! Cancellation and deadline handle passed through retry calls
//!
//! A [`Context`] pairs a [`CancellationToken`] with an optional deadline. The
//! retry driver checks it before every attempt and races it against every
//! inter-attempt sleep, so cancelling the token (or letting the deadline pass)
//! stops retrying at the next synchronization point.
//!
//! # Examples
//!
//! ```
//! use backstep::{Context, ContextError};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let ctx = Context::new();
//! assert_eq!(ctx.err(), None);
//!
//! let child = ctx.with_timeout(Duration::from_secs(5));
//! ctx.cancel();
//!
//! // Cancelling a parent cancels every context derived from it
//! assert_eq!(child.err(), Some(ContextError::Canceled));
//! # });
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Reason a [`Context`] is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextError {
    /// The context's token was cancelled.
    Canceled,
    /// The context's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::Canceled => write!(f, "context canceled"),
            ContextError::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

impl StdError for ContextError {}

/// Cancellation token plus optional deadline.
///
/// Cloning a context is cheap and yields a handle to the same cancellation
/// state. Use [`Context::child`] or [`Context::with_timeout`] to derive a
/// context that can be cancelled independently of its parent.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Create a context that is never done until cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child context.
    ///
    /// Cancelling the child leaves the parent untouched; cancelling the parent
    /// cancels the child. The child inherits the parent's deadline.
    pub fn child(&self) -> Self {
        Context {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child context that expires after `timeout`.
    ///
    /// The timeout is additive to any deadline already set: the earlier of the
    /// two wins.
    ///
    /// # Examples
    ///
    /// ```
    /// use backstep::Context;
    /// use std::time::Duration;
    ///
    /// # tokio_test::block_on(async {
    /// let outer = Context::new().with_timeout(Duration::from_millis(10));
    /// let inner = outer.with_timeout(Duration::from_secs(60));
    /// assert_eq!(inner.deadline(), outer.deadline());
    /// # });
    /// ```
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let at = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(far_future);
        self.with_deadline(at)
    }

    /// Derive a child context that expires at `deadline`.
    ///
    /// If the parent already has an earlier deadline, that one is kept.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        };
        Context {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true if the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the context is done.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => ContextError::Canceled,
                    () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }

    /// Sleep for `delay` unless the context finishes first.
    ///
    /// A context that is already done wins even against a zero delay.
    pub async fn sleep(&self, delay: Duration) -> Result<(), ContextError> {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Returns a guard that cancels this context when dropped.
    pub fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }
}

impl From<CancellationToken> for Context {
    fn from(token: CancellationToken) -> Self {
        Context {
            token,
            deadline: None,
        }
    }
}

// Roughly 30 years out, far enough to never fire.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}
