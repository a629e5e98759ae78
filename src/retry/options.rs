//! Options consumed by the retry driver.

use std::fmt;
use std::time::Duration;

use super::strategy::Strategy;
use super::wrapper::{StopCondition, Wrapper};

/// Callback invoked after each failed attempt that will be retried.
///
/// Receives the operation error, the delay before the next attempt, the number
/// of the attempt that failed (starting at 1) and the time elapsed since the
/// driver started. It is not called when the strategy stops.
///
/// The callback runs inline on the driver's task: if it blocks, the next
/// attempt is delayed accordingly.
pub type Notify<'a, E> = Box<dyn FnMut(&E, Duration, u32, Duration) + Send + 'a>;

/// Options for a retry call.
///
/// # Examples
///
/// ```rust
/// use backstep::retry::RetryOptions;
/// use std::time::Duration;
///
/// let options = RetryOptions::<std::io::Error>::new()
///     .with_timeout(Duration::from_secs(30))
///     .with_max_retries(5)
///     .with_notify(|err, delay, attempt, _elapsed| {
///         eprintln!("attempt {} failed: {}, retrying in {:?}", attempt, err, delay);
///     });
///
/// assert_eq!(options.timeout(), Some(Duration::from_secs(30)));
/// ```
pub struct RetryOptions<'a, E> {
    timeout: Option<Duration>,
    notify: Option<Notify<'a, E>>,
    stops: Vec<StopCondition>,
}

impl<'a, E> RetryOptions<'a, E> {
    /// Create empty options: no timeout, no notify, no stop conditions.
    pub fn new() -> Self {
        Self {
            timeout: None,
            notify: None,
            stops: Vec::new(),
        }
    }

    /// Cancel the call after `timeout`.
    ///
    /// The timeout applies to the whole call, on top of any deadline the
    /// caller's context already has. A zero timeout is ignored.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Allow at most `n` retries on top of the initial attempt.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.stops.push(StopCondition::MaxRetries(n));
        self
    }

    /// Stop retrying once `d` has elapsed since the call started.
    pub fn with_max_elapsed_time(mut self, d: Duration) -> Self {
        self.stops.push(StopCondition::MaxElapsedTime(d));
        self
    }

    /// Add a stop condition.
    pub fn with_stop(mut self, stop: StopCondition) -> Self {
        self.stops.push(stop);
        self
    }

    /// Set the notify callback. See [`Notify`].
    pub fn with_notify<F>(mut self, notify: F) -> Self
    where
        F: FnMut(&E, Duration, u32, Duration) + Send + 'a,
    {
        self.notify = Some(Box::new(notify));
        self
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The stop conditions, in the order they will wrap the strategy.
    pub fn stops(&self) -> &[StopCondition] {
        &self.stops
    }

    /// Returns true if a notify callback is set.
    pub fn has_notify(&self) -> bool {
        self.notify.is_some()
    }

    /// Wrap `strategy` with every stop condition, in insertion order.
    pub(crate) fn wrap<'s, S>(&self, strategy: S) -> Box<dyn Strategy + 's>
    where
        S: Strategy + 's,
    {
        let base: Box<dyn Strategy + 's> = Box::new(strategy);
        self.stops
            .iter()
            .fold(base, |strategy, stop| stop.wrap(strategy))
    }

    pub(crate) fn into_parts(self) -> (Option<Duration>, Option<Notify<'a, E>>) {
        (self.timeout, self.notify)
    }
}

impl<E> Default for RetryOptions<'_, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for RetryOptions<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("timeout", &self.timeout)
            .field("notify", &self.notify.as_ref().map(|_| "<callback>"))
            .field("stops", &self.stops)
            .finish()
    }
}
