//! Strategies that decorate another strategy with a stopping condition.

use std::time::Duration;

use tokio::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::strategy::{DelayStream, Stopped, Strategy};

/// Something that can wrap a strategy into a new one.
pub trait Wrapper {
    /// Wrap `strategy`.
    fn wrap<'s, S>(&self, strategy: S) -> Box<dyn Strategy + 's>
    where
        S: Strategy + 's;
}

/// Stops the inner strategy after `max_retries` delays.
///
/// Pulls are counted, not successful delays: an inner stream that stops early
/// is forwarded as is.
///
/// # Examples
///
/// ```rust
/// use backstep::retry::{max_retries, zero, DelayStreamExt, Strategy};
///
/// let delays = max_retries(3, zero()).stream().until_stop().count();
/// assert_eq!(delays, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaxRetries<S> {
    /// Maximum number of delays to pass through.
    pub max_retries: u32,
    /// The wrapped strategy.
    pub strategy: S,
}

/// Wrap `strategy` so that it allows at most `n` retries.
pub fn max_retries<S: Strategy>(n: u32, strategy: S) -> MaxRetries<S> {
    MaxRetries {
        max_retries: n,
        strategy,
    }
}

impl<S: Strategy> Strategy for MaxRetries<S> {
    fn stream(&self) -> Box<dyn DelayStream> {
        Box::new(MaxRetriesStream {
            max_retries: self.max_retries,
            pulls: 0,
            inner: self.strategy.stream(),
        })
    }
}

struct MaxRetriesStream {
    max_retries: u32,
    pulls: u32,
    inner: Box<dyn DelayStream>,
}

impl DelayStream for MaxRetriesStream {
    fn next_delay(&mut self) -> Result<Duration, Stopped> {
        if self.pulls >= self.max_retries {
            return Err(Stopped::new(format!(
                "maximum retries elapsed: {}",
                self.max_retries
            )));
        }
        self.pulls += 1;
        self.inner.next_delay()
    }
}

/// Stops the inner strategy once `max_elapsed_time` has passed.
///
/// The clock starts when the stream is created, which the driver does at the
/// start of every call, so a long-lived strategy value never expires early.
/// The check runs on each pull: a long delay that overshoots the limit is not
/// cut short, the following pull stops.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaxElapsedTime<S> {
    /// Time after which the stream stops.
    pub max_elapsed_time: Duration,
    /// The wrapped strategy.
    pub strategy: S,
}

/// Wrap `strategy` so that it stops after `d` of wall-clock time.
pub fn max_elapsed_time<S: Strategy>(d: Duration, strategy: S) -> MaxElapsedTime<S> {
    MaxElapsedTime {
        max_elapsed_time: d,
        strategy,
    }
}

impl<S: Strategy> Strategy for MaxElapsedTime<S> {
    fn stream(&self) -> Box<dyn DelayStream> {
        Box::new(MaxElapsedTimeStream {
            max_elapsed_time: self.max_elapsed_time,
            start: Instant::now(),
            inner: self.strategy.stream(),
        })
    }
}

struct MaxElapsedTimeStream {
    max_elapsed_time: Duration,
    start: Instant,
    inner: Box<dyn DelayStream>,
}

impl DelayStream for MaxElapsedTimeStream {
    fn next_delay(&mut self) -> Result<Duration, Stopped> {
        if self.start.elapsed() > self.max_elapsed_time {
            return Err(Stopped::new(format!(
                "retrying time elapsed: {:?}",
                self.max_elapsed_time
            )));
        }
        self.inner.next_delay()
    }
}

/// A stopping condition recorded by the retry options.
///
/// Conditions are applied in the order they were added, each one wrapping the
/// strategy produced by the previous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StopCondition {
    /// See [`MaxRetries`].
    MaxRetries(u32),
    /// See [`MaxElapsedTime`].
    MaxElapsedTime(Duration),
}

impl Wrapper for StopCondition {
    fn wrap<'s, S>(&self, strategy: S) -> Box<dyn Strategy + 's>
    where
        S: Strategy + 's,
    {
        match *self {
            StopCondition::MaxRetries(n) => Box::new(max_retries(n, strategy)),
            StopCondition::MaxElapsedTime(d) => Box::new(max_elapsed_time(d, strategy)),
        }
    }
}
