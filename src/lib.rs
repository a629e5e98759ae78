//! # Backstep
//!
//! A retry driver for async Rust.
//!
//! Backstep re-runs a fallible async operation until it succeeds, fails
//! permanently, or a stopping condition fires. What to wait between attempts
//! and when to give up are separate, composable values:
//!
//! - a [`Strategy`](retry::Strategy) produces the delays (explicit list,
//!   constant, exponential with jitter and ceiling);
//! - stop wrappers cap it by retry count or elapsed time;
//! - the driver ([`retry::run`]) handles cancellation through a [`Context`],
//!   timeouts, notification and error reporting.
//!
//! ## Quick Example
//!
//! ```rust
//! use backstep::retry::{run, Delays, Failure, RetryOptions};
//! use backstep::Context;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let delays = Delays::new([Duration::from_millis(1), Duration::from_millis(2)]);
//!
//! let result = run(
//!     &Context::new(),
//!     &delays,
//!     |_ctx| async { Err::<(), _>(Failure::Transient("service unavailable")) },
//!     RetryOptions::new(),
//! )
//! .await;
//!
//! let err = result.unwrap_err();
//! assert_eq!(err.as_retry_error().map(|e| e.retries()), Some(3));
//! assert_eq!(err.into_operation_error(), Ok("service unavailable"));
//! # });
//! ```
//!
//! ## Features
//!
//! - `tracing` (default): emit `tracing` events when attempts fail, when
//!   retrying stops and when it is canceled
//! - `serde`: `Serialize`/`Deserialize` for strategies and stop conditions so
//!   retry policies can live in configuration files

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod context;
pub mod retry;

// Re-exports
pub use context::{Context, ContextError};
pub use retry::{Error, Failure, RetryError, RetryOptions, Strategy};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::{Context, ContextError};
    pub use crate::retry::{
        permanent, run, run_unit, Error, Failure, PermanentExt, RetryError, RetryOptions,
        Strategy,
    };
}
