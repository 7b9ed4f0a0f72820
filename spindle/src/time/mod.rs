//! Time-based suspension points, measured on the runtime's clock.
//!
//! Under a [`Virtual`](crate::runtime::ClockKind::Virtual) clock logical time
//! jumps straight to the next deadline once no task is ready, so sleeping
//! never blocks the thread.
use crate::context;
use crate::error::Error;
use std::time::Duration;

pub mod sleep;
pub use sleep::{Sleep, sleep};

pub mod timed;
pub use timed::{Timed, timed};

pub mod yield_now;
pub use yield_now::{YieldNow, yield_now};

/// Time elapsed on the current runtime's clock since `block_on` started.
///
/// # Errors
///
/// [`Error::NoRuntime`] outside of a runtime.
pub fn now() -> Result<Duration, Error> {
    context::current_scheduler()
        .map(|scheduler| scheduler.now())
        .ok_or(Error::NoRuntime)
}
