//! A small structured-concurrency runtime.
//!
//! Tasks are launched into a [`Scope`], run cooperatively on the thread that
//! called [`run_blocking`] and suspend only at well-defined points:
//! [`time::sleep`], [`time::yield_now`], channel [`send`](Channel::send) and
//! [`recv`](Channel::recv), awaiting a [`Deferred`] and joining a [`Job`].
//! Cancellation is observed at those same points.
//!
//! ```no_run
//! use spindle::{Error, time::sleep};
//! use std::time::Duration;
//!
//! let answer = spindle::run_blocking(|scope| async move {
//!     let job = scope.launch(|_| async {
//!         sleep(Duration::from_secs(1)).await?;
//!         println!("World!");
//!         Ok::<_, Error>(())
//!     });
//!     println!("Hello,");
//!
//!     let answer = scope.async_(|_| async { Ok::<_, Error>(42) });
//!     job.join().await?;
//!     answer.await
//! })
//! .unwrap();
//!
//! assert_eq!(answer, 42);
//! ```

#[doc(inline)]
pub use spindle_macros::main;

#[doc(inline)]
pub use spindle_macros::test;

mod context;

pub mod channel;
pub use channel::Channel;

mod error;
pub use error::{Error, TaskFailure};

pub mod flow;
pub use flow::{Flow, flow};

pub mod runtime;
pub use runtime::{Builder, Dispatcher, Runtime, Scope, run_blocking};

pub mod task;
pub use task::{Deferred, Job, TaskState};

pub mod time;

mod utils;

#[cfg(test)]
mod test_utils;
