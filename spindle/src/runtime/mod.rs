//! The scheduler, its configuration and the structured-concurrency
//! [`Scope`].

// Public API
pub mod runtime;
pub use runtime::{Builder, Runtime, run_blocking};

pub(crate) use runtime::RuntimeConfig;

mod ready;
pub(crate) use ready::ReadyQueue;

pub(crate) mod scheduler;
pub(crate) use scheduler::Scheduler;

mod scope;
pub use scope::Scope;
pub(crate) use scope::ScopeInner;

pub mod spawn;
pub use spawn::{Dispatcher, LaunchBuilder};

mod ticker;

pub(crate) mod timer;
pub use timer::ClockKind;
