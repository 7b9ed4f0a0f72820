//! Task handles: [`Job`] for fire-and-forget work and [`Deferred`] for work
//! that produces a value.

mod deferred;
pub use self::deferred::{Await, Deferred};

pub(crate) mod header;
pub(crate) use self::header::Header;

pub mod id;
pub use self::id::{Id, id, try_id};

mod job;
pub use self::job::{Job, Join};

mod state;
pub(crate) use self::state::{Checkpoint, Termination};
pub use self::state::TaskState;

mod waker;
pub(crate) use self::waker::task_waker;
