use std::cell::RefCell;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

/// Installs a test-friendly subscriber once per process. Filter with
/// `RUST_LOG`, e.g. `RUST_LOG=spindle=trace`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Ordered record of what tasks did, shared between them.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog {
    events: Rc<RefCell<Vec<String>>>,
}

impl EventLog {
    pub(crate) fn push(&self, event: impl Into<String>) {
        self.events.borrow_mut().push(event.into());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }
}
