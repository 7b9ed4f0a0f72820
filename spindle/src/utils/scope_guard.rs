/// Runs `on_exit` when dropped, whether the enclosing scope returns or
/// unwinds.
///
/// The thread-local context (active runtime, scheduler, task) is restored
/// through these guards, so a panicking task body leaves it consistent.
#[must_use = "the closure runs as soon as the guard is dropped"]
pub(crate) struct ScopeGuard<F: FnOnce()> {
    on_exit: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub(crate) fn new(on_exit: F) -> Self {
        ScopeGuard { on_exit: Some(on_exit) }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(on_exit) = self.on_exit.take() {
            on_exit();
        }
    }
}
