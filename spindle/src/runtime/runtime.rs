use crate::context;
use crate::error::Error;
use crate::runtime::scheduler::Scheduler;
use crate::runtime::{ClockKind, Dispatcher, Scope};
use anyhow::{Result, anyhow};
use std::convert::TryFrom;
use std::rc::{Rc, Weak};
use std::time::Duration;

// Event loop policies.

/// Fire expired timers every N polls while tasks are ready.
#[cfg(not(test))]
const TIMER_INTERVAL: u32 = 61;

#[cfg(test)]
const TIMER_INTERVAL: u32 = 8;

/// Log a scheduler summary every N polls.
const REPORT_INTERVAL: u32 = 1024;

/// How long a wall-clock runtime waits for an external wake before reporting a
/// stall.
const STALL_TIMEOUT: Duration = Duration::from_secs(1);

const DEFAULT_NAME: &str = "spindle";

#[derive(Debug)]
pub struct Builder {
    /// Time source used by `sleep`.
    clock: ClockKind,

    /// Dispatcher of the root task, inherited by jobs launched without one.
    default_dispatcher: Dispatcher,

    /// Fire expired timers every N polls even when tasks are ready.
    timer_interval: u32,

    /// Log a scheduler summary every N polls.
    report_interval: u32,

    /// Wall clock only: how long to park without timers before giving up.
    stall_timeout: Duration,

    /// Name of the runtime, recorded on its tracing span.
    name: Option<String>,
}

impl Builder {
    fn new(clock: ClockKind) -> Self {
        Self {
            clock,
            default_dispatcher: Dispatcher::default(),
            timer_interval: TIMER_INTERVAL,
            report_interval: REPORT_INTERVAL,
            stall_timeout: STALL_TIMEOUT,
            name: None,
        }
    }

    /// Returns a new builder driven by a virtual clock: `sleep` never blocks
    /// the thread and logical time jumps to the next deadline.
    ///
    /// Configuration methods can be chained on the return value.
    pub fn new_virtual() -> Builder {
        Builder::new(ClockKind::Virtual)
    }

    /// Returns a new builder driven by the wall clock.
    pub fn new_wall_clock() -> Builder {
        Builder::new(ClockKind::Wall)
    }

    pub fn default_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.default_dispatcher = dispatcher;
        self
    }

    /// Sets the number of polls after which the driver fires expired timers
    /// even though tasks are still ready. Smaller values favor sleepers over
    /// busy tasks.
    #[track_caller]
    pub fn timer_interval(mut self, val: u32) -> Self {
        assert!(val > 0, "timer_interval must be greater than 0");
        self.timer_interval = val;
        self
    }

    #[track_caller]
    pub fn report_interval(mut self, val: u32) -> Self {
        assert!(val > 0, "report_interval must be greater than 0");
        self.report_interval = val;
        self
    }

    #[track_caller]
    pub fn stall_timeout(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "stall_timeout must be greater than 0");
        self.stall_timeout = val;
        self
    }

    pub fn name(mut self, val: impl Into<String>) -> Self {
        self.name = Some(val.into());
        self
    }

    /// Creates the configured `Runtime`.
    ///
    /// Building does not claim the thread, `block_on` does.
    pub fn try_build(self) -> Result<Runtime> {
        let cfg = RuntimeConfig::try_from(self)?;
        Ok(Runtime { cfg })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new_wall_clock()
    }
}

/// A configured runtime. Every call to [`block_on`](Runtime::block_on) runs a
/// fresh scheduler with its own root scope, so runs never share state.
#[derive(Debug)]
pub struct Runtime {
    cfg: RuntimeConfig,
}

impl Runtime {
    pub fn clock(&self) -> ClockKind {
        self.cfg.clock
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// Runs `body` as the root task and drives the scheduler until the root
    /// and everything launched under it is terminal.
    ///
    /// Returns the body's value, or its error. Failures of other tasks are
    /// only visible to whoever awaits or inspects them.
    ///
    /// # Errors
    ///
    /// - the body's own error, unwrapped so it can be downcast.
    /// - [`Error::Cancelled`] if the root task was cancelled.
    /// - [`Error::RuntimeActive`] if called from inside a runtime.
    /// - [`Error::Stalled`] if every task is suspended on something that can
    ///   no longer happen, e.g. a receive on a channel nobody closes.
    pub fn block_on<F, Fut, T, E>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + 'static,
        T: 'static,
        E: Into<anyhow::Error> + 'static,
    {
        let _active = context::try_enter_runtime()?;

        let span = tracing::info_span!("runtime", name = %self.cfg.name, clock = ?self.cfg.clock);
        let _enter = span.enter();

        let scheduler = Scheduler::new(&self.cfg);
        let _ctx = context::enter_scheduler(&scheduler);

        let runtime_scope = Scope::new(Rc::downgrade(&scheduler), Weak::new(), self.cfg.default_dispatcher);
        let root = runtime_scope.builder().name("root").async_(body);

        if let Err(err) = scheduler.drive(root.job().header()) {
            scheduler.shutdown(root.job().header());
            return Err(err.into());
        }

        match root.into_outcome() {
            Some(Ok(value)) => Ok(value),
            Some(Err(Error::Failed(failure))) => Err(failure.into_anyhow()),
            Some(Err(err)) => Err(err.into()),
            None => Err(anyhow!("root task finished without producing a value")),
        }
    }
}

/// Runs `body` on a wall-clock runtime with the default configuration.
///
/// This is the blocking entry point: it creates a fresh root scope, drives it
/// to completion and returns the root task's value or failure.
///
/// # Example
///
/// ```no_run
/// use spindle::{Error, time::sleep};
/// use std::time::Duration;
///
/// let sum = spindle::run_blocking(|scope| async move {
///     let a = scope.async_(|_| async { Ok::<_, Error>(1) });
///     let b = scope.async_(|_| async {
///         sleep(Duration::from_millis(10)).await?;
///         Ok::<_, Error>(2)
///     });
///     Ok::<_, Error>(a.await? + b.await?)
/// })
/// .unwrap();
///
/// assert_eq!(sum, 3);
/// ```
pub fn run_blocking<F, Fut, T, E>(body: F) -> Result<T>
where
    F: FnOnce(Scope) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>> + 'static,
    T: 'static,
    E: Into<anyhow::Error> + 'static,
{
    Builder::default().try_build()?.block_on(body)
}

// Validated snapshot of a `Builder`, cloned into every scheduler.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) clock: ClockKind,
    pub(crate) default_dispatcher: Dispatcher,
    pub(crate) timer_interval: u32,
    pub(crate) report_interval: u32,
    pub(crate) stall_timeout: Duration,
    pub(crate) name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            clock: ClockKind::default(),
            default_dispatcher: Dispatcher::default(),
            timer_interval: TIMER_INTERVAL,
            report_interval: REPORT_INTERVAL,
            stall_timeout: STALL_TIMEOUT,
            name: DEFAULT_NAME.to_string(),
        }
    }
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("runtime name must not be blank"));
        }

        if self.timer_interval > self.report_interval {
            return Err(anyhow!(
                "timer_interval ({}) must not exceed report_interval ({})",
                self.timer_interval,
                self.report_interval
            ));
        }

        Ok(())
    }
}

impl TryFrom<Builder> for RuntimeConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let cfg = RuntimeConfig {
            clock: builder.clock,
            default_dispatcher: builder.default_dispatcher,
            timer_interval: builder.timer_interval,
            report_interval: builder.report_interval,
            stall_timeout: builder.stall_timeout,
            name: builder.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
        };

        cfg.validate()?;

        Ok(cfg)
    }
}
