//! # Scheduler
//!
//! A connection does not own a task. It registers a [`RepeatingWork`] with a [`Scheduler`], which
//! keeps invoking it until it reports [`Step::Done`]. Every invocation is one tick of the
//! connection state machine.
//!
//! [`TokioScheduler`] runs each registered work on its own tokio task, ticking on a fixed
//! interval. Hosts with their own frame loop can implement [`Scheduler`] and call
//! [`RepeatingWork::run`] themselves.
use std::time::Duration;

use tokio::{runtime::Handle, time::MissedTickBehavior};

/// Outcome of one invocation of a [`RepeatingWork`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    /// Invoke the work again on the next tick.
    Continue,
    /// The work is finished and must not be invoked again.
    Done,
}

/// A unit of work invoked once per tick until it reports [`Step::Done`].
pub trait RepeatingWork: Send + 'static {
    fn run(&mut self) -> Step;
}

impl<F> RepeatingWork for F
where
    F: FnMut() -> Step + Send + 'static,
{
    fn run(&mut self) -> Step {
        self()
    }
}

/// Drives registered [`RepeatingWork`].
pub trait Scheduler: Send + Sync {
    fn register(&self, work: Box<dyn RepeatingWork>);
}

/// Default tick period of [`TokioScheduler`].
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Ticks each registered work on a tokio task.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    period: Duration,
    handle: Option<Handle>,
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioScheduler {
    /// Ticks every [`DEFAULT_TICK`] on the runtime current at registration time.
    pub fn new() -> Self {
        Self {
            period: DEFAULT_TICK,
            handle: None,
        }
    }

    /// Sets the tick period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Spawns work on `handle` instead of the current runtime.
    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }
}

impl Scheduler for TokioScheduler {
    /// # Panics
    /// Without an explicit handle, panics when called outside a tokio runtime.
    fn register(&self, mut work: Box<dyn RepeatingWork>) {
        let period = self.period;
        let task = async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if work.run() == Step::Done {
                    break;
                }
            }
        };

        match &self.handle {
            Some(handle) => {
                handle.spawn(task);
            }
            None => {
                tokio::spawn(task);
            }
        }
    }
}
