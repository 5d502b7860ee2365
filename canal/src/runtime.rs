//! The host-provided services a channel runs against.
//!
//! Channels do not own threads or global state. Everything asynchronous
//! (completion callbacks, deadline expiry) goes through a [`Runtime`],
//! an explicit bundle of an [`Executor`] and a [`TimerService`] that the
//! embedding application builds once and passes to every factory.

use std::sync::Arc;
use std::time::Duration;

use crate::executor::{Executor, ThreadExecutor};
use crate::timer::{DEFAULT_SLACK, TimerService};

/// Executor plus timer service, shared by every channel built against it.
pub struct Runtime {
  executor: Arc<dyn Executor>,
  timer: TimerService,
}

impl Runtime {
  /// A runtime with a two-worker [`ThreadExecutor`] and the default
  /// timer slack.
  pub fn new() -> Arc<Runtime> {
    Self::builder().build()
  }

  /// A runtime around a caller-provided executor.
  pub fn with_executor(executor: Arc<dyn Executor>) -> Arc<Runtime> {
    Self::builder().executor(executor).build()
  }

  pub fn builder() -> RuntimeBuilder {
    RuntimeBuilder { workers: 2, slack: DEFAULT_SLACK, executor: None }
  }

  pub fn executor(&self) -> &Arc<dyn Executor> {
    &self.executor
  }

  pub fn timer(&self) -> &TimerService {
    &self.timer
  }
}

/// Configures and builds a [`Runtime`].
pub struct RuntimeBuilder {
  workers: usize,
  slack: Duration,
  executor: Option<Arc<dyn Executor>>,
}

impl RuntimeBuilder {
  /// Worker-thread count for the built-in executor. Ignored when a
  /// custom executor is supplied.
  pub fn workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }

  /// How early the timer service may fire to coalesce nearby deadlines.
  pub fn timer_slack(mut self, slack: Duration) -> Self {
    self.slack = slack;
    self
  }

  /// Replaces the built-in thread pool with `executor`.
  pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
    self.executor = Some(executor);
    self
  }

  pub fn build(self) -> Arc<Runtime> {
    let executor = self
      .executor
      .unwrap_or_else(|| Arc::new(ThreadExecutor::new(self.workers)));
    Arc::new(Runtime { executor, timer: TimerService::new(self.slack) })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::executor::StepExecutor;
  use std::sync::mpsc;
  use std::time::Duration;

  #[test]
  fn default_runtime_schedules_work() {
    let rt = Runtime::new();
    let (tx, rx) = mpsc::channel();
    rt.executor().schedule(Box::new(move || {
      tx.send(1).unwrap();
    }));
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
  }

  #[test]
  fn custom_executor_is_used_verbatim() {
    let step = Arc::new(StepExecutor::new());
    let rt = Runtime::with_executor(step.clone());

    rt.executor().schedule(Box::new(|| {}));
    assert_eq!(step.pending(), 1);
    step.run_until_idle();
  }
}
