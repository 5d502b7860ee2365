//! One-shot result cells backing every channel operation.
//!
//! An [`OpFuture`] is the consumer half of a single completion: it resolves
//! exactly once, with a value or a [`ChannelError`]. The producer half, the
//! crate-internal `Resolver`, lives inside a channel's pending queue (or a
//! selection driver) and wins only the first completion; later attempts are
//! no-ops.
//!
//! A future can be consumed in exactly one of three ways:
//!
//! - `.await` it: [`OpFuture`] implements [`std::future::Future`].
//! - [`blocking()`](OpFuture::blocking): park the calling thread until the
//!   result arrives.
//! - [`when_done(cb)`](OpFuture::when_done): hand the result to a callback
//!   which runs on the executor, never on the completer's stack.
//!
//! `when_done` takes the future by value, so a callback and a poll loop can
//! never race for the same result.

use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};

use crate::error::ChannelError;
use crate::executor::Executor;

type Callback<T> = Box<dyn FnOnce(Result<T, ChannelError>) + Send + 'static>;

/// Who to tell when the result lands. At most one notifier is registered
/// at a time; a waker is replaced on every poll, a callback is final.
enum Notifier<T> {
  Waker(Waker),
  Callback(Callback<T>),
}

enum State<T> {
  /// No result, nobody waiting.
  Waiting,
  /// No result, one party registered.
  Armed(Notifier<T>),
  /// Result stored, not yet handed out.
  Done(Result<T, ChannelError>),
  /// Result already handed out (to a callback, a poll, or `blocking`).
  Taken,
}

struct Shared<T> {
  // std primitives on purpose: blocking() needs the Condvar/Mutex pairing.
  state: Mutex<State<T>>,
  cond: Condvar,
  executor: Arc<dyn Executor>,
}

/// The consumer half of a one-shot channel operation.
pub struct OpFuture<T> {
  shared: Arc<Shared<T>>,
}

/// The producer half. Owned by whatever will complete the operation.
pub(crate) struct Resolver<T: Send + 'static> {
  shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> OpFuture<T> {
  pub(crate) fn new(
    executor: Arc<dyn Executor>,
  ) -> (OpFuture<T>, Resolver<T>) {
    let shared = Arc::new(Shared {
      state: Mutex::new(State::Waiting),
      cond: Condvar::new(),
      executor,
    });
    (OpFuture { shared: Arc::clone(&shared) }, Resolver { shared })
  }

  /// A future that is already resolved.
  pub(crate) fn ready(
    executor: Arc<dyn Executor>,
    result: Result<T, ChannelError>,
  ) -> OpFuture<T> {
    let (fut, resolver) = Self::new(executor);
    resolver.complete(result);
    fut
  }

  /// Whether the operation has completed (in any way).
  pub fn is_done(&self) -> bool {
    matches!(*self.shared.state.lock().unwrap(), State::Done(_) | State::Taken)
  }

  /// Takes the result if it is available, without blocking.
  ///
  /// # Panics
  ///
  /// Panics if the result was already taken by an earlier call.
  pub fn try_take(&self) -> Option<Result<T, ChannelError>> {
    let mut state = self.shared.state.lock().unwrap();
    match mem::replace(&mut *state, State::Taken) {
      State::Done(res) => Some(res),
      State::Taken => panic!("operation result already taken"),
      other => {
        *state = other;
        None
      }
    }
  }

  /// Parks the calling thread until the operation completes.
  ///
  /// # Panics
  ///
  /// Panics if the result was already taken.
  pub fn blocking(self) -> Result<T, ChannelError> {
    let mut state = self.shared.state.lock().unwrap();
    loop {
      match mem::replace(&mut *state, State::Taken) {
        State::Done(res) => return res,
        State::Taken => panic!("operation result already taken"),
        other => {
          *state = other;
          // The loop absorbs spurious wakeups.
          state = self.shared.cond.wait(state).unwrap();
        }
      }
    }
  }

  /// Registers `callback` to receive the result.
  ///
  /// The callback runs on the executor. If the operation already
  /// completed, it is scheduled immediately; otherwise it runs right
  /// after completion. Taking `self` by value makes the callback the
  /// only consumer.
  pub fn when_done<F>(self, callback: F)
  where
    F: FnOnce(Result<T, ChannelError>) + Send + 'static,
  {
    let mut state = self.shared.state.lock().unwrap();
    match mem::replace(&mut *state, State::Taken) {
      State::Done(res) => {
        drop(state);
        self.shared.executor.schedule(Box::new(move || callback(res)));
      }
      State::Taken => panic!("operation result already taken"),
      State::Waiting | State::Armed(_) => {
        // A waker from an earlier poll is discarded: the callback is now
        // the sole consumer.
        *state = State::Armed(Notifier::Callback(Box::new(callback)));
      }
    }
  }
}

impl<T: Send + 'static> Future for OpFuture<T> {
  type Output = Result<T, ChannelError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut state = self.shared.state.lock().unwrap();
    match mem::replace(&mut *state, State::Taken) {
      State::Done(res) => Poll::Ready(res),
      State::Taken => panic!("OpFuture polled after completion"),
      State::Waiting | State::Armed(_) => {
        *state = State::Armed(Notifier::Waker(cx.waker().clone()));
        Poll::Pending
      }
    }
  }
}

impl<T: Send + 'static> Resolver<T> {
  /// Stores the result if no result has been stored yet.
  ///
  /// Returns `true` when this call won the completion. The notifier, if
  /// any, is dispatched here: wakers are woken inline, callbacks are
  /// scheduled on the executor so no user code runs on this stack.
  pub(crate) fn complete(&self, result: Result<T, ChannelError>) -> bool {
    let mut state = self.shared.state.lock().unwrap();
    match mem::replace(&mut *state, State::Taken) {
      done @ State::Done(_) => {
        *state = done;
        false
      }
      State::Taken => false,
      State::Waiting => {
        *state = State::Done(result);
        drop(state);
        self.shared.cond.notify_all();
        true
      }
      State::Armed(Notifier::Waker(waker)) => {
        *state = State::Done(result);
        drop(state);
        self.shared.cond.notify_all();
        waker.wake();
        true
      }
      State::Armed(Notifier::Callback(callback)) => {
        // State stays Taken: the callback receives the result directly.
        drop(state);
        self
          .shared
          .executor
          .schedule(Box::new(move || callback(result)));
        true
      }
    }
  }

  pub(crate) fn complete_value(&self, value: T) -> bool {
    self.complete(Ok(value))
  }

  pub(crate) fn complete_error(&self, error: ChannelError) -> bool {
    self.complete(Err(error))
  }

  /// Cancels the operation. Loses against any completion that got in
  /// first, like every other way of resolving the cell.
  pub(crate) fn cancel(&self) -> bool {
    self.complete(Err(ChannelError::Canceled))
  }
}

impl<T: Send + 'static> Drop for Resolver<T> {
  fn drop(&mut self) {
    // Last resort so an abandoned operation can never strand a waiter.
    // Every regular path completes the entry before dropping it, which
    // makes this a no-op.
    let mut state = self.shared.state.lock().unwrap();
    match mem::replace(&mut *state, State::Taken) {
      done @ State::Done(_) => *state = done,
      State::Taken => {}
      State::Waiting => {
        *state = State::Done(Err(ChannelError::Retired));
        drop(state);
        self.shared.cond.notify_all();
      }
      State::Armed(Notifier::Waker(waker)) => {
        *state = State::Done(Err(ChannelError::Retired));
        drop(state);
        self.shared.cond.notify_all();
        waker.wake();
      }
      State::Armed(Notifier::Callback(callback)) => {
        drop(state);
        self
          .shared
          .executor
          .schedule(Box::new(move || callback(Err(ChannelError::Retired))));
      }
    }
  }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::executor::StepExecutor;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;
  use std::time::Duration;

  fn step() -> Arc<StepExecutor> {
    Arc::new(StepExecutor::new())
  }

  #[test]
  fn first_completion_wins() {
    let exec = step();
    let (fut, resolver) = OpFuture::<u32>::new(exec);

    assert!(resolver.complete(Ok(1)));
    assert!(!resolver.complete(Ok(2)));
    assert!(!resolver.complete(Err(ChannelError::Timeout)));

    assert_eq!(fut.blocking(), Ok(1));
  }

  #[test]
  fn try_take_before_and_after() {
    let exec = step();
    let (fut, resolver) = OpFuture::<u32>::new(exec);

    assert!(fut.try_take().is_none());
    assert!(!fut.is_done());

    resolver.complete(Ok(7));
    assert!(fut.is_done());
    assert_eq!(fut.try_take(), Some(Ok(7)));
  }

  #[test]
  #[should_panic(expected = "already taken")]
  fn double_take_panics() {
    let exec = step();
    let (fut, resolver) = OpFuture::<u32>::new(exec);
    resolver.complete(Ok(7));
    let _ = fut.try_take();
    let _ = fut.try_take();
  }

  #[test]
  fn blocking_wakes_across_threads() {
    let exec = step();
    let (fut, resolver) = OpFuture::<u32>::new(exec);

    let handle = thread::spawn(move || {
      thread::sleep(Duration::from_millis(30));
      resolver.complete(Ok(99));
    });

    assert_eq!(fut.blocking(), Ok(99));
    handle.join().unwrap();
  }

  #[test]
  fn callback_registered_before_completion_runs_on_executor() {
    let exec = step();
    let (fut, resolver) = OpFuture::<u32>::new(exec.clone());
    let hits = Arc::new(AtomicUsize::new(0));

    let h = Arc::clone(&hits);
    fut.when_done(move |res| {
      assert_eq!(res, Ok(5));
      h.fetch_add(1, Ordering::Relaxed);
    });

    resolver.complete(Ok(5));
    // Nothing runs until the executor is driven.
    assert_eq!(hits.load(Ordering::Relaxed), 0);
    exec.run_until_idle();
    assert_eq!(hits.load(Ordering::Relaxed), 1);
  }

  #[test]
  fn callback_registered_after_completion_is_scheduled_immediately() {
    let exec = step();
    let (fut, resolver) = OpFuture::<u32>::new(exec.clone());
    resolver.complete(Err(ChannelError::Timeout));

    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    fut.when_done(move |res| {
      assert_eq!(res, Err(ChannelError::Timeout));
      h.fetch_add(1, Ordering::Relaxed);
    });

    exec.run_until_idle();
    assert_eq!(hits.load(Ordering::Relaxed), 1);
  }

  #[test]
  fn poll_pending_then_ready() {
    use futures_task::noop_waker;
    use std::task::Context;

    let exec = step();
    let (mut fut, resolver) = OpFuture::<u32>::new(exec);
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
    // Re-polling replaces the stored waker.
    assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());

    resolver.complete(Ok(3));
    assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Ready(Ok(3)));
  }

  #[test]
  fn dropped_resolver_fails_the_future() {
    let exec = step();
    let (fut, resolver) = OpFuture::<u32>::new(exec);
    drop(resolver);
    assert_eq!(fut.blocking(), Err(ChannelError::Retired));
  }

  #[test]
  fn ready_future_is_immediately_done() {
    let exec = step();
    let fut = OpFuture::ready(exec, Ok(11u32));
    assert!(fut.is_done());
    assert_eq!(fut.blocking(), Ok(11));
  }
}
