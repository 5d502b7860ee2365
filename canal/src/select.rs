//! Waiting on many channels at once.
//!
//! [`select`] issues one offered operation per candidate channel, all
//! attached to a single two-phase offer. The first channel that can pair
//! one of the entries wins the arbitration; the driver then surfaces that
//! entry's outcome and sweeps the losing entries off their channels. The
//! loss is invisible to the caller: only the winner's result comes out.
//!
//! Request order matters for [`Priority::First`]: candidates are issued
//! in declaration order, so an immediately-ready channel early in the
//! list wins before later ones are tried. [`Priority::Random`] issues in
//! a fresh uniform permutation per call. [`Priority::Fair`] needs win
//! history and therefore lives on [`ChannelSet`], which keeps a usage
//! counter per channel and issues least-used first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::channel::{Channel, Deadline};
use crate::error::ChannelError;
use crate::executor::Executor;
use crate::future::{OpFuture, Resolver};
use crate::offer::{Offer, OfferHandle};
use crate::sync::Mutex;

/// One candidate of a selection.
pub enum SelectRequest<T: Send + 'static> {
  /// Read a value from the channel.
  Read(Channel<T>),
  /// Write the value to the channel.
  Write(Channel<T>, T),
}

impl<T: Send + 'static> SelectRequest<T> {
  fn channel(&self) -> &Channel<T> {
    match self {
      SelectRequest::Read(ch) => ch,
      SelectRequest::Write(ch, _) => ch,
    }
  }
}

/// Candidate ordering policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
  /// Declaration order; earlier requests win ties.
  #[default]
  First,
  /// No ordering promise. Behaves like `First`.
  Any,
  /// A fresh uniform permutation per call.
  Random,
  /// Least-used-first over a [`ChannelSet`]'s win counters. In a plain
  /// [`select`] call there is no history, so it degrades to `First`.
  Fair,
}

/// What the winning candidate did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome<T> {
  /// The winning request was a read; here is the value.
  Received(T),
  /// The winning request was a write; the value was delivered.
  Sent,
}

/// A selection's result: which request won, and its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selected<T> {
  /// Index of the winning request in the original request list.
  pub index: usize,
  pub outcome: SelectOutcome<T>,
}

/// Waits for the first of `requests` that can complete.
///
/// Exactly one request ever takes effect, even when several channels
/// become ready simultaneously: the shared offer commits at most once,
/// and the losing entries are canceled without the caller seeing them.
/// With a deadline, the whole selection fails with
/// [`ChannelError::Timeout`] if nothing committed in time. If every
/// candidate fails, the selection fails with [`ChannelError::Retired`].
///
/// An empty request list is refused synchronously.
pub fn select<T: Send + 'static>(
  requests: Vec<SelectRequest<T>>,
  deadline: Deadline,
  priority: Priority,
) -> Result<OpFuture<Selected<T>>, ChannelError> {
  if requests.is_empty() {
    return Err(ChannelError::InvalidArgument(
      "selection needs at least one request".into(),
    ));
  }
  let mut order: Vec<usize> = (0..requests.len()).collect();
  if priority == Priority::Random {
    fastrand::shuffle(&mut order);
  }
  Ok(select_impl(requests, deadline, order, None))
}

type WinHook = Box<dyn FnOnce(usize) + Send + 'static>;

struct SelectState<T: Send + 'static> {
  resolver: Resolver<Selected<T>>,
  offer: OnceLock<Arc<Offer>>,
  channels: Vec<Channel<T>>,
  executor: Arc<dyn Executor>,
  /// Entries that failed outright (retired channel, queue overflow, or a
  /// polling probe that found nothing).
  dead: AtomicUsize,
  total: usize,
  /// An immediate-deadline selection polls every candidate; a not-ready
  /// candidate must not end the choice before the rest were tried.
  immediate: bool,
  saw_retired: AtomicBool,
  saw_timeout: AtomicBool,
}

impl<T: Send + 'static> SelectState<T> {
  fn offer(&self) -> &Arc<Offer> {
    self.offer.get().expect("offer is installed at construction")
  }

  /// Clears the losing entries off their channels. Runs on the executor:
  /// the commit that triggers it holds the winning channel's lock, and
  /// sweeping from there would order channel locks against each other.
  fn schedule_sweep(self: Arc<Self>) {
    let executor = Arc::clone(&self.executor);
    executor.schedule(Box::new(move || {
      let offer = Arc::clone(self.offer());
      for channel in &self.channels {
        channel.evict_offer(&offer);
      }
    }));
  }

  fn entry_done(
    self: Arc<Self>,
    index: usize,
    result: Result<SelectOutcome<T>, ChannelError>,
  ) {
    match result {
      Ok(outcome) => {
        self.resolver.complete_value(Selected { index, outcome });
      }
      Err(ChannelError::Canceled) => {
        // This entry lost; the winner speaks for the selection.
      }
      Err(ChannelError::Timeout) if !self.immediate => {
        // First deadline expiry to win the arbitration ends the whole
        // selection; a commit that got there first makes this a no-op.
        if self.offer().abort() {
          tracing::debug!("selection timed out");
          self.resolver.complete_error(ChannelError::Timeout);
          Arc::clone(&self).schedule_sweep();
        }
      }
      Err(error) => {
        match error {
          ChannelError::Retired => {
            self.saw_retired.store(true, Ordering::Release);
          }
          ChannelError::Timeout => {
            self.saw_timeout.store(true, Ordering::Release);
          }
          _ => {}
        }
        let dead = self.dead.fetch_add(1, Ordering::AcqRel) + 1;
        if dead == self.total && self.offer().abort() {
          let surfaced = if self.saw_timeout.load(Ordering::Acquire) {
            ChannelError::Timeout
          } else if self.saw_retired.load(Ordering::Acquire) {
            ChannelError::Retired
          } else {
            error
          };
          self.resolver.complete_error(surfaced);
        }
      }
    }
  }
}

fn select_impl<T: Send + 'static>(
  requests: Vec<SelectRequest<T>>,
  deadline: Deadline,
  order: Vec<usize>,
  on_win: Option<WinHook>,
) -> OpFuture<Selected<T>> {
  let channels: Vec<Channel<T>> =
    requests.iter().map(|r| r.channel().clone()).collect();
  let executor = Arc::clone(channels[0].runtime().executor());
  let (fut, resolver) = OpFuture::new(Arc::clone(&executor));

  let state = Arc::new(SelectState {
    resolver,
    offer: OnceLock::new(),
    channels,
    executor,
    dead: AtomicUsize::new(0),
    total: requests.len(),
    immediate: deadline == Deadline::Immediate,
    saw_retired: AtomicBool::new(false),
    saw_timeout: AtomicBool::new(false),
  });

  let offer = Offer::with_commit({
    let state = Arc::clone(&state);
    Box::new(move |index| {
      tracing::trace!(index, "selection committed");
      if let Some(hook) = on_win {
        hook(index);
      }
      state.schedule_sweep();
    })
  });
  let _ = state.offer.set(Arc::clone(&offer));

  // Issue the candidates in policy order; each entry reports back with
  // its original index.
  let mut slots: Vec<Option<SelectRequest<T>>> =
    requests.into_iter().map(Some).collect();
  for &index in &order {
    let request = slots[index].take().expect("each request is issued once");
    let handle = OfferHandle::new(Arc::clone(&offer), index);
    match request {
      SelectRequest::Read(channel) => {
        let state = Arc::clone(&state);
        channel.read_offered(handle, deadline).when_done(move |res| {
          state.entry_done(index, res.map(SelectOutcome::Received));
        });
      }
      SelectRequest::Write(channel, value) => {
        let state = Arc::clone(&state);
        channel.write_offered(value, handle, deadline).when_done(move |res| {
          state.entry_done(index, res.map(|()| SelectOutcome::Sent));
        });
      }
    }
  }

  fut
}

// ---------------------------------------------------------------------------
// ChannelSet
// ---------------------------------------------------------------------------

/// How high a win counter may climb before the set rebalances by
/// subtracting the common minimum. Uniform subtraction cannot change the
/// relative order the counters encode.
const REBALANCE_LIMIT: u64 = 1 << 20;

/// A fixed group of channels selected over repeatedly.
///
/// The set tracks how often each member won and, under
/// [`Priority::Fair`], issues the least-used members first. Under steady
/// demand no member starves: a channel that keeps losing sinks to the
/// front of the order until it wins.
pub struct ChannelSet<T: Send + 'static> {
  channels: Vec<Channel<T>>,
  counters: Arc<Mutex<Vec<u64>>>,
}

impl<T: Send + 'static> ChannelSet<T> {
  /// Builds a set; refuses an empty member list synchronously.
  pub fn new(channels: Vec<Channel<T>>) -> Result<ChannelSet<T>, ChannelError> {
    if channels.is_empty() {
      return Err(ChannelError::InvalidArgument(
        "a channel set needs at least one member".into(),
      ));
    }
    let counters = Arc::new(Mutex::new(vec![0; channels.len()]));
    Ok(ChannelSet { channels, counters })
  }

  pub fn channels(&self) -> &[Channel<T>] {
    &self.channels
  }

  /// Reads from whichever member first has a value, least-used first.
  pub fn read_any(&self, deadline: Deadline) -> OpFuture<Selected<T>> {
    let requests =
      self.channels.iter().map(|ch| SelectRequest::Read(ch.clone())).collect();
    self.select(requests, deadline, Priority::Fair)
  }

  /// Writes `value` to whichever member first takes it, least-used
  /// first. Every candidate entry carries its own copy of the value;
  /// only the winning copy is ever observed.
  pub fn write_any(&self, value: T, deadline: Deadline) -> OpFuture<Selected<T>>
  where
    T: Clone,
  {
    let requests = self
      .channels
      .iter()
      .map(|ch| SelectRequest::Write(ch.clone(), value.clone()))
      .collect();
    self.select(requests, deadline, Priority::Fair)
  }

  /// Selects over explicit requests against this set's win counters.
  ///
  /// The requests don't have to target set members, but fairness
  /// accounting assumes request `i` corresponds to counter `i`.
  pub fn select(
    &self,
    requests: Vec<SelectRequest<T>>,
    deadline: Deadline,
    priority: Priority,
  ) -> OpFuture<Selected<T>> {
    let n = requests.len();
    let order = match priority {
      Priority::First | Priority::Any => (0..n).collect(),
      Priority::Random => {
        let mut order: Vec<usize> = (0..n).collect();
        fastrand::shuffle(&mut order);
        order
      }
      Priority::Fair => self.fair_order(n),
    };

    let counters = Arc::clone(&self.counters);
    let hook: WinHook = Box::new(move |winner| {
      let mut counters = counters.lock();
      if let Some(count) = counters.get_mut(winner) {
        *count += 1;
      }
      if counters.iter().any(|&c| c >= REBALANCE_LIMIT) {
        let min = counters.iter().copied().min().unwrap_or(0);
        if min > 0 {
          for count in counters.iter_mut() {
            *count -= min;
          }
        }
      }
    });

    select_impl(requests, deadline, order, Some(hook))
  }

  /// Ascending win count, declaration order breaking ties.
  fn fair_order(&self, n: usize) -> Vec<usize> {
    let counters = self.counters.lock();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| (counters.get(i).copied().unwrap_or(0), i));
    order
  }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runtime::Runtime;
  use std::time::Duration;

  fn runtime() -> Arc<Runtime> {
    Runtime::new()
  }

  #[test]
  fn first_priority_takes_the_earliest_ready_channel() {
    let rt = runtime();
    let a = Channel::<u32>::bounded(&rt, 1);
    let b = Channel::<u32>::bounded(&rt, 1);
    a.write(7).unwrap();

    let sel = select(
      vec![SelectRequest::Read(a.clone()), SelectRequest::Read(b.clone())],
      Deadline::Infinite,
      Priority::First,
    )
    .unwrap()
    .blocking()
    .unwrap();

    assert_eq!(sel.index, 0);
    assert_eq!(sel.outcome, SelectOutcome::Received(7));
    assert!(b.is_empty());
    assert_eq!(b.pending_readers(), 0, "the losing entry must not linger");
  }

  #[test]
  fn select_blocks_until_some_channel_is_ready() {
    let rt = runtime();
    let a = Channel::<u32>::rendezvous(&rt);
    let b = Channel::<u32>::rendezvous(&rt);

    let fut = select(
      vec![SelectRequest::Read(a.clone()), SelectRequest::Read(b.clone())],
      Deadline::Infinite,
      Priority::First,
    )
    .unwrap();
    assert!(!fut.is_done());

    b.write(9).unwrap();
    let sel = fut.blocking().unwrap();
    assert_eq!(sel.index, 1);
    assert_eq!(sel.outcome, SelectOutcome::Received(9));
  }

  #[test]
  fn select_write_delivers_exactly_one_copy() {
    let rt = runtime();
    let a = Channel::<u32>::rendezvous(&rt);
    let b = Channel::<u32>::bounded(&rt, 1);

    let sel = select(
      vec![
        SelectRequest::Write(a.clone(), 1),
        SelectRequest::Write(b.clone(), 2),
      ],
      Deadline::Infinite,
      Priority::First,
    )
    .unwrap()
    .blocking()
    .unwrap();

    // `a` has no reader, so the buffered `b` wins.
    assert_eq!(sel.index, 1);
    assert_eq!(sel.outcome, SelectOutcome::Sent);
    assert_eq!(b.read(), Ok(2));

    // The losing entry is swept off `a` by the executor.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(a.pending_writers(), 0);
  }

  #[test]
  fn select_timeout_surfaces_once_and_cleans_up() {
    let rt = runtime();
    let a = Channel::<u32>::rendezvous(&rt);
    let b = Channel::<u32>::rendezvous(&rt);

    let res = select(
      vec![SelectRequest::Read(a.clone()), SelectRequest::Read(b.clone())],
      Deadline::after(Duration::from_millis(50)),
      Priority::First,
    )
    .unwrap()
    .blocking();

    assert_eq!(res.unwrap_err(), ChannelError::Timeout);

    // Entries are gone; later writers pair with later readers.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(a.pending_readers(), 0);
    assert_eq!(b.pending_readers(), 0);
  }

  #[test]
  fn select_over_retired_channels_reports_retired() {
    let rt = runtime();
    let a = Channel::<u32>::rendezvous(&rt);
    let b = Channel::<u32>::rendezvous(&rt);
    a.retire(true).blocking().unwrap();
    b.retire(true).blocking().unwrap();

    let res = select(
      vec![SelectRequest::Read(a), SelectRequest::Read(b)],
      Deadline::Infinite,
      Priority::First,
    )
    .unwrap()
    .blocking();

    assert_eq!(res.unwrap_err(), ChannelError::Retired);
  }

  #[test]
  fn empty_selection_is_refused() {
    let res = select::<u32>(Vec::new(), Deadline::Infinite, Priority::First);
    assert!(matches!(res, Err(ChannelError::InvalidArgument(_))));
  }

  #[test]
  fn random_priority_still_returns_a_real_winner() {
    let rt = runtime();
    let a = Channel::<u32>::bounded(&rt, 1);
    let b = Channel::<u32>::bounded(&rt, 1);
    a.write(1).unwrap();
    b.write(2).unwrap();

    for _ in 0..20 {
      let sel = select(
        vec![SelectRequest::Read(a.clone()), SelectRequest::Read(b.clone())],
        Deadline::Infinite,
        Priority::Random,
      )
      .unwrap()
      .blocking()
      .unwrap();

      match sel.index {
        0 => {
          assert!(matches!(sel.outcome, SelectOutcome::Received(1)));
          a.write(1).unwrap();
        }
        1 => {
          assert!(matches!(sel.outcome, SelectOutcome::Received(2)));
          b.write(2).unwrap();
        }
        other => panic!("impossible winner index {other}"),
      }
    }
  }

  #[test]
  fn fair_set_alternates_between_ready_channels() {
    let rt = runtime();
    let a = Channel::<u32>::bounded(&rt, 1);
    let b = Channel::<u32>::bounded(&rt, 1);
    a.write(1).unwrap();
    b.write(2).unwrap();

    let set = ChannelSet::new(vec![a.clone(), b.clone()]).unwrap();
    let mut wins = [0u32; 2];

    for _ in 0..100 {
      let sel = set.read_any(Deadline::Infinite).blocking().unwrap();
      wins[sel.index] += 1;
      // Keep both channels ready.
      match sel.index {
        0 => a.write(1).unwrap(),
        _ => b.write(2).unwrap(),
      }
    }

    let diff = wins[0].abs_diff(wins[1]);
    assert!(diff <= 2, "fair selection skewed: {wins:?}");
  }

  #[test]
  fn empty_set_is_refused() {
    assert!(matches!(
      ChannelSet::<u32>::new(Vec::new()),
      Err(ChannelError::InvalidArgument(_))
    ));
  }
}
