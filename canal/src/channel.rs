//! Typed channels with a bounded buffer and a pairing engine.
//!
//! A [`Channel`] moves values from writers to readers with first-in
//! first-out ordering. A channel with buffer capacity zero is a pure
//! rendezvous: every write hands its value directly to one read. With a
//! non-zero capacity, writes complete early until the buffer fills.
//!
//! Operations never block the calling thread at the API: `read_async` and
//! `write_async` return an [`OpFuture`] immediately, and the blocking
//! variants are thin facades over it. Whenever an operation cannot
//! complete on the spot it is parked in a pending queue, to be matched by
//! the engine when the counterpart arrives, or failed by a deadline,
//! a queue-overflow eviction, or retirement.
//!
//! The engine maintains three invariants between steps: queued readers
//! imply an empty buffer and no queued writers; queued writers imply a
//! full buffer and no queued readers; a retired channel holds nothing.
//! Every queue entry owns an uncompleted resolver, and an entry's timer
//! is canceled before the entry is completed, so a fired timer can never
//! observe a finished operation.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::ChannelError;
use crate::future::{OpFuture, Resolver};
use crate::offer::{Offer, OfferHandle, PairProbe, probe_pair};
use crate::runtime::Runtime;
use crate::sync::Mutex;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// What to do when a pending queue is at capacity and another operation
/// wants in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
  /// Fail the incoming operation with [`ChannelError::QueueOverflow`].
  #[default]
  Reject,
  /// Evict the most recently queued entry, then admit the newcomer.
  EvictNewest,
  /// Evict the oldest queued entry, then admit the newcomer.
  EvictOldest,
}

/// Configuration for [`Channel::new`].
///
/// The default is an anonymous rendezvous channel with unbounded pending
/// queues and the [`Reject`](OverflowPolicy::Reject) policy.
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
  name: Option<String>,
  buffer: usize,
  max_pending_readers: Option<usize>,
  max_pending_writers: Option<usize>,
  reader_overflow: OverflowPolicy,
  writer_overflow: OverflowPolicy,
}

impl ChannelOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Buffer capacity. Zero makes the channel a rendezvous.
  pub fn buffer(mut self, capacity: usize) -> Self {
    self.buffer = capacity;
    self
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Cap on queued readers; `None` is unbounded. A cap of zero is
  /// rejected at construction.
  pub fn max_pending_readers(mut self, cap: Option<usize>) -> Self {
    self.max_pending_readers = cap;
    self
  }

  pub fn max_pending_writers(mut self, cap: Option<usize>) -> Self {
    self.max_pending_writers = cap;
    self
  }

  pub fn reader_overflow(mut self, policy: OverflowPolicy) -> Self {
    self.reader_overflow = policy;
    self
  }

  pub fn writer_overflow(mut self, policy: OverflowPolicy) -> Self {
    self.writer_overflow = policy;
    self
  }

  fn validate(&self) -> Result<(), ChannelError> {
    if self.max_pending_readers == Some(0) {
      return Err(ChannelError::InvalidArgument(
        "reader pending-queue cap must be at least 1".into(),
      ));
    }
    if self.max_pending_writers == Some(0) {
      return Err(ChannelError::InvalidArgument(
        "writer pending-queue cap must be at least 1".into(),
      ));
    }
    Ok(())
  }
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// How long an operation may stay queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
  /// Queue indefinitely; no timer is installed.
  Infinite,
  /// Match right now or fail with [`ChannelError::Timeout`] without ever
  /// queuing.
  Immediate,
  /// Queue until the given monotonic instant.
  At(Instant),
}

impl Deadline {
  /// A deadline the given duration from now.
  pub fn after(timeout: Duration) -> Self {
    Deadline::At(Instant::now() + timeout)
  }
}

impl From<Duration> for Deadline {
  fn from(timeout: Duration) -> Self {
    Deadline::after(timeout)
  }
}

impl From<Instant> for Deadline {
  fn from(at: Instant) -> Self {
    Deadline::At(at)
  }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
  Open,
  /// Retiring gracefully: nothing new is admitted, leftovers drain.
  Draining,
  Retired,
}

struct ReadWaiter<T: Send + 'static> {
  seq: u64,
  resolver: Resolver<T>,
  offer: Option<OfferHandle>,
  timer: Option<crate::timer::TimerHandle>,
}

struct WriteWaiter<T> {
  seq: u64,
  value: T,
  resolver: Resolver<()>,
  offer: Option<OfferHandle>,
  timer: Option<crate::timer::TimerHandle>,
}

struct State<T: Send + 'static> {
  buffer: VecDeque<T>,
  readers: VecDeque<ReadWaiter<T>>,
  writers: VecDeque<WriteWaiter<T>>,
  lifecycle: Lifecycle,
  joined_readers: usize,
  joined_writers: usize,
  retire_waiters: Vec<Resolver<()>>,
}

struct Core<T: Send + 'static> {
  name: Option<String>,
  buffer_cap: usize,
  reader_cap: Option<usize>,
  writer_cap: Option<usize>,
  reader_overflow: OverflowPolicy,
  writer_overflow: OverflowPolicy,
  runtime: Arc<Runtime>,
  state: Mutex<State<T>>,
  next_seq: AtomicU64,
}

fn fail_reader<T>(reader: ReadWaiter<T>, error: ChannelError)
where
  T: Send + 'static,
{
  if let Some(timer) = reader.timer {
    timer.cancel();
  }
  reader.resolver.complete_error(error);
}

fn fail_writer<T>(writer: WriteWaiter<T>, error: ChannelError)
where
  T: Send + 'static,
{
  if let Some(timer) = writer.timer {
    timer.cancel();
  }
  writer.resolver.complete_error(error);
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A typed channel handle. Cloning is cheap and every clone refers to the
/// same underlying channel.
pub struct Channel<T: Send + 'static> {
  core: Arc<Core<T>>,
}

impl<T: Send + 'static> Clone for Channel<T> {
  fn clone(&self) -> Self {
    Self { core: Arc::clone(&self.core) }
  }
}

impl<T: Send + 'static> fmt::Debug for Channel<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let st = self.core.state.lock();
    f.debug_struct("Channel")
      .field("name", &self.core.name)
      .field("capacity", &self.core.buffer_cap)
      .field("buffered", &st.buffer.len())
      .field("pending_readers", &st.readers.len())
      .field("pending_writers", &st.writers.len())
      .field("lifecycle", &st.lifecycle)
      .finish()
  }
}

impl<T: Send + 'static> Channel<T> {
  /// Builds a channel from explicit options.
  pub fn new(
    runtime: &Arc<Runtime>,
    options: ChannelOptions,
  ) -> Result<Channel<T>, ChannelError> {
    options.validate()?;
    Ok(Self::build(runtime, options))
  }

  /// An anonymous rendezvous channel (buffer capacity zero).
  pub fn rendezvous(runtime: &Arc<Runtime>) -> Channel<T> {
    Self::build(runtime, ChannelOptions::default())
  }

  /// An anonymous channel buffering up to `capacity` values.
  pub fn bounded(runtime: &Arc<Runtime>, capacity: usize) -> Channel<T> {
    Self::build(runtime, ChannelOptions::default().buffer(capacity))
  }

  fn build(runtime: &Arc<Runtime>, options: ChannelOptions) -> Channel<T> {
    Channel {
      core: Arc::new(Core {
        name: options.name,
        buffer_cap: options.buffer,
        reader_cap: options.max_pending_readers,
        writer_cap: options.max_pending_writers,
        reader_overflow: options.reader_overflow,
        writer_overflow: options.writer_overflow,
        runtime: Arc::clone(runtime),
        state: Mutex::new(State {
          buffer: VecDeque::new(),
          readers: VecDeque::new(),
          writers: VecDeque::new(),
          lifecycle: Lifecycle::Open,
          joined_readers: 0,
          joined_writers: 0,
          retire_waiters: Vec::new(),
        }),
        next_seq: AtomicU64::new(0),
      }),
    }
  }

  // -- observers ----------------------------------------------------------

  pub fn name(&self) -> Option<&str> {
    self.core.name.as_deref()
  }

  pub fn capacity(&self) -> usize {
    self.core.buffer_cap
  }

  /// Number of values currently buffered.
  pub fn len(&self) -> usize {
    self.core.state.lock().buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn pending_readers(&self) -> usize {
    self.core.state.lock().readers.len()
  }

  pub fn pending_writers(&self) -> usize {
    self.core.state.lock().writers.len()
  }

  pub fn is_retired(&self) -> bool {
    self.core.state.lock().lifecycle == Lifecycle::Retired
  }

  pub(crate) fn runtime(&self) -> &Arc<Runtime> {
    &self.core.runtime
  }

  // -- async operations ---------------------------------------------------

  /// Starts a read with no deadline.
  pub fn read_async(&self) -> OpFuture<T> {
    self.read_inner(None, Deadline::Infinite)
  }

  /// Starts a read that fails with [`ChannelError::Timeout`] if nothing
  /// matched by `deadline`.
  pub fn read_async_before(&self, deadline: Deadline) -> OpFuture<T> {
    self.read_inner(None, deadline)
  }

  /// Starts a write with no deadline.
  pub fn write_async(&self, value: T) -> OpFuture<()> {
    self.write_inner(value, None, Deadline::Infinite)
  }

  pub fn write_async_before(
    &self,
    value: T,
    deadline: Deadline,
  ) -> OpFuture<()> {
    self.write_inner(value, None, deadline)
  }

  pub(crate) fn read_offered(
    &self,
    offer: OfferHandle,
    deadline: Deadline,
  ) -> OpFuture<T> {
    self.read_inner(Some(offer), deadline)
  }

  pub(crate) fn write_offered(
    &self,
    value: T,
    offer: OfferHandle,
    deadline: Deadline,
  ) -> OpFuture<()> {
    self.write_inner(value, Some(offer), deadline)
  }

  // -- blocking facades ---------------------------------------------------

  /// Reads one value, parking the calling thread until it arrives.
  pub fn read(&self) -> Result<T, ChannelError> {
    self.read_async().blocking()
  }

  pub fn read_timeout(&self, timeout: Duration) -> Result<T, ChannelError> {
    self.read_async_before(Deadline::after(timeout)).blocking()
  }

  /// Reads only if a value (or a queued writer) is available right now.
  pub fn try_read(&self) -> Result<T, ChannelError> {
    self.read_async_before(Deadline::Immediate).blocking()
  }

  /// Writes one value, parking the calling thread until it is accepted.
  pub fn write(&self, value: T) -> Result<(), ChannelError> {
    self.write_async(value).blocking()
  }

  pub fn write_timeout(
    &self,
    value: T,
    timeout: Duration,
  ) -> Result<(), ChannelError> {
    self.write_async_before(value, Deadline::after(timeout)).blocking()
  }

  /// Writes only if the value can be accepted right now.
  pub fn try_write(&self, value: T) -> Result<(), ChannelError> {
    self.write_async_before(value, Deadline::Immediate).blocking()
  }

  // -- engine: write ------------------------------------------------------

  fn write_inner(
    &self,
    value: T,
    offer: Option<OfferHandle>,
    deadline: Deadline,
  ) -> OpFuture<()> {
    let executor = Arc::clone(self.core.runtime.executor());
    let (fut, resolver) = OpFuture::new(executor);
    let mut st = self.core.state.lock();

    // Lifecycle transitions are ordered by this lock: whoever got here
    // after a retire fails, whoever got here before proceeded.
    if st.lifecycle != Lifecycle::Open {
      resolver.complete_error(ChannelError::Retired);
      return fut;
    }

    // Hand off to a queued reader. Readers queued means the buffer is
    // empty, so direct delivery preserves order.
    let mut idx = 0;
    while idx < st.readers.len() {
      let candidate = st.readers[idx].offer.clone();
      match probe_pair(
        candidate.as_ref().map(|h| h.offer()),
        offer.as_ref().map(|h| h.offer()),
      ) {
        PairProbe::Cleared { first, second } => {
          let reader = st.readers.remove(idx).expect("probed entry exists");
          if let Some(timer) = reader.timer {
            timer.cancel();
          }
          reader.resolver.complete_value(value);
          resolver.complete_value(());
          if let Some(guard) = first {
            guard.commit(candidate.as_ref().map_or(0, |h| h.tag()));
          }
          if let Some(guard) = second {
            guard.commit(offer.as_ref().map_or(0, |h| h.tag()));
          }
          return fut;
        }
        PairProbe::FirstTaken => {
          // The reader's selection already matched elsewhere.
          let stale = st.readers.remove(idx).expect("probed entry exists");
          fail_reader(stale, ChannelError::Canceled);
        }
        PairProbe::SecondTaken => {
          resolver.cancel();
          return fut;
        }
        PairProbe::SameAgent => idx += 1,
      }
    }

    // Buffer admission. An offered write that lands in the buffer is a
    // match: the offer commits before anyone can observe the value.
    if st.buffer.len() < self.core.buffer_cap {
      match &offer {
        None => {
          st.buffer.push_back(value);
          resolver.complete_value(());
        }
        Some(handle) => match handle.offer().probe() {
          Some(guard) => {
            st.buffer.push_back(value);
            resolver.complete_value(());
            guard.commit(handle.tag());
          }
          None => {
            resolver.cancel();
          }
        },
      }
      return fut;
    }

    if deadline == Deadline::Immediate {
      resolver.complete_error(ChannelError::Timeout);
      return fut;
    }

    // Queue, applying the overflow policy.
    if let Some(cap) = self.core.writer_cap {
      if st.writers.len() >= cap {
        tracing::trace!(name = ?self.core.name, "writer queue overflow");
        match self.core.writer_overflow {
          OverflowPolicy::Reject => {
            resolver.complete_error(ChannelError::QueueOverflow);
            return fut;
          }
          OverflowPolicy::EvictNewest => {
            let victim = st.writers.pop_back().expect("cap is at least one");
            fail_writer(victim, ChannelError::QueueOverflow);
          }
          OverflowPolicy::EvictOldest => {
            let victim = st.writers.pop_front().expect("cap is at least one");
            fail_writer(victim, ChannelError::QueueOverflow);
          }
        }
      }
    }

    let seq = self.core.next_seq.fetch_add(1, Ordering::Relaxed);
    let timer = match deadline {
      Deadline::At(when) => {
        let chan = self.clone();
        Some(
          self
            .core
            .runtime
            .timer()
            .schedule(when, Box::new(move || chan.expire_writer(seq))),
        )
      }
      _ => None,
    };
    st.writers.push_back(WriteWaiter { seq, value, resolver, offer, timer });
    fut
  }

  // -- engine: read -------------------------------------------------------

  fn read_inner(
    &self,
    offer: Option<OfferHandle>,
    deadline: Deadline,
  ) -> OpFuture<T> {
    let executor = Arc::clone(self.core.runtime.executor());
    let (fut, resolver) = OpFuture::new(executor);
    let mut st = self.core.state.lock();

    match st.lifecycle {
      Lifecycle::Retired => {
        resolver.complete_error(ChannelError::Retired);
        return fut;
      }
      Lifecycle::Draining
        if st.buffer.is_empty() && st.writers.is_empty() =>
      {
        resolver.complete_error(ChannelError::Retired);
        return fut;
      }
      _ => {}
    }

    // Buffered value available.
    if !st.buffer.is_empty() {
      match &offer {
        None => {
          let value = st.buffer.pop_front().expect("buffer is non-empty");
          resolver.complete_value(value);
        }
        Some(handle) => match handle.offer().probe() {
          Some(guard) => {
            let value = st.buffer.pop_front().expect("buffer is non-empty");
            resolver.complete_value(value);
            guard.commit(handle.tag());
          }
          None => {
            resolver.cancel();
            return fut;
          }
        },
      }
      self.refill_from_writers(&mut st);
      self.check_drained(&mut st);
      return fut;
    }

    // No buffer: rendezvous directly with a queued writer.
    let mut idx = 0;
    while idx < st.writers.len() {
      let candidate = st.writers[idx].offer.clone();
      match probe_pair(
        candidate.as_ref().map(|h| h.offer()),
        offer.as_ref().map(|h| h.offer()),
      ) {
        PairProbe::Cleared { first, second } => {
          let writer = st.writers.remove(idx).expect("probed entry exists");
          if let Some(timer) = writer.timer {
            timer.cancel();
          }
          writer.resolver.complete_value(());
          resolver.complete_value(writer.value);
          if let Some(guard) = first {
            guard.commit(candidate.as_ref().map_or(0, |h| h.tag()));
          }
          if let Some(guard) = second {
            guard.commit(offer.as_ref().map_or(0, |h| h.tag()));
          }
          self.check_drained(&mut st);
          return fut;
        }
        PairProbe::FirstTaken => {
          let stale = st.writers.remove(idx).expect("probed entry exists");
          fail_writer(stale, ChannelError::Canceled);
        }
        PairProbe::SecondTaken => {
          resolver.cancel();
          return fut;
        }
        PairProbe::SameAgent => idx += 1,
      }
    }

    if st.lifecycle == Lifecycle::Draining {
      // Whatever was left to drain evaporated as stale entries.
      self.check_drained(&mut st);
      resolver.complete_error(ChannelError::Retired);
      return fut;
    }

    if deadline == Deadline::Immediate {
      resolver.complete_error(ChannelError::Timeout);
      return fut;
    }

    if let Some(cap) = self.core.reader_cap {
      if st.readers.len() >= cap {
        tracing::trace!(name = ?self.core.name, "reader queue overflow");
        match self.core.reader_overflow {
          OverflowPolicy::Reject => {
            resolver.complete_error(ChannelError::QueueOverflow);
            return fut;
          }
          OverflowPolicy::EvictNewest => {
            let victim = st.readers.pop_back().expect("cap is at least one");
            fail_reader(victim, ChannelError::QueueOverflow);
          }
          OverflowPolicy::EvictOldest => {
            let victim = st.readers.pop_front().expect("cap is at least one");
            fail_reader(victim, ChannelError::QueueOverflow);
          }
        }
      }
    }

    let seq = self.core.next_seq.fetch_add(1, Ordering::Relaxed);
    let timer = match deadline {
      Deadline::At(when) => {
        let chan = self.clone();
        Some(
          self
            .core
            .runtime
            .timer()
            .schedule(when, Box::new(move || chan.expire_reader(seq))),
        )
      }
      _ => None,
    };
    st.readers.push_back(ReadWaiter { seq, resolver, offer, timer });
    fut
  }

  /// Moves queued writers into freed buffer space, oldest first.
  fn refill_from_writers(&self, st: &mut State<T>) {
    while st.buffer.len() < self.core.buffer_cap {
      let Some(front) = st.writers.front() else { break };
      let candidate = front.offer.clone();
      match candidate {
        None => {
          let writer = st.writers.pop_front().expect("front exists");
          if let Some(timer) = writer.timer {
            timer.cancel();
          }
          st.buffer.push_back(writer.value);
          writer.resolver.complete_value(());
        }
        Some(handle) => match handle.offer().probe() {
          Some(guard) => {
            let writer = st.writers.pop_front().expect("front exists");
            if let Some(timer) = writer.timer {
              timer.cancel();
            }
            st.buffer.push_back(writer.value);
            writer.resolver.complete_value(());
            guard.commit(handle.tag());
          }
          None => {
            let stale = st.writers.pop_front().expect("front exists");
            fail_writer(stale, ChannelError::Canceled);
          }
        },
      }
    }
  }

  // -- retirement ---------------------------------------------------------

  /// Retires the channel.
  ///
  /// Graceful (`immediate == false`): nothing new is admitted, queued
  /// readers fail right away (nothing can ever arrive for them), and the
  /// buffer plus queued writers drain through subsequent reads. The
  /// returned future completes once everything has drained.
  ///
  /// Immediate: every queued entry fails with
  /// [`ChannelError::Retired`] and buffered values are dropped.
  ///
  /// Retiring an already retired channel yields a completed future.
  pub fn retire(&self, immediate: bool) -> OpFuture<()> {
    let executor = Arc::clone(self.core.runtime.executor());
    let (fut, resolver) = OpFuture::new(executor);
    let mut st = self.core.state.lock();

    match st.lifecycle {
      Lifecycle::Retired => {
        resolver.complete_value(());
      }
      Lifecycle::Draining if !immediate => {
        st.retire_waiters.push(resolver);
      }
      _ => {
        if immediate {
          tracing::debug!(name = ?self.core.name, "retiring immediately");
          for reader in st.readers.drain(..).collect::<Vec<_>>() {
            fail_reader(reader, ChannelError::Retired);
          }
          for writer in st.writers.drain(..).collect::<Vec<_>>() {
            fail_writer(writer, ChannelError::Retired);
          }
          st.buffer.clear();
          st.lifecycle = Lifecycle::Retired;
          for waiter in st.retire_waiters.drain(..) {
            waiter.complete_value(());
          }
          resolver.complete_value(());
        } else {
          tracing::debug!(name = ?self.core.name, "retiring gracefully");
          st.lifecycle = Lifecycle::Draining;
          for reader in st.readers.drain(..).collect::<Vec<_>>() {
            fail_reader(reader, ChannelError::Retired);
          }
          st.retire_waiters.push(resolver);
          self.check_drained(&mut st);
        }
      }
    }
    fut
  }

  fn check_drained(&self, st: &mut State<T>) {
    if st.lifecycle == Lifecycle::Draining
      && st.buffer.is_empty()
      && st.writers.is_empty()
      && st.readers.is_empty()
    {
      st.lifecycle = Lifecycle::Retired;
      tracing::debug!(name = ?self.core.name, "channel retired");
      for waiter in st.retire_waiters.drain(..) {
        waiter.complete_value(());
      }
    }
  }

  // -- timeouts -----------------------------------------------------------

  fn expire_reader(&self, seq: u64) {
    let mut st = self.core.state.lock();
    if let Some(pos) = st.readers.iter().position(|r| r.seq == seq) {
      let reader = st.readers.remove(pos).expect("position is valid");
      tracing::trace!(name = ?self.core.name, "pending read timed out");
      reader.resolver.complete_error(ChannelError::Timeout);
      self.check_drained(&mut st);
    }
  }

  fn expire_writer(&self, seq: u64) {
    let mut st = self.core.state.lock();
    if let Some(pos) = st.writers.iter().position(|w| w.seq == seq) {
      let writer = st.writers.remove(pos).expect("position is valid");
      tracing::trace!(name = ?self.core.name, "pending write timed out");
      writer.resolver.complete_error(ChannelError::Timeout);
      self.check_drained(&mut st);
    }
  }

  // -- selection support --------------------------------------------------

  /// Removes every queued entry attached to `offer`, failing it with
  /// [`ChannelError::Canceled`]. Called by the selection driver once the
  /// choice has been decided elsewhere.
  pub(crate) fn evict_offer(&self, offer: &Offer) {
    let target = offer.id();
    let mut st = self.core.state.lock();

    let mut idx = 0;
    while idx < st.readers.len() {
      let matches =
        st.readers[idx].offer.as_ref().is_some_and(|h| h.offer().id() == target);
      if matches {
        let entry = st.readers.remove(idx).expect("index is valid");
        fail_reader(entry, ChannelError::Canceled);
      } else {
        idx += 1;
      }
    }

    let mut idx = 0;
    while idx < st.writers.len() {
      let matches =
        st.writers[idx].offer.as_ref().is_some_and(|h| h.offer().id() == target);
      if matches {
        let entry = st.writers.remove(idx).expect("index is valid");
        fail_writer(entry, ChannelError::Canceled);
      } else {
        idx += 1;
      }
    }

    self.check_drained(&mut st);
  }

  // -- end bookkeeping ----------------------------------------------------

  /// Registers a live read end. Returns `false` when the channel is
  /// already retired, in which case no count was taken.
  pub(crate) fn join_read(&self) -> bool {
    let mut st = self.core.state.lock();
    if st.lifecycle == Lifecycle::Retired {
      return false;
    }
    st.joined_readers += 1;
    true
  }

  pub(crate) fn join_write(&self) -> bool {
    let mut st = self.core.state.lock();
    if st.lifecycle == Lifecycle::Retired {
      return false;
    }
    st.joined_writers += 1;
    true
  }

  /// The last read end leaving retires the channel: with no reader ever
  /// coming back, queued writers and buffered values are undeliverable.
  pub(crate) fn leave_read(&self) {
    let mut st = self.core.state.lock();
    st.joined_readers = st.joined_readers.saturating_sub(1);
    if st.joined_readers > 0 || st.lifecycle == Lifecycle::Retired {
      return;
    }
    tracing::debug!(name = ?self.core.name, "last read end released");
    for writer in st.writers.drain(..).collect::<Vec<_>>() {
      fail_writer(writer, ChannelError::Retired);
    }
    st.buffer.clear();
    for reader in st.readers.drain(..).collect::<Vec<_>>() {
      fail_reader(reader, ChannelError::Retired);
    }
    st.lifecycle = Lifecycle::Draining;
    self.check_drained(&mut st);
  }

  /// The last write end leaving retires gracefully: buffered values stay
  /// readable until drained.
  pub(crate) fn leave_write(&self) {
    let mut st = self.core.state.lock();
    st.joined_writers = st.joined_writers.saturating_sub(1);
    if st.joined_writers > 0 || st.lifecycle != Lifecycle::Open {
      return;
    }
    tracing::debug!(name = ?self.core.name, "last write end released");
    st.lifecycle = Lifecycle::Draining;
    for reader in st.readers.drain(..).collect::<Vec<_>>() {
      fail_reader(reader, ChannelError::Retired);
    }
    self.check_drained(&mut st);
  }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
