//! Two-phase arbitration for multi-channel choice.
//!
//! A choosing agent that is queued on several channels at once shares one
//! [`Offer`] across all of its pending entries. Before a channel pairs an
//! entry whose offer is `O`, it probes `O`: a successful probe holds the
//! arbitration lock and obliges the caller to either commit (exactly one
//! pairing ever commits) or withdraw. A failed probe means the agent
//! already matched elsewhere and the stale entry can be collected.
//!
//! When a pairing involves two offers, as when a selecting reader meets
//! a selecting writer, both arbitration locks are taken in ascending id
//! order. Ids are globally unique and the order is total, so two pairings
//! can never hold each other's second lock. Channel locks are never
//! acquired while an offer lock is held, which closes the remaining path
//! to a cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::sync::{Mutex, MutexGuard};

type CommitFn = Box<dyn FnOnce(usize) + Send + 'static>;

fn next_offer_id() -> u64 {
  static NEXT: AtomicU64 = AtomicU64::new(0);
  NEXT.fetch_add(1, Ordering::Relaxed)
}

struct OfferState {
  taken: bool,
  on_commit: Option<CommitFn>,
}

/// Arbitration cell shared by all pending entries of one choosing agent.
pub(crate) struct Offer {
  id: u64,
  state: Mutex<OfferState>,
}

impl Offer {
  pub(crate) fn new() -> Arc<Offer> {
    Self::build(None)
  }

  /// An offer whose commit runs `on_commit` with the winning entry's tag.
  pub(crate) fn with_commit(on_commit: CommitFn) -> Arc<Offer> {
    Self::build(Some(on_commit))
  }

  fn build(on_commit: Option<CommitFn>) -> Arc<Offer> {
    Arc::new(Offer {
      id: next_offer_id(),
      state: Mutex::new(OfferState { taken: false, on_commit }),
    })
  }

  pub(crate) fn id(&self) -> u64 {
    self.id
  }

  /// Acquires the arbitration lock unless the offer is already taken.
  ///
  /// A `Some` return holds the lock: the caller must consume the guard
  /// with [`OfferGuard::commit`] or [`OfferGuard::withdraw`] before doing
  /// anything else.
  pub(crate) fn probe(&self) -> Option<OfferGuard<'_>> {
    let guard = self.state.lock();
    if guard.taken { None } else { Some(OfferGuard { guard }) }
  }

  /// Marks the offer taken without committing any pairing.
  ///
  /// Used when the choice as a whole ends (deadline expiry, or every
  /// candidate failing) so that no channel can commit afterwards.
  /// Returns whether this call won the arbitration.
  pub(crate) fn abort(&self) -> bool {
    match self.probe() {
      Some(mut guard) => {
        guard.guard.taken = true;
        guard.guard.on_commit = None;
        true
      }
      None => false,
    }
  }

  /// Observational only; a `false` answer is stale the moment it is
  /// read. Pairing decisions go through [`probe`](Self::probe).
  #[cfg(test)]
  pub(crate) fn is_taken(&self) -> bool {
    self.state.lock().taken
  }
}

/// Held arbitration lock. Dropping the guard without committing is a
/// withdrawal: the offer stays untaken.
pub(crate) struct OfferGuard<'a> {
  guard: MutexGuard<'a, OfferState>,
}

impl OfferGuard<'_> {
  /// Seals the pairing: the offer becomes taken and the commit hook, if
  /// any, observes the winning entry's `tag`. The arbitration lock is
  /// released when the guard drops, after the hook has run.
  pub(crate) fn commit(mut self, tag: usize) {
    debug_assert!(!self.guard.taken, "offer committed twice");
    self.guard.taken = true;
    if let Some(hook) = self.guard.on_commit.take() {
      hook(tag);
    }
  }

  /// Releases the arbitration lock leaving the offer untaken.
  pub(crate) fn withdraw(self) {}
}

/// An offer attached to one concrete pending entry.
///
/// The tag is the entry's position in its selection's request list; it is
/// what the commit hook receives so the driver knows which candidate won.
#[derive(Clone)]
pub(crate) struct OfferHandle {
  offer: Arc<Offer>,
  tag: usize,
}

impl OfferHandle {
  pub(crate) fn new(offer: Arc<Offer>, tag: usize) -> Self {
    Self { offer, tag }
  }

  pub(crate) fn offer(&self) -> &Offer {
    &self.offer
  }

  pub(crate) fn tag(&self) -> usize {
    self.tag
  }
}

/// Outcome of probing the (up to) two offers involved in one pairing.
pub(crate) enum PairProbe<'a> {
  /// Both sides are free; the pairing may proceed. Guards are in the
  /// same order as the arguments.
  Cleared { first: Option<OfferGuard<'a>>, second: Option<OfferGuard<'a>> },
  /// The first side's offer is already taken; its entry is stale.
  FirstTaken,
  /// The second side's offer is already taken.
  SecondTaken,
  /// Both sides belong to the same choosing agent, which can never
  /// rendezvous with itself.
  SameAgent,
}

/// Probes the offers of the two sides of a candidate pairing, honouring
/// the global id order when both are present.
pub(crate) fn probe_pair<'a>(
  first: Option<&'a Offer>,
  second: Option<&'a Offer>,
) -> PairProbe<'a> {
  match (first, second) {
    (None, None) => PairProbe::Cleared { first: None, second: None },
    (Some(f), None) => match f.probe() {
      Some(guard) => PairProbe::Cleared { first: Some(guard), second: None },
      None => PairProbe::FirstTaken,
    },
    (None, Some(s)) => match s.probe() {
      Some(guard) => PairProbe::Cleared { first: None, second: Some(guard) },
      None => PairProbe::SecondTaken,
    },
    (Some(f), Some(s)) => {
      if f.id == s.id {
        return PairProbe::SameAgent;
      }
      if f.id < s.id {
        let Some(fg) = f.probe() else { return PairProbe::FirstTaken };
        match s.probe() {
          Some(sg) => {
            PairProbe::Cleared { first: Some(fg), second: Some(sg) }
          }
          None => {
            fg.withdraw();
            PairProbe::SecondTaken
          }
        }
      } else {
        let Some(sg) = s.probe() else { return PairProbe::SecondTaken };
        match f.probe() {
          Some(fg) => {
            PairProbe::Cleared { first: Some(fg), second: Some(sg) }
          }
          None => {
            sg.withdraw();
            PairProbe::FirstTaken
          }
        }
      }
    }
  }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
