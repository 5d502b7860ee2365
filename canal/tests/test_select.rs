use std::thread;
use std::time::Duration;

use canal::test_utils::runtime;
use canal::{
  Channel, ChannelError, Deadline, Priority, SelectOutcome, SelectRequest,
  select,
};

#[test]
fn first_priority_prefers_the_earlier_ready_candidate() {
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
  assert!(a.is_empty());
  assert!(b.is_empty());
  assert_eq!(b.pending_readers(), 0, "channel b is left untouched");
}

#[test]
fn concurrent_writers_commit_exactly_one() {
  for _ in 0..50 {
    let rt = runtime();
    let a = Channel::<u32>::rendezvous(&rt);
    let b = Channel::<u32>::rendezvous(&rt);

    let choice = select(
      vec![SelectRequest::Read(a.clone()), SelectRequest::Read(b.clone())],
      Deadline::Infinite,
      Priority::First,
    )
    .unwrap();

    let wa = {
      let a = a.clone();
      thread::spawn(move || a.write_async(10))
    };
    let wb = {
      let b = b.clone();
      thread::spawn(move || b.write_async(20))
    };
    let wa = wa.join().unwrap();
    let wb = wb.join().unwrap();

    let sel = choice.blocking().unwrap();
    // Give the loser-eviction sweep time to land before inspecting.
    thread::sleep(Duration::from_millis(20));

    match sel.index {
      0 => {
        assert_eq!(sel.outcome, SelectOutcome::Received(10));
        assert_eq!(wa.blocking(), Ok(()));
        assert!(!wb.is_done(), "the losing write must stay queued");
        assert_eq!(b.pending_writers(), 1);
        assert_eq!(b.read(), Ok(20));
        assert_eq!(wb.blocking(), Ok(()));
      }
      1 => {
        assert_eq!(sel.outcome, SelectOutcome::Received(20));
        assert_eq!(wb.blocking(), Ok(()));
        assert!(!wa.is_done(), "the losing write must stay queued");
        assert_eq!(a.pending_writers(), 1);
        assert_eq!(a.read(), Ok(10));
        assert_eq!(wa.blocking(), Ok(()));
      }
      other => panic!("impossible winner index {other}"),
    }
  }
}

#[test]
fn competing_selections_split_the_available_values() {
  for _ in 0..25 {
    let rt = runtime();
    let a = Channel::<u32>::rendezvous(&rt);
    let b = Channel::<u32>::rendezvous(&rt);

    let mk_choice = || {
      select(
        vec![SelectRequest::Read(a.clone()), SelectRequest::Read(b.clone())],
        Deadline::Infinite,
        Priority::First,
      )
      .unwrap()
    };
    let first = mk_choice();
    let second = mk_choice();

    a.write(1).unwrap();
    b.write(2).unwrap();

    let mut got = vec![
      first.blocking().unwrap().outcome,
      second.blocking().unwrap().outcome,
    ];
    got.sort_by_key(|o| match o {
      SelectOutcome::Received(v) => *v,
      SelectOutcome::Sent => u32::MAX,
    });
    assert_eq!(
      got,
      vec![SelectOutcome::Received(1), SelectOutcome::Received(2)],
      "each selection takes exactly one distinct value",
    );
  }
}

#[test]
fn mixed_read_and_write_candidates() {
  let rt = runtime();
  let input = Channel::<u32>::rendezvous(&rt);
  let output = Channel::<u32>::bounded(&rt, 1);

  let sel = select(
    vec![
      SelectRequest::Read(input.clone()),
      SelectRequest::Write(output.clone(), 33),
    ],
    Deadline::Infinite,
    Priority::First,
  )
  .unwrap()
  .blocking()
  .unwrap();

  // Nothing is readable on `input`, so the buffered write wins.
  assert_eq!(sel.index, 1);
  assert_eq!(sel.outcome, SelectOutcome::Sent);
  assert_eq!(output.read(), Ok(33));

  thread::sleep(Duration::from_millis(20));
  assert_eq!(input.pending_readers(), 0);
}

#[test]
fn selection_deadline_fails_everything_once() {
  let rt = runtime();
  let a = Channel::<u32>::rendezvous(&rt);
  let b = Channel::<u32>::rendezvous(&rt);

  let res = select(
    vec![SelectRequest::Read(a.clone()), SelectRequest::Read(b.clone())],
    Deadline::after(Duration::from_millis(60)),
    Priority::First,
  )
  .unwrap()
  .blocking();

  assert_eq!(res.unwrap_err(), ChannelError::Timeout);

  thread::sleep(Duration::from_millis(40));
  assert_eq!(a.pending_readers(), 0);
  assert_eq!(b.pending_readers(), 0);

  // The channels themselves are unharmed.
  let w = a.write_async(1);
  assert_eq!(a.read(), Ok(1));
  assert_eq!(w.blocking(), Ok(()));
}

#[test]
fn immediate_selection_polls_every_candidate() {
  let rt = runtime();
  let a = Channel::<u32>::rendezvous(&rt);
  let b = Channel::<u32>::bounded(&rt, 1);
  b.write(5).unwrap();

  // `a` is not ready, but polling must still reach `b`.
  let sel = select(
    vec![SelectRequest::Read(a.clone()), SelectRequest::Read(b.clone())],
    Deadline::Immediate,
    Priority::First,
  )
  .unwrap()
  .blocking()
  .unwrap();
  assert_eq!(sel.index, 1);
  assert_eq!(sel.outcome, SelectOutcome::Received(5));

  // With nothing ready anywhere the poll reports a timeout and leaves
  // no entries behind.
  let res = select(
    vec![SelectRequest::Read(a.clone()), SelectRequest::Read(b.clone())],
    Deadline::Immediate,
    Priority::First,
  )
  .unwrap()
  .blocking();
  assert_eq!(res.unwrap_err(), ChannelError::Timeout);
  assert_eq!(a.pending_readers(), 0);
  assert_eq!(b.pending_readers(), 0);
}

#[test]
fn all_candidates_retired_means_retired() {
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
fn one_live_candidate_among_retired_ones_still_wins() {
  let rt = runtime();
  let dead = Channel::<u32>::rendezvous(&rt);
  let live = Channel::<u32>::bounded(&rt, 1);
  dead.retire(true).blocking().unwrap();
  live.write(4).unwrap();

  let sel = select(
    vec![SelectRequest::Read(dead), SelectRequest::Read(live)],
    Deadline::Infinite,
    Priority::First,
  )
  .unwrap()
  .blocking()
  .unwrap();

  assert_eq!(sel.index, 1);
  assert_eq!(sel.outcome, SelectOutcome::Received(4));
}

#[test]
fn losing_candidates_never_surface_to_the_caller() {
  // A selection resolves with the winner only; the canceled siblings are
  // internal. Run it a few times to shake interleavings out.
  for _ in 0..20 {
    let rt = runtime();
    let a = Channel::<u32>::bounded(&rt, 1);
    let b = Channel::<u32>::bounded(&rt, 1);
    a.write(1).unwrap();
    b.write(2).unwrap();

    let sel = select(
      vec![SelectRequest::Read(a.clone()), SelectRequest::Read(b.clone())],
      Deadline::Infinite,
      Priority::Random,
    )
    .unwrap()
    .blocking()
    .unwrap();

    match sel.index {
      0 => assert_eq!(sel.outcome, SelectOutcome::Received(1)),
      1 => assert_eq!(sel.outcome, SelectOutcome::Received(2)),
      other => panic!("impossible winner index {other}"),
    }
    // Exactly one value was taken.
    assert_eq!(a.len() + b.len(), 1);
  }
}
