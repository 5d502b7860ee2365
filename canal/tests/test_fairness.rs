use canal::test_utils::runtime;
use canal::{Channel, ChannelSet, Deadline, SelectOutcome};

#[test]
fn fair_priority_keeps_ready_channels_balanced() {
  let rt = runtime();
  let a = Channel::<u32>::bounded(&rt, 1);
  let b = Channel::<u32>::bounded(&rt, 1);
  a.write(1).unwrap();
  b.write(2).unwrap();

  let set = ChannelSet::new(vec![a.clone(), b.clone()]).unwrap();
  let mut wins = [0u32; 2];

  // Both channels are ready on every round; fairness must not let the
  // enumeration order starve either of them.
  for _ in 0..1000 {
    let sel = set.read_any(Deadline::Infinite).blocking().unwrap();
    wins[sel.index] += 1;
    match sel.index {
      0 => a.write(1).unwrap(),
      _ => b.write(2).unwrap(),
    }
  }

  assert_eq!(wins[0] + wins[1], 1000);
  let diff = wins[0].abs_diff(wins[1]);
  assert!(diff <= 2, "fair selection skewed: {wins:?}");
}

#[test]
fn fair_priority_catches_a_channel_up_after_a_dry_spell() {
  let rt = runtime();
  let a = Channel::<u32>::bounded(&rt, 1);
  let b = Channel::<u32>::bounded(&rt, 1);
  let set = ChannelSet::new(vec![a.clone(), b.clone()]).unwrap();

  // Ten rounds where only `a` is ready.
  for _ in 0..10 {
    a.write(1).unwrap();
    let sel = set.read_any(Deadline::Infinite).blocking().unwrap();
    assert_eq!(sel.index, 0);
  }

  // As soon as both are ready, the neglected channel goes first.
  a.write(1).unwrap();
  b.write(2).unwrap();
  let sel = set.read_any(Deadline::Infinite).blocking().unwrap();
  assert_eq!(sel.index, 1, "the never-chosen channel is issued first");
  assert_eq!(sel.outcome, SelectOutcome::Received(2));
}

#[test]
fn write_any_spreads_across_hungry_channels() {
  let rt = runtime();
  let a = Channel::<u32>::bounded(&rt, 64);
  let b = Channel::<u32>::bounded(&rt, 64);
  let set = ChannelSet::new(vec![a.clone(), b.clone()]).unwrap();

  for i in 0..100u32 {
    set.write_any(i, Deadline::Infinite).blocking().unwrap();
  }

  // Both buffers have space throughout, so fairness alternates.
  assert_eq!(a.len() + b.len(), 100);
  let diff = (a.len() as i64 - b.len() as i64).unsigned_abs();
  assert!(diff <= 2, "unbalanced spread: {} vs {}", a.len(), b.len());
}
