use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use proptest::prelude::*;
use tokio::sync::mpsc;

use conc::{FanIn, RemoveReason, Removed, SourceId};

// --- Fan-in membership under arbitrary interleavings ---

#[derive(Clone, Debug)]
enum Op {
    Add,
    Remove(usize),
    Close(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Add),
        1 => (0usize..16).prop_map(Op::Remove),
        1 => (0usize..16).prop_map(Op::Close),
    ]
}

struct Tracked {
    id: SourceId,
    tx: Option<mpsc::Sender<usize>>,
    removed: bool,
}

impl Tracked {
    fn live(&self) -> bool {
        self.tx.is_some() && !self.removed
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

async fn wait_for_count(fan_in: &FanIn<usize>, expected: usize) -> usize {
    let mut count = fan_in.count().await;
    for _ in 0..200 {
        if count == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
        count = fan_in.count().await;
    }
    count
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn count_tracks_open_unremoved_sources(ops in prop::collection::vec(arb_op(), 1..40)) {
        let (expected, count, delivered, live_values, events, tracked) = runtime().block_on(async {
            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let mut fan_in = FanIn::<usize>::builder()
                .on_removed(move |removed: Removed<usize>| {
                    let _ = events_tx.send((removed.id, removed.reason));
                })
                .start();
            let mut merged = fan_in.output().unwrap();

            let mut tracked: Vec<Tracked> = Vec::new();
            for op in &ops {
                match op {
                    Op::Add => {
                        let (tx, rx) = mpsc::channel(1);
                        let id = fan_in.add(rx).await.unwrap();
                        tracked.push(Tracked { id, tx: Some(tx), removed: false });
                    }
                    Op::Remove(i) if !tracked.is_empty() => {
                        let len = tracked.len();
                        let entry = &mut tracked[i % len];
                        entry.removed = true;
                        fan_in.remove(entry.id).await.unwrap();
                    }
                    Op::Close(i) if !tracked.is_empty() => {
                        let len = tracked.len();
                        tracked[i % len].tx = None;
                    }
                    _ => {}
                }
            }

            let expected = tracked.iter().filter(|t| t.live()).count();
            let count = wait_for_count(&fan_in, expected).await;

            // Every live source still forwards.
            let mut live_values = BTreeSet::new();
            for (index, entry) in tracked.iter().enumerate() {
                if entry.live() {
                    entry.tx.as_ref().unwrap().send(index).await.unwrap();
                    live_values.insert(index);
                }
            }
            let mut delivered = BTreeSet::new();
            for _ in 0..live_values.len() {
                match tokio::time::timeout(Duration::from_secs(1), merged.recv()).await {
                    Ok(Some(v)) => {
                        delivered.insert(v);
                    }
                    _ => break,
                }
            }

            fan_in.stop().await.unwrap();
            fan_in.closed().await;
            drop(fan_in);

            let mut events = Vec::new();
            while let Some(event) = events_rx.recv().await {
                events.push(event);
            }
            let tracked: Vec<(SourceId, bool, bool)> = tracked
                .iter()
                .map(|t| (t.id, t.tx.is_some(), t.removed))
                .collect();
            (expected, count, delivered, live_values, events, tracked)
        });

        prop_assert_eq!(count, expected);
        prop_assert_eq!(delivered, live_values);

        // One removal notice per added source, with a reason that matches its fate.
        let mut by_id: BTreeMap<SourceId, Vec<RemoveReason>> = BTreeMap::new();
        for (id, reason) in events {
            by_id.entry(id).or_default().push(reason);
        }
        prop_assert_eq!(by_id.len(), tracked.len());
        for (id, open, removed) in tracked {
            let reasons = &by_id[&id];
            prop_assert_eq!(reasons.len(), 1);
            match (open, removed) {
                (true, false) => {
                    prop_assert_eq!(reasons[0], RemoveReason::Shutdown);
                }
                (true, true) => {
                    prop_assert_eq!(reasons[0], RemoveReason::Removed);
                }
                (false, false) => {
                    prop_assert_eq!(reasons[0], RemoveReason::Closed);
                }
                (false, true) => {
                    // Closed and removed race; either notice is fine.
                    prop_assert!(reasons[0] != RemoveReason::Shutdown);
                }
            }
        }
    }
}
