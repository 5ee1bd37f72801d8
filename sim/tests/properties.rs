//! Property tests for event ordering and run determinism.

mod common;

use std::collections::BTreeSet;

use blink_sim::timeline::Timeline;
use blink_sim::RunOutcome;
use indexmap::IndexMap;
use proptest::prelude::*;

proptest! {
    #[test]
    fn events_pop_in_time_then_insertion_order(delays in prop::collection::vec(0u8..6, 1..40)) {
        let mut timeline = Timeline::new();
        for &delay in &delays {
            timeline.schedule("Ping", f64::from(delay), IndexMap::new()).unwrap();
        }

        let mut last: Option<(f64, u64)> = None;
        let mut popped = 0;
        while let Some(event) = timeline.pop_earliest() {
            prop_assert_eq!(event.time, timeline.now());
            if let Some((time, id)) = last {
                prop_assert!(event.time >= time);
                if event.time == time {
                    prop_assert!(event.id.0 > id);
                }
            }
            last = Some((event.time, event.id.0));
            popped += 1;
        }
        prop_assert_eq!(popped, delays.len());
    }

    #[test]
    fn cancelled_events_never_fire(
        delays in prop::collection::vec(0u8..10, 1..30),
        cancel_mask in prop::collection::vec(any::<bool>(), 30),
    ) {
        let mut timeline = Timeline::new();
        let ids: Vec<_> = delays
            .iter()
            .map(|&d| timeline.schedule("Ping", f64::from(d), IndexMap::new()).unwrap())
            .collect();

        let mut expected = BTreeSet::new();
        for (id, &cancel) in ids.iter().zip(&cancel_mask) {
            if cancel {
                prop_assert!(timeline.cancel(*id));
            } else {
                expected.insert(id.0);
            }
        }

        let mut fired = BTreeSet::new();
        while let Some(event) = timeline.pop_earliest() {
            fired.insert(event.id.0);
        }
        prop_assert_eq!(fired, expected);
    }

    #[test]
    fn recurring_event_fires_on_its_interval(interval in 1u8..5, fires in 1usize..20) {
        let interval = f64::from(interval);
        let mut timeline = Timeline::new();
        let id = timeline.schedule_recurring("Pulse", interval, IndexMap::new()).unwrap();
        for n in 1..=fires {
            let event = timeline.pop_earliest().unwrap();
            prop_assert_eq!(event.id, id);
            prop_assert_eq!(event.time, interval * n as f64);
        }
        prop_assert!(timeline.cancel(id));
        prop_assert!(timeline.pop_earliest().is_none());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn identical_seeds_give_identical_runs(seed in any::<u64>()) {
        let mut first = common::skirmish(seed);
        let mut second = common::skirmish(seed);
        let a = first.run_until_complete().unwrap();
        let b = second.run_until_complete().unwrap();

        prop_assert_eq!(a, b);
        prop_assert_eq!(a.outcome, RunOutcome::Completed);
        prop_assert_eq!(first.snapshot_json().unwrap(), second.snapshot_json().unwrap());
        prop_assert_eq!(first.tracker_output(), second.tracker_output());
    }

    #[test]
    fn tracker_times_never_go_backwards(seed in any::<u64>()) {
        let mut sim = common::skirmish(seed);
        sim.run_until_complete().unwrap();
        let times: Vec<f64> = sim.tracker_output().iter().map(|r| r.time).collect();
        prop_assert!(times.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(common::health(&sim, "orc") <= 0.0);
    }
}
