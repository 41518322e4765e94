//! Property-based tests for the event scheduler
//!
//! These tests check dispatch ordering and cancellation over arbitrary
//! schedules.

use manet_core::{EventScheduler, SimTime};
use proptest::prelude::*;
use std::time::Duration;

/// Delays in milliseconds, with plenty of collisions
fn arb_delays() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..50, 1..64)
}

proptest! {
    /// Property: events fire in (time, registration order)
    #[test]
    fn dispatch_is_time_then_fifo(delays in arb_delays()) {
        let mut sched: EventScheduler<Vec<(SimTime, usize)>> = EventScheduler::new();
        let mut fired = Vec::new();

        for (index, delay) in delays.iter().enumerate() {
            sched.schedule(Duration::from_millis(*delay), move |sched, fired: &mut Vec<(SimTime, usize)>| {
                fired.push((sched.now(), index));
            });
        }
        sched.run(&mut fired, SimTime::from_secs(1));

        let mut expected: Vec<(SimTime, usize)> = delays
            .iter()
            .enumerate()
            .map(|(index, delay)| (SimTime::from_millis(*delay), index))
            .collect();
        // Stable sort keeps registration order among equal times
        expected.sort_by_key(|(time, _)| *time);

        prop_assert_eq!(fired, expected);
    }

    /// Property: cancelled events never fire, all others do
    #[test]
    fn cancelled_events_never_fire(
        delays in arb_delays(),
        cancel_mask in prop::collection::vec(any::<bool>(), 64),
    ) {
        let mut sched: EventScheduler<Vec<usize>> = EventScheduler::new();
        let mut fired = Vec::new();

        let handles: Vec<_> = delays
            .iter()
            .enumerate()
            .map(|(index, delay)| {
                sched.schedule(Duration::from_millis(*delay), move |_, fired: &mut Vec<usize>| {
                    fired.push(index);
                })
            })
            .collect();

        let mut kept = Vec::new();
        for (index, handle) in handles.into_iter().enumerate() {
            if cancel_mask[index] {
                prop_assert!(sched.cancel(handle));
            } else {
                kept.push(index);
            }
        }
        sched.run(&mut fired, SimTime::from_secs(1));

        fired.sort_unstable();
        prop_assert_eq!(fired, kept);
    }

    /// Property: nothing scheduled after the stop time runs, and the clock ends at the stop time
    #[test]
    fn stop_time_is_inclusive(delays in arb_delays(), stop_ms in 0u64..50) {
        let mut sched: EventScheduler<usize> = EventScheduler::new();
        let mut count = 0usize;

        for delay in &delays {
            sched.schedule(Duration::from_millis(*delay), |_, count: &mut usize| *count += 1);
        }
        sched.run(&mut count, SimTime::from_millis(stop_ms));

        let expected = delays.iter().filter(|d| **d <= stop_ms).count();
        prop_assert_eq!(count, expected);
        prop_assert_eq!(sched.now(), SimTime::from_millis(stop_ms));
        prop_assert_eq!(sched.pending(), delays.len() - expected);
    }
}
