//! Discrete-event scheduler
//!
//! Single-threaded virtual-time executor. Events are kept in a `BTreeMap`
//! keyed by `(fire time, insertion sequence)`, so popping the first entry
//! always yields the earliest event and equal-time events come out in the
//! order they were registered.
//!
//! Callbacks receive the scheduler itself and a mutable world value `W`.
//! That is how traffic sources re-schedule their next packet and how the
//! sampler reads sink counters without any shared mutable state.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::clock::{SimTime, VirtualClock};
use crate::errors::SchedulerError;

/// One-shot event callback
pub type Callback<W> = Box<dyn FnOnce(&mut EventScheduler<W>, &mut W)>;

/// Body of a repeating timer
pub type RepeatingTask<W> = Box<dyn FnMut(&mut EventScheduler<W>, &mut W)>;

// ----------------------------------------------------------------------------
// Keys and handles
// ----------------------------------------------------------------------------

/// Queue ordering key. Sequence breaks ties between equal fire times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct EventKey {
    time: SimTime,
    sequence: u64,
}

/// Handle returned by `schedule`, used to cancel a pending event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    key: EventKey,
}

impl EventHandle {
    /// Time at which the event is due
    pub fn fire_time(&self) -> SimTime {
        self.key.time
    }
}

/// Identifier of a repeating timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// How a call to `run` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No events left before the stop time
    Drained,
    /// The next event lies beyond the stop time
    ReachedStopTime,
    /// A callback called `stop()`
    Halted,
}

/// Counters describing scheduler activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub events_scheduled: u64,
    pub events_dispatched: u64,
    pub events_cancelled: u64,
    pub peak_pending: usize,
}

// ----------------------------------------------------------------------------
// Scheduler
// ----------------------------------------------------------------------------

/// Priority queue of timed callbacks over a virtual clock
pub struct EventScheduler<W: 'static> {
    clock: VirtualClock,
    queue: BTreeMap<EventKey, Callback<W>>,
    next_sequence: u64,
    next_timer: u64,
    timers: HashMap<TimerId, EventKey>,
    halted: bool,
    stats: SchedulerStats,
}

impl<W: 'static> Default for EventScheduler<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: 'static> EventScheduler<W> {
    pub fn new() -> Self {
        Self {
            clock: VirtualClock::new(),
            queue: BTreeMap::new(),
            next_sequence: 0,
            next_timer: 0,
            timers: HashMap::new(),
            halted: false,
            stats: SchedulerStats::default(),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    /// Number of live (scheduled, not yet fired, not cancelled) events
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Schedule `callback` to fire `delay` after the current time
    pub fn schedule<F>(&mut self, delay: Duration, callback: F) -> EventHandle
    where
        F: FnOnce(&mut EventScheduler<W>, &mut W) + 'static,
    {
        let time = self.now() + delay;
        self.insert(time, Box::new(callback))
    }

    /// Schedule with a delay in fractional seconds
    pub fn schedule_secs<F>(
        &mut self,
        delay_secs: f64,
        callback: F,
    ) -> Result<EventHandle, SchedulerError>
    where
        F: FnOnce(&mut EventScheduler<W>, &mut W) + 'static,
    {
        let delay = Duration::try_from_secs_f64(delay_secs)
            .map_err(|_| SchedulerError::InvalidDelay { delay_secs })?;
        Ok(self.schedule(delay, callback))
    }

    /// Schedule at an absolute time, which must not lie in the past
    pub fn schedule_at<F>(&mut self, time: SimTime, callback: F) -> Result<EventHandle, SchedulerError>
    where
        F: FnOnce(&mut EventScheduler<W>, &mut W) + 'static,
    {
        let now = self.now();
        if time < now {
            return Err(SchedulerError::InvalidDelay {
                delay_secs: time.as_secs_f64() - now.as_secs_f64(),
            });
        }
        Ok(self.insert(time, Box::new(callback)))
    }

    /// Cancel a pending event. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        let removed = self.queue.remove(&handle.key).is_some();
        if removed {
            self.stats.events_cancelled += 1;
        }
        removed
    }

    /// Run `task` every `period`, first firing one period from now.
    ///
    /// The timer re-arms itself after each firing until `cancel_timer` is
    /// called or the run ends.
    pub fn schedule_repeating<F>(&mut self, period: Duration, task: F) -> Result<TimerId, SchedulerError>
    where
        F: FnMut(&mut EventScheduler<W>, &mut W) + 'static,
    {
        if period.is_zero() {
            return Err(SchedulerError::InvalidPeriod { period_secs: 0.0 });
        }
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.arm(id, period, Box::new(task));
        debug!("[SCHEDULER] Repeating timer {:?} armed every {:?}", id, period);
        Ok(id)
    }

    /// Stop a repeating timer. Safe to call from inside the timer's own task.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        match self.timers.remove(&id) {
            Some(key) => {
                if self.queue.remove(&key).is_some() {
                    self.stats.events_cancelled += 1;
                }
                true
            }
            None => false,
        }
    }

    pub fn is_timer_active(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    /// Halt `run` once the current callback returns
    pub fn stop(&mut self) {
        self.halted = true;
    }

    /// Dispatch events in time order until the queue drains, the next event
    /// lies after `stop_time`, or a callback calls `stop()`.
    ///
    /// Events due exactly at `stop_time` still fire. Unless halted, the clock
    /// reads `stop_time` on return.
    pub fn run(&mut self, world: &mut W, stop_time: SimTime) -> RunOutcome {
        self.halted = false;
        debug!(
            "[SCHEDULER] Running from {} until {} with {} pending events",
            self.now(),
            stop_time,
            self.queue.len()
        );

        let outcome = loop {
            if self.halted {
                break RunOutcome::Halted;
            }

            let Some((&key, _)) = self.queue.first_key_value() else {
                break RunOutcome::Drained;
            };
            if key.time > stop_time {
                break RunOutcome::ReachedStopTime;
            }

            let Some((key, callback)) = self.queue.pop_first() else {
                break RunOutcome::Drained;
            };
            self.clock.advance_to(key.time);
            self.stats.events_dispatched += 1;
            trace!("[SCHEDULER] Dispatching event #{} at {}", key.sequence, key.time);
            callback(self, world);
        };

        if outcome != RunOutcome::Halted && stop_time > self.now() {
            self.clock.advance_to(stop_time);
        }

        debug!(
            "[SCHEDULER] Run ended at {} ({:?}), {} events dispatched",
            self.now(),
            outcome,
            self.stats.events_dispatched
        );
        outcome
    }

    fn insert(&mut self, time: SimTime, callback: Callback<W>) -> EventHandle {
        let key = EventKey {
            time,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.queue.insert(key, callback);
        self.stats.events_scheduled += 1;
        self.stats.peak_pending = self.stats.peak_pending.max(self.queue.len());
        EventHandle { key }
    }

    fn arm(&mut self, id: TimerId, period: Duration, task: RepeatingTask<W>) {
        let handle = self.schedule(
            period,
            move |sched: &mut EventScheduler<W>, world: &mut W| {
                let mut task = task;
                task(sched, world);
                if sched.timers.contains_key(&id) {
                    sched.arm(id, period, task);
                }
            },
        );
        self.timers.insert(id, handle.key);
    }
}
