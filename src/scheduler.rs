use std::time::{Duration, Instant};

/// Which timers elapsed on this loop iteration, in the order they must run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueTimers {
    pub periodic: bool,
    pub live: bool,
    pub telemetry: bool,
}

/// Three independent interval timers plus the no-data latch for the current
/// telemetry window. Driven by whatever `now` the loop passes in.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    poll_interval: Duration,
    periodic_interval: Duration,
    telemetry_interval: Duration,
    last_poll: Option<Instant>,
    last_periodic: Option<Instant>,
    last_telemetry: Instant,
    no_data: bool,
}

impl PollScheduler {
    /// Live and periodic fire on the first check; the first telemetry window
    /// opens at `start`.
    pub fn new(
        poll_interval: Duration,
        periodic_interval: Duration,
        telemetry_interval: Duration,
        start: Instant,
    ) -> Self {
        Self {
            poll_interval,
            periodic_interval,
            telemetry_interval,
            last_poll: None,
            last_periodic: None,
            last_telemetry: start,
            no_data: true,
        }
    }

    /// Marks and returns every timer with at least one full interval behind it.
    pub fn due(&mut self, now: Instant) -> DueTimers {
        let periodic = elapsed(self.last_periodic, now, self.periodic_interval);
        if periodic {
            self.last_periodic = Some(now);
        }
        let live = elapsed(self.last_poll, now, self.poll_interval);
        if live {
            self.last_poll = Some(now);
        }
        let telemetry = elapsed(Some(self.last_telemetry), now, self.telemetry_interval);
        if telemetry {
            self.last_telemetry = now;
        }
        DueTimers {
            periodic,
            live,
            telemetry,
        }
    }

    /// A live reading with real power data arrived in this window.
    pub fn record_live_data(&mut self) {
        self.no_data = false;
    }

    /// Ends the telemetry window. Returns `true` when the whole window passed
    /// without live data, then re-arms the latch for the next one.
    pub fn close_window(&mut self) -> bool {
        let alarm = self.no_data;
        self.no_data = true;
        alarm
    }

    pub fn no_data(&self) -> bool {
        self.no_data
    }

    pub fn secs_to_next_periodic(&self, now: Instant) -> u64 {
        remaining(self.last_periodic, now, self.periodic_interval)
    }

    pub fn secs_to_next_telemetry(&self, now: Instant) -> u64 {
        remaining(Some(self.last_telemetry), now, self.telemetry_interval)
    }
}

fn elapsed(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last {
        Some(last) => now.saturating_duration_since(last) >= interval,
        None => true,
    }
}

fn remaining(last: Option<Instant>, now: Instant, interval: Duration) -> u64 {
    match last {
        Some(last) => interval
            .saturating_sub(now.saturating_duration_since(last))
            .as_secs(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn scheduler(start: Instant) -> PollScheduler {
        PollScheduler::new(secs(20), secs(300), secs(600), start)
    }

    #[test]
    fn test_first_check_fires_live_and_periodic() {
        let start = Instant::now();
        let mut sched = scheduler(start);

        let due = sched.due(start);
        assert_eq!(
            due,
            DueTimers {
                periodic: true,
                live: true,
                telemetry: false
            }
        );

        // Nothing again until an interval has passed
        assert_eq!(sched.due(start + secs(1)), DueTimers::default());
    }

    #[test]
    fn test_timers_are_independent() {
        let start = Instant::now();
        let mut sched = scheduler(start);
        sched.due(start);

        let due = sched.due(start + secs(20));
        assert!(due.live);
        assert!(!due.periodic);
        assert!(!due.telemetry);

        let due = sched.due(start + secs(300));
        assert!(due.live);
        assert!(due.periodic);
        assert!(!due.telemetry);

        let due = sched.due(start + secs(600));
        assert!(due.live);
        assert!(due.periodic);
        assert!(due.telemetry);
    }

    #[test]
    fn test_fires_at_most_once_per_elapsed_interval() {
        let start = Instant::now();
        let mut sched = scheduler(start);
        sched.due(start);

        // A long stall only produces one firing, not a backlog
        assert!(sched.due(start + secs(95)).live);
        assert!(!sched.due(start + secs(96)).live);
        assert!(sched.due(start + secs(115)).live);
    }

    #[test]
    fn test_no_data_alarm_when_window_has_no_reading() {
        let start = Instant::now();
        let mut sched = scheduler(start);

        assert!(sched.no_data());
        assert!(sched.close_window());
        // Re-armed for the next window
        assert!(sched.no_data());
    }

    #[test]
    fn test_live_data_clears_alarm_for_one_window_only() {
        let start = Instant::now();
        let mut sched = scheduler(start);

        sched.record_live_data();
        assert!(!sched.no_data());
        assert!(!sched.close_window());

        assert!(sched.no_data());
        assert!(sched.close_window());
    }

    #[test]
    fn test_seconds_to_next() {
        let start = Instant::now();
        let mut sched = scheduler(start);

        assert_eq!(sched.secs_to_next_periodic(start), 0);
        assert_eq!(sched.secs_to_next_telemetry(start + secs(100)), 500);

        sched.due(start + secs(10));
        assert_eq!(sched.secs_to_next_periodic(start + secs(70)), 240);
        assert_eq!(sched.secs_to_next_periodic(start + secs(900)), 0);
    }
}
