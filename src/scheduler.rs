/// Scheduler Module
///
/// Decides how long to wait before the next post: a random gap inside the
/// active-hours range, or, during quiet hours, a random point inside the next
/// wake window. Pure computation over the local wall clock and configuration.

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, Timelike};
use rand::Rng;
use std::time::Duration;

/// Source of local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    /// Quiet window `[quiet_start_hour, quiet_end_hour)`; wraps midnight when start > end
    pub quiet_start_hour: u32,
    pub quiet_end_hour: u32,
    /// Wake window `[wake_start_hour, wake_end_hour)`
    pub wake_start_hour: u32,
    pub wake_end_hour: u32,
    pub active_min_hours: f64,
    pub active_max_hours: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            quiet_start_hour: 23,
            quiet_end_hour: 8,
            wake_start_hour: 8,
            wake_end_hour: 10,
            active_min_hours: 2.0,
            active_max_hours: 6.0,
        }
    }
}

impl ScheduleConfig {
    pub fn is_quiet_hour(&self, hour: u32) -> bool {
        let (start, end) = (self.quiet_start_hour, self.quiet_end_hour);
        if start == end {
            false
        } else if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleDecision {
    pub delay: Duration,
    pub next_action_at: NaiveDateTime,
    /// The decision deferred to the wake window
    pub quiet_hours: bool,
}

impl ScheduleDecision {
    pub fn delay_secs(&self) -> u64 {
        self.delay.as_secs()
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    config: ScheduleConfig,
}

fn hours_to_secs(hours: f64) -> i64 {
    (hours * 3600.0).round() as i64
}

impl Scheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn in_quiet_hours(&self, now: NaiveDateTime) -> bool {
        self.config.is_quiet_hour(now.hour())
    }

    pub fn next_delay<R: Rng + ?Sized>(&self, now: NaiveDateTime, rng: &mut R) -> ScheduleDecision {
        if self.in_quiet_hours(now) {
            return self.until_wake_window(now, rng);
        }

        let min = hours_to_secs(self.config.active_min_hours).max(0);
        let max = hours_to_secs(self.config.active_max_hours).max(min);
        let secs = rng.gen_range(min..=max);

        ScheduleDecision {
            delay: Duration::from_secs(secs as u64),
            next_action_at: now + ChronoDuration::seconds(secs),
            quiet_hours: false,
        }
    }

    /// Random instant in the first wake window that starts after `now`:
    /// tomorrow when called late at night, today in the early morning.
    fn until_wake_window<R: Rng + ?Sized>(&self, now: NaiveDateTime, rng: &mut R) -> ScheduleDecision {
        let wake_start = NaiveTime::from_hms_opt(self.config.wake_start_hour, 0, 0)
            .unwrap_or(NaiveTime::MIN);
        let mut window_start = now.date().and_time(wake_start);
        if window_start <= now {
            window_start += ChronoDuration::days(1);
        }

        let window_secs = i64::from(self.config.wake_end_hour.saturating_sub(self.config.wake_start_hour)) * 3600;
        let offset = if window_secs > 0 {
            rng.gen_range(0..window_secs)
        } else {
            0
        };
        let next_action_at = window_start + ChronoDuration::seconds(offset);
        let delay_secs = (next_action_at - now).num_seconds().max(0) as u64;

        ScheduleDecision {
            delay: Duration::from_secs(delay_secs),
            next_action_at,
            quiet_hours: true,
        }
    }
}
