use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::SessionSettings;

//
// ─── PHASES & EVENTS ───────────────────────────────────────────────────────────
//

/// Countdown phases, ordered by severity. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Running,
    /// Remaining time dropped to the first threshold (15 minutes by default).
    FirstWarning,
    /// Remaining time dropped to the final threshold (5 minutes by default).
    FinalWarning,
    /// Terminal.
    Expired,
}

/// Emitted once per phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    FirstWarning { remaining: Duration },
    FinalWarning { remaining: Duration },
    Expired,
}

impl TimerEvent {
    #[must_use]
    pub fn phase(&self) -> TimerPhase {
        match self {
            Self::FirstWarning { .. } => TimerPhase::FirstWarning,
            Self::FinalWarning { .. } => TimerPhase::FinalWarning,
            Self::Expired => TimerPhase::Expired,
        }
    }
}

//
// ─── TIMER ─────────────────────────────────────────────────────────────────────
//

/// Edge-triggered countdown against a fixed deadline.
///
/// Remaining time is always recomputed from `ends_at`, so a late or skipped poll
/// never accumulates drift. When a single poll crosses several thresholds (for
/// example after the process was suspended) only the most severe phase is reported.
///
/// ```
/// # use chrono::Duration;
/// # use exam_core::time::fixed_now;
/// # use exam_core::timer::{CountdownTimer, TimerEvent};
/// let start = fixed_now();
/// let mut timer = CountdownTimer::new(start + Duration::seconds(5), Duration::minutes(15), Duration::minutes(5));
/// let expirations = (0..=10)
///     .filter_map(|s| timer.poll(start + Duration::seconds(s)))
///     .filter(|e| *e == TimerEvent::Expired)
///     .count();
/// assert_eq!(expirations, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownTimer {
    ends_at: DateTime<Utc>,
    first_warning: Duration,
    final_warning: Duration,
    phase: TimerPhase,
}

impl CountdownTimer {
    #[must_use]
    pub fn new(ends_at: DateTime<Utc>, first_warning: Duration, final_warning: Duration) -> Self {
        Self {
            ends_at,
            first_warning,
            final_warning,
            phase: TimerPhase::Running,
        }
    }

    #[must_use]
    pub fn from_settings(ends_at: DateTime<Utc>, settings: &SessionSettings) -> Self {
        Self::new(ends_at, settings.first_warning(), settings.final_warning())
    }

    #[must_use]
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.ends_at
    }

    #[must_use]
    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.phase == TimerPhase::Expired
    }

    /// Time left before `ends_at`, never negative.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.ends_at - now).max(Duration::zero())
    }

    fn phase_for(&self, remaining: Duration) -> TimerPhase {
        if remaining <= Duration::zero() {
            TimerPhase::Expired
        } else if remaining <= self.final_warning {
            TimerPhase::FinalWarning
        } else if remaining <= self.first_warning {
            TimerPhase::FirstWarning
        } else {
            TimerPhase::Running
        }
    }

    /// Sample the clock. Returns an event only when the phase changes.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<TimerEvent> {
        let remaining = self.remaining(now);
        let target = self.phase_for(remaining);
        if target <= self.phase {
            return None;
        }
        self.phase = target;

        match target {
            TimerPhase::Running => None,
            TimerPhase::FirstWarning => Some(TimerEvent::FirstWarning { remaining }),
            TimerPhase::FinalWarning => Some(TimerEvent::FinalWarning { remaining }),
            TimerPhase::Expired => Some(TimerEvent::Expired),
        }
    }

    #[must_use]
    pub fn format_remaining(&self, now: DateTime<Utc>) -> String {
        format_countdown(self.remaining(now))
    }
}

/// Render a duration as `MM:SS`, or `H:MM:SS` from one hour up. Negative input renders as zero.
#[must_use]
pub fn format_countdown(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn timer_ending_in(secs: i64) -> CountdownTimer {
        CountdownTimer::new(
            fixed_now() + Duration::seconds(secs),
            Duration::minutes(15),
            Duration::minutes(5),
        )
    }

    #[test]
    fn warnings_fire_once_per_band() {
        let mut timer = timer_ending_in(20 * 60);
        let start = fixed_now();
        let mut events = Vec::new();
        for s in 0..=(20 * 60 + 30) {
            if let Some(event) = timer.poll(start + Duration::seconds(s)) {
                events.push((s, event.phase()));
            }
        }

        assert_eq!(
            events,
            vec![
                (5 * 60, TimerPhase::FirstWarning),
                (15 * 60, TimerPhase::FinalWarning),
                (20 * 60, TimerPhase::Expired),
            ]
        );
    }

    #[test]
    fn expires_exactly_once_after_deadline() {
        let mut timer = timer_ending_in(5);
        let start = fixed_now();
        let expired = (0..=6)
            .chain(7..100)
            .filter_map(|s| timer.poll(start + Duration::seconds(s)))
            .filter(|e| *e == TimerEvent::Expired)
            .count();

        assert_eq!(expired, 1);
        assert!(timer.is_expired());
    }

    #[test]
    fn skipped_polls_jump_straight_to_expired() {
        let mut timer = timer_ending_in(20 * 60);
        assert_eq!(timer.poll(fixed_now()), None);
        assert_eq!(timer.poll(fixed_now() + Duration::hours(2)), Some(TimerEvent::Expired));
        assert_eq!(timer.poll(fixed_now() + Duration::hours(3)), None);
    }

    #[test]
    fn clock_going_backwards_never_reverts_phase() {
        let mut timer = timer_ending_in(10 * 60);
        assert!(matches!(
            timer.poll(fixed_now()),
            Some(TimerEvent::FirstWarning { .. })
        ));
        assert_eq!(timer.poll(fixed_now() - Duration::hours(1)), None);
        assert_eq!(timer.phase(), TimerPhase::FirstWarning);
    }

    #[test]
    fn remaining_saturates_and_formats() {
        let timer = timer_ending_in(3725);
        assert_eq!(timer.format_remaining(fixed_now()), "1:02:05");
        assert_eq!(timer.format_remaining(fixed_now() + Duration::seconds(3725 - 65)), "01:05");
        assert_eq!(timer.remaining(fixed_now() + Duration::hours(5)), Duration::zero());
        assert_eq!(timer.format_remaining(fixed_now() + Duration::hours(5)), "00:00");
    }
}
