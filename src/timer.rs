// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::api::SctpTime;
use std::cmp::min;
use std::time::Duration;

// Caps the backoff exponent, to avoid overflow.
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Backoff {
    /// Fires once and stops.
    OneShot,
    /// Re-arms itself with a doubled duration until `max_restarts` have been made.
    Exponential { max_duration: Duration, max_restarts: u32 },
}

/// A deadline owned by whoever holds it.
///
/// Timers never call back into anything. The owner polls [`Timer::next_expiry`] to learn when it
/// needs to be woken up, and calls [`Timer::expire`] with the current time to learn whether the
/// timer fired. Dropping a timer (together with the association or path owning it) is all it
/// takes to cancel it.
#[derive(Clone, Debug)]
pub struct Timer {
    duration: Duration,
    backoff: Backoff,
    expirations: u32,
    deadline: Option<SctpTime>,
}

impl Timer {
    /// A timer that fires once per `start`.
    pub fn one_shot(duration: Duration) -> Self {
        Self { duration, backoff: Backoff::OneShot, expirations: 0, deadline: None }
    }

    /// A timer that re-arms itself after firing, doubling its duration (bounded by
    /// `max_duration`) every time, and stops after `max_restarts` restarts.
    pub fn with_backoff(duration: Duration, max_duration: Duration, max_restarts: u32) -> Self {
        Self {
            duration,
            backoff: Backoff::Exponential { max_duration, max_restarts },
            expirations: 0,
            deadline: None,
        }
    }

    fn current_duration(&self) -> Duration {
        match self.backoff {
            Backoff::OneShot => self.duration,
            Backoff::Exponential { max_duration, .. } => {
                let exponent = min(self.expirations, MAX_BACKOFF_EXPONENT);
                min(self.duration.saturating_mul(1 << exponent), max_duration)
            }
        }
    }

    /// Starts the timer, or restarts it if it's running. The expiration count is reset.
    pub fn start(&mut self, now: SctpTime) {
        self.expirations = 0;
        self.deadline = Some(now + self.current_duration());
    }

    /// Starts the timer with a new base duration.
    pub fn start_with(&mut self, now: SctpTime, duration: Duration) {
        self.duration = duration;
        self.start(now);
    }

    /// Starts the timer unless it's already running.
    pub fn ensure_started(&mut self, now: SctpTime) {
        if !self.is_running() {
            self.start(now);
        }
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn next_expiry(&self) -> Option<SctpTime> {
        self.deadline
    }

    /// Number of times the timer fired since it was last started.
    pub fn expirations(&self) -> u32 {
        self.expirations
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Changes the base duration. A running timer keeps its current deadline.
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    /// Returns true if the timer fired. This is not idempotent: a fired one-shot timer stops, and
    /// a backoff timer re-arms itself from its previous deadline (so that it doesn't drift), or
    /// stops if it has been restarted too many times. Callers check [`Timer::is_running`]
    /// afterwards to tell the two apart.
    pub fn expire(&mut self, now: SctpTime) -> bool {
        let Some(deadline) = self.deadline else {
            return false;
        };
        if deadline > now {
            return false;
        }

        self.expirations = self.expirations.saturating_add(1);
        self.deadline = match self.backoff {
            Backoff::OneShot => None,
            Backoff::Exponential { max_restarts, .. } => {
                (self.expirations <= max_restarts).then(|| deadline + self.current_duration())
            }
        };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START_TIME: SctpTime = SctpTime::zero();

    #[test]
    fn new_timer_is_not_running() {
        let t = Timer::one_shot(Duration::from_millis(1000));
        assert!(!t.is_running());
        assert_eq!(t.next_expiry(), None);
        assert_eq!(t.duration(), Duration::from_millis(1000));
    }

    #[test]
    fn stopped_timer_does_not_expire() {
        let mut t = Timer::one_shot(Duration::from_millis(1000));
        t.start(START_TIME);
        t.stop();
        assert!(!t.expire(START_TIME + Duration::from_secs(10)));
    }

    #[test]
    fn one_shot_fires_once() {
        let mut t = Timer::one_shot(Duration::from_millis(1000));
        t.start(START_TIME);
        assert!(!t.expire(START_TIME + Duration::from_millis(999)));
        assert!(t.expire(START_TIME + Duration::from_millis(1000)));
        assert!(!t.is_running());
        assert!(!t.expire(START_TIME + Duration::from_millis(5000)));
    }

    #[test]
    fn restart_moves_the_deadline() {
        let mut t = Timer::one_shot(Duration::from_millis(1000));
        t.start(START_TIME);
        t.start(START_TIME + Duration::from_millis(500));
        assert_eq!(t.next_expiry(), Some(START_TIME + Duration::from_millis(1500)));
        t.ensure_started(START_TIME + Duration::from_millis(900));
        assert_eq!(t.next_expiry(), Some(START_TIME + Duration::from_millis(1500)));
    }

    #[test]
    fn start_with_changes_duration() {
        let mut t = Timer::one_shot(Duration::from_millis(1000));
        t.start_with(START_TIME, Duration::from_millis(300));
        assert_eq!(t.next_expiry(), Some(START_TIME + Duration::from_millis(300)));
        assert_eq!(t.duration(), Duration::from_millis(300));
    }

    #[test]
    fn backoff_doubles_without_drift() {
        let mut t =
            Timer::with_backoff(Duration::from_millis(1000), Duration::from_secs(60), u32::MAX);
        t.start(START_TIME);
        assert!(t.expire(START_TIME + Duration::from_millis(1050)));
        assert_eq!(t.next_expiry(), Some(START_TIME + Duration::from_millis(3000)));
        assert!(t.expire(START_TIME + Duration::from_millis(3100)));
        assert_eq!(t.next_expiry(), Some(START_TIME + Duration::from_millis(7000)));
        assert_eq!(t.expirations(), 2);
    }

    #[test]
    fn backoff_is_capped() {
        let mut t =
            Timer::with_backoff(Duration::from_secs(3), Duration::from_secs(5), u32::MAX);
        t.start(START_TIME);
        assert!(t.expire(START_TIME + Duration::from_secs(3)));
        assert_eq!(t.next_expiry(), Some(START_TIME + Duration::from_secs(8)));
        assert!(t.expire(START_TIME + Duration::from_secs(8)));
        assert_eq!(t.next_expiry(), Some(START_TIME + Duration::from_secs(13)));
    }

    #[test]
    fn backoff_stops_when_exhausted() {
        let mut t = Timer::with_backoff(Duration::from_millis(100), Duration::from_secs(60), 2);
        t.start(START_TIME);
        assert!(t.expire(START_TIME + Duration::from_millis(100)));
        assert!(t.is_running());
        assert!(t.expire(START_TIME + Duration::from_millis(300)));
        assert!(t.is_running());
        assert!(t.expire(START_TIME + Duration::from_millis(700)));
        assert!(!t.is_running());
    }

    #[test]
    fn many_expirations_do_not_overflow() {
        let mut t =
            Timer::with_backoff(Duration::from_millis(1000), Duration::from_secs(600), u32::MAX);
        let mut now = START_TIME;
        t.start(now);
        for _ in 0..200 {
            now = now + Duration::from_secs(600);
            assert!(t.expire(now));
        }
        assert!(t.is_running());
    }
}
