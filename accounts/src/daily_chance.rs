use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// Source of wall-clock time for the daily chance timer
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a fixed instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DailyChanceState {
    Available,
    Claimed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DailyChanceMode {
    /// Use up today's chance and stamp the time
    Claim,
    /// Re-evaluate the flag against the elapsed time since the last stamp
    Reset,
    /// Set the flag directly without touching the stamp
    Force(bool),
}

/// Once-per-window claimable flag.
///
/// The cycle is `Available -> Claimed -> (window elapsed) -> Available`.
/// Only a claim moves `changed_at`; a reset only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyChance {
    pub available: bool,
    pub changed_at: DateTime<Utc>,
}

impl DailyChance {
    pub fn new(now: DateTime<Utc>) -> Self {
        DailyChance {
            available: true,
            changed_at: now,
        }
    }

    pub fn state(&self) -> DailyChanceState {
        if self.available {
            DailyChanceState::Available
        } else {
            DailyChanceState::Claimed
        }
    }

    /// Time at which a claimed chance becomes available again. The stamp is
    /// compared at minute precision, seconds are dropped.
    pub fn next_available_at(&self, window: Duration) -> DateTime<Utc> {
        let stamp = self
            .changed_at
            .duration_trunc(Duration::minutes(1))
            .unwrap_or(self.changed_at);
        stamp + window
    }

    pub fn apply(
        &mut self,
        mode: DailyChanceMode,
        now: DateTime<Utc>,
        window: Duration,
    ) -> DailyChanceState {
        match mode {
            DailyChanceMode::Claim => {
                self.available = false;
                self.changed_at = now;
            }
            DailyChanceMode::Reset => {
                self.available = self.next_available_at(window) <= now;
            }
            DailyChanceMode::Force(available) => {
                self.available = available;
            }
        }
        self.state()
    }
}
