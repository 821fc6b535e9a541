//! Trading-hours window.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::BotError;

/// Wall-clock time of day at minute resolution, written as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, BotError> {
        if hour > 23 || minute > 59 {
            return Err(BotError::ConfigValidation(format!(
                "invalid time of day {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn minutes_of_day(&self) -> u32 {
        u32::from(self.hour) * 60 + u32::from(self.minute)
    }
}

impl FromStr for ClockTime {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || BotError::ConfigValidation(format!("expected HH:MM, got '{s}'"));
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        let hour = h.parse::<u8>().map_err(|_| bad())?;
        let minute = m.parse::<u8>().map_err(|_| bad())?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = BotError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ClockTime> for String {
    fn from(t: ClockTime) -> Self {
        t.to_string()
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_start")]
    pub start: ClockTime,
    #[serde(default = "default_end")]
    pub end: ClockTime,
    /// Restrict trading to these weekdays. Empty means every day.
    #[serde(default)]
    pub active_days: Vec<Weekday>,
    /// Offset of the schedule's local time from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Stop the run after this long (0 disables).
    #[serde(default)]
    pub max_runtime_minutes: u64,
}

fn default_start() -> ClockTime {
    ClockTime { hour: 0, minute: 0 }
}

fn default_end() -> ClockTime {
    ClockTime { hour: 23, minute: 59 }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start: default_start(),
            end: default_end(),
            active_days: Vec::new(),
            utc_offset_minutes: 0,
            max_runtime_minutes: 0,
        }
    }
}

impl ScheduleSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(BotError::ConfigValidation(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }

    /// Whether `now` falls inside the trading window. Both ends are
    /// inclusive; a window whose end precedes its start wraps past
    /// midnight.
    pub fn is_within(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let local = now + Duration::minutes(i64::from(self.utc_offset_minutes));
        if !self.active_days.is_empty() && !self.active_days.contains(&local.weekday()) {
            return false;
        }
        let t = local.hour() * 60 + local.minute();
        let start = self.start.minutes_of_day();
        let end = self.end.minutes_of_day();
        if start <= end {
            t >= start && t <= end
        } else {
            t >= start || t <= end
        }
    }

    pub fn max_runtime(&self) -> Option<std::time::Duration> {
        (self.max_runtime_minutes > 0)
            .then(|| std::time::Duration::from_secs(self.max_runtime_minutes * 60))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
