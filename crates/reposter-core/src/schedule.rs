use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// How a group decides that it is due for a repost.
///
/// Only one mode is active at a time; the parameters of the other mode stay
/// on the group untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Repost every `frequency_minutes` after the last successful repost.
    #[default]
    Frequency,
    /// Repost at fixed wall-clock times of day.
    Timepoints,
}

impl ScheduleMode {
    /// Lenient parse used for stored values: anything unknown or empty is
    /// treated as [`ScheduleMode::Frequency`].
    pub fn from_stored(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| {
            if !s.is_empty() {
                tracing::warn!(mode = %s, "unknown schedule mode, using frequency");
            }
            ScheduleMode::Frequency
        })
    }
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleMode::Frequency => "frequency",
            ScheduleMode::Timepoints => "timepoints",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduleMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "frequency" => Ok(ScheduleMode::Frequency),
            "timepoints" => Ok(ScheduleMode::Timepoints),
            other => Err(format!("unknown schedule mode: {other}")),
        }
    }
}

/// A wall-clock time of day, minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimePoint {
    pub hour: u8,
    pub minute: u8,
}

impl TimePoint {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 {
            return Err(CoreError::InvalidSchedule(format!(
                "hour must be 0-23, got {hour}"
            )));
        }
        if minute > 59 {
            return Err(CoreError::InvalidSchedule(format!(
                "minute must be 0-59, got {minute}"
            )));
        }
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl std::str::FromStr for TimePoint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidSchedule(format!("expected HH:MM, got {s:?}")))?;
        let hour: u8 = h
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidSchedule(format!("bad hour in {s:?}")))?;
        let minute: u8 = m
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidSchedule(format!("bad minute in {s:?}")))?;
        TimePoint::new(hour, minute)
    }
}

/// Parse one `HH:MM` per line. Blank lines are skipped, duplicates dropped
/// (first occurrence wins) and at least one point is required.
pub fn parse_time_points(text: &str) -> Result<Vec<TimePoint>> {
    let mut seen = HashSet::new();
    let mut points = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let point: TimePoint = line.parse().map_err(|e: CoreError| {
            CoreError::InvalidSchedule(format!("line {}: {e}", idx + 1))
        })?;
        if seen.insert(point) {
            points.push(point);
        }
    }
    if points.is_empty() {
        return Err(CoreError::InvalidSchedule(
            "at least one time point is required".to_string(),
        ));
    }
    Ok(points)
}
