// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Do-not-disturb window.
//!
//! A pure predicate over a scheduled wall-clock window (with overnight wrap)
//! and an ad-hoc override. Callers own the persistence of [`DndState`]; the
//! returned status says when an expired ad-hoc record should be cleared.

use chrono::{DateTime, Days, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use strum::Display;

use bob_core::BobError;

/// An ad-hoc "quiet until" override set from the CLI or a directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdhocDnd {
    /// Epoch milliseconds after which the override expires.
    pub until: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Persisted DND state (`data/dnd-state.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DndState {
    #[serde(default)]
    pub adhoc: Option<AdhocDnd>,
}

/// Why DND is currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DndReason {
    Adhoc,
    Scheduled,
}

/// Result of a DND check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DndStatus {
    pub active: bool,
    pub reason: Option<DndReason>,
    /// When the active window ends. `None` while inactive.
    pub ends_at: Option<i64>,
    /// The supplied ad-hoc record was expired and should be cleared.
    pub clear_adhoc: bool,
}

impl DndStatus {
    fn inactive(clear_adhoc: bool) -> Self {
        Self {
            active: false,
            reason: None,
            ends_at: None,
            clear_adhoc,
        }
    }
}

/// The scheduled window, minutes past local midnight. A start later than the
/// end wraps overnight.
#[derive(Debug, Clone)]
pub struct DndWindow {
    enabled: bool,
    start_minutes: u32,
    end_minutes: u32,
    tz: Tz,
}

impl DndWindow {
    /// Builds a window from "HH:MM" bounds in the given zone.
    pub fn new(enabled: bool, start: &str, end: &str, tz: Tz) -> Result<Self, BobError> {
        Ok(Self {
            enabled,
            start_minutes: parse_hhmm(start)?,
            end_minutes: parse_hhmm(end)?,
            tz,
        })
    }

    /// Evaluates DND at `now_ms` against an optional ad-hoc override.
    ///
    /// The ad-hoc override wins while unexpired. An expired override is
    /// reported back via `clear_adhoc` so the caller can drop the record.
    pub fn status(&self, adhoc: Option<&AdhocDnd>, now_ms: i64) -> DndStatus {
        let mut clear_adhoc = false;
        if let Some(adhoc) = adhoc {
            if adhoc.until > now_ms {
                return DndStatus {
                    active: true,
                    reason: Some(DndReason::Adhoc),
                    ends_at: Some(adhoc.until),
                    clear_adhoc: false,
                };
            }
            clear_adhoc = true;
        }

        if !self.enabled {
            return DndStatus::inactive(clear_adhoc);
        }

        let Some(local) = local_time(now_ms, &self.tz) else {
            return DndStatus::inactive(clear_adhoc);
        };
        let minute = local.hour() * 60 + local.minute();

        let in_window = if self.start_minutes <= self.end_minutes {
            minute >= self.start_minutes && minute < self.end_minutes
        } else {
            minute >= self.start_minutes || minute < self.end_minutes
        };

        if !in_window {
            return DndStatus::inactive(clear_adhoc);
        }

        DndStatus {
            active: true,
            reason: Some(DndReason::Scheduled),
            ends_at: self.next_window_end(now_ms),
            clear_adhoc,
        }
    }

    /// The next wall-clock occurrence of the window end strictly after `now_ms`.
    fn next_window_end(&self, now_ms: i64) -> Option<i64> {
        let local = local_time(now_ms, &self.tz)?;
        let hour = self.end_minutes / 60;
        let minute = self.end_minutes % 60;

        for day_offset in 0..2u64 {
            let date = local.date_naive().checked_add_days(Days::new(day_offset))?;
            let naive = date.and_hms_opt(hour, minute, 0)?;
            let candidate = match self.tz.from_local_datetime(&naive) {
                chrono::LocalResult::Single(t) => Some(t),
                chrono::LocalResult::Ambiguous(earlier, _) => Some(earlier),
                chrono::LocalResult::None => self
                    .tz
                    .from_local_datetime(&(naive + chrono::Duration::hours(1)))
                    .earliest(),
            }?;
            let ms = candidate.timestamp_millis();
            if ms > now_ms {
                return Some(ms);
            }
        }
        None
    }
}

fn parse_hhmm(s: &str) -> Result<u32, BobError> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| BobError::Config(format!("bad dnd time: {s}")))?;
    let hour: u32 = h
        .parse()
        .map_err(|_| BobError::Config(format!("bad dnd time: {s}")))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| BobError::Config(format!("bad dnd time: {s}")))?;
    if hour > 23 || minute > 59 {
        return Err(BobError::Config(format!("bad dnd time: {s}")));
    }
    Ok(hour * 60 + minute)
}

fn local_time(now_ms: i64, tz: &Tz) -> Option<DateTime<Tz>> {
    Some(DateTime::<Utc>::from_timestamp_millis(now_ms)?.with_timezone(tz))
}
