// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human schedule strings and next-run computation.
//!
//! [`parse_schedule`] maps a phrase like `"every day at 9am"` or `"5m"` to a
//! `(kind, spec)` pair; [`next_run_of`] turns that pair plus an anchor
//! instant into the next run timestamp. Specs are stored as plain strings:
//! epoch milliseconds for `at`, duration milliseconds for `every`, and a
//! five-field cron expression for `cron`.

use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use bob_core::BobError;

/// How a job's spec is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    /// One-shot at an absolute instant. Terminal after a successful run.
    At,
    /// Repeats on a fixed interval from each run.
    Every,
    /// Repeats on a cron expression in the configured time zone.
    Cron,
}

/// Parses a human schedule string.
///
/// Recognized forms, tried in order:
/// 1. `cron <expr>` (five fields)
/// 2. `every <N>{s|m|h|d}`
/// 3. `<N>{s|m|h|d}`
/// 4. `in <N> (second|minute|hour|day|week)s?`
/// 5. `every (day|week|<weekday>|month) at <H>[:MM] [am|pm]`
/// 6. `tomorrow [at] <H>[:MM] [am|pm]`
/// 7. `today [at] <H>[:MM] [am|pm]` (rolled to tomorrow when past)
/// 8. `[at] <H>[:MM] (am|pm)` (rolled to tomorrow when past)
/// 9. an absolute date or datetime
///
/// Returns `None` when nothing matches.
pub fn parse_schedule(input: &str, now_ms: i64, tz: &Tz) -> Option<(ScheduleKind, String)> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();

    if let Some(rest) = lower.strip_prefix("cron ") {
        let expr = rest.trim();
        normalize_cron(expr)?;
        return Some((ScheduleKind::Cron, expr.to_string()));
    }

    if let Some(rest) = lower.strip_prefix("every ") {
        let rest = rest.trim();
        if let Some(ms) = parse_short_duration(rest) {
            return Some((ScheduleKind::Every, ms.to_string()));
        }
        let expr = parse_recurring_phrase(rest)?;
        return Some((ScheduleKind::Cron, expr));
    }

    if let Some(ms) = parse_short_duration(&lower) {
        return Some((ScheduleKind::At, (now_ms + ms).to_string()));
    }

    if let Some(rest) = lower.strip_prefix("in ") {
        let ms = parse_worded_duration(rest.trim())?;
        return Some((ScheduleKind::At, (now_ms + ms).to_string()));
    }

    if let Some(rest) = strip_word(&lower, "tomorrow") {
        let (hour, minute) = parse_clock(strip_at(rest))?;
        let at = wall_clock_at(now_ms, tz, hour, minute, 1, false)?;
        return Some((ScheduleKind::At, at.to_string()));
    }

    if let Some(rest) = strip_word(&lower, "today") {
        let (hour, minute) = parse_clock(strip_at(rest))?;
        let at = wall_clock_at(now_ms, tz, hour, minute, 0, true)?;
        return Some((ScheduleKind::At, at.to_string()));
    }

    // Bare clock time. The meridiem is mandatory here: without it, plain
    // numbers would be ambiguous with the duration forms above.
    let candidate = strip_at(&lower);
    if candidate.ends_with("am") || candidate.ends_with("pm") {
        if let Some((hour, minute)) = parse_clock(candidate) {
            let at = wall_clock_at(now_ms, tz, hour, minute, 0, true)?;
            return Some((ScheduleKind::At, at.to_string()));
        }
    }

    parse_absolute(trimmed, tz).map(|ms| (ScheduleKind::At, ms.to_string()))
}

/// Computes the next run after `from_ms` for a parsed `(kind, spec)` pair.
///
/// Monotonic in `from_ms` for any fixed valid input.
pub fn next_run_of(
    kind: ScheduleKind,
    spec: &str,
    from_ms: i64,
    tz: &Tz,
) -> Result<i64, BobError> {
    match kind {
        ScheduleKind::At => {
            let at = spec
                .parse::<i64>()
                .map_err(|_| BobError::InvalidSchedule(format!("bad at spec: {spec}")))?;
            Ok(from_ms.max(at))
        }
        ScheduleKind::Every => {
            let interval = spec
                .parse::<i64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| BobError::InvalidSchedule(format!("bad interval spec: {spec}")))?;
            Ok(from_ms + interval)
        }
        ScheduleKind::Cron => {
            let normalized = normalize_cron(spec)
                .ok_or_else(|| BobError::InvalidSchedule(format!("bad cron spec: {spec}")))?;
            let schedule = Schedule::from_str(&normalized)
                .map_err(|e| BobError::InvalidSchedule(format!("bad cron spec: {e}")))?;
            let anchor = DateTime::<Utc>::from_timestamp_millis(from_ms)
                .ok_or_else(|| BobError::InvalidSchedule(format!("bad anchor: {from_ms}")))?
                .with_timezone(tz);
            let next = schedule
                .after(&anchor)
                .next()
                .ok_or_else(|| BobError::InvalidSchedule(format!("cron never fires: {spec}")))?;
            Ok(next.timestamp_millis())
        }
    }
}

/// Validates a five-field cron expression and prepends the seconds field
/// the cron engine requires.
fn normalize_cron(expr: &str) -> Option<String> {
    if expr.split_whitespace().count() != 5 {
        return None;
    }
    let normalized = format!("0 {expr}");
    Schedule::from_str(&normalized).ok()?;
    Some(normalized)
}

/// `<N>{s|m|h|d}` with no whitespace, e.g. `90s`, `5m`, `2h`, `1d`.
fn parse_short_duration(s: &str) -> Option<i64> {
    let unit = s.chars().last().filter(char::is_ascii)?;
    let number = &s[..s.len() - 1];
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: i64 = number.parse().ok()?;
    let unit_ms = match unit {
        's' => 1_000,
        'm' => 60_000,
        'h' => 3_600_000,
        'd' => 86_400_000,
        _ => return None,
    };
    n.checked_mul(unit_ms).filter(|ms| *ms > 0)
}

/// `<N> (second|minute|hour|day|week)s?`.
fn parse_worded_duration(s: &str) -> Option<i64> {
    let mut parts = s.split_whitespace();
    let n: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let unit_ms = match unit.trim_end_matches('s') {
        "second" => 1_000,
        "minute" => 60_000,
        "hour" => 3_600_000,
        "day" => 86_400_000,
        "week" => 7 * 86_400_000,
        _ => return None,
    };
    n.checked_mul(unit_ms).filter(|ms| *ms > 0)
}

/// `day|week|month|<weekday> at <time>` → five-field cron.
///
/// Weekdays map Mon=1…Sun=0; `week` aliases Monday; `month` fires on the
/// first day of the month.
fn parse_recurring_phrase(s: &str) -> Option<String> {
    let (unit, time) = s.split_once(" at ")?;
    let (hour, minute) = parse_clock(time.trim())?;
    match unit.trim() {
        "day" => Some(format!("{minute} {hour} * * *")),
        "month" => Some(format!("{minute} {hour} 1 * *")),
        "week" => Some(format!("{minute} {hour} * * 1")),
        weekday => {
            let dow = weekday_number(weekday)?;
            Some(format!("{minute} {hour} * * {dow}"))
        }
    }
}

fn weekday_number(word: &str) -> Option<u8> {
    let n = match word {
        "sunday" => 0,
        "monday" => 1,
        "tuesday" => 2,
        "wednesday" => 3,
        "thursday" => 4,
        "friday" => 5,
        "saturday" => 6,
        _ => return None,
    };
    Some(n)
}

/// `<H>`, `<H>:<MM>`, optionally suffixed `am`/`pm` (space allowed).
fn parse_clock(s: &str) -> Option<(u32, u32)> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (digits, meridiem) = if let Some(rest) = s.strip_suffix("am") {
        (rest.trim_end(), Some(false))
    } else if let Some(rest) = s.strip_suffix("pm") {
        (rest.trim_end(), Some(true))
    } else {
        (s, None)
    };

    let (hour_str, minute_str) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None => (digits, "0"),
    };
    if hour_str.is_empty() || !hour_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if minute_str.is_empty() || !minute_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut hour: u32 = hour_str.parse().ok()?;
    let minute: u32 = minute_str.parse().ok()?;
    if minute > 59 {
        return None;
    }

    match meridiem {
        Some(pm) => {
            if hour == 0 || hour > 12 {
                return None;
            }
            if pm && hour < 12 {
                hour += 12;
            } else if !pm && hour == 12 {
                hour = 0;
            }
        }
        None => {
            if hour > 23 {
                return None;
            }
        }
    }

    Some((hour, minute))
}

/// Strips a leading word followed by whitespace (or the whole string).
fn strip_word<'a>(s: &'a str, word: &str) -> Option<&'a str> {
    let rest = s.strip_prefix(word)?;
    if rest.is_empty() || rest.starts_with(' ') {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn strip_at(s: &str) -> &str {
    s.trim().strip_prefix("at ").map(str::trim).unwrap_or(s.trim())
}

/// Resolves a wall-clock time `day_offset` days from now in `tz`, optionally
/// rolling one day forward when the instant is already past.
fn wall_clock_at(
    now_ms: i64,
    tz: &Tz,
    hour: u32,
    minute: u32,
    day_offset: u64,
    roll_if_past: bool,
) -> Option<i64> {
    let now = DateTime::<Utc>::from_timestamp_millis(now_ms)?.with_timezone(tz);
    let date = now.date_naive().checked_add_days(Days::new(day_offset))?;
    let mut at = resolve_local(tz, date, hour, minute)?;
    if roll_if_past && at <= now_ms {
        let next = date.checked_add_days(Days::new(1))?;
        at = resolve_local(tz, next, hour, minute)?;
    }
    Some(at)
}

/// Maps a naive local time onto the zone, picking the earlier instant for
/// ambiguous times and sliding forward an hour across DST gaps.
fn resolve_local(tz: &Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<i64> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(t) => Some(t.timestamp_millis()),
        chrono::LocalResult::Ambiguous(earlier, _) => Some(earlier.timestamp_millis()),
        chrono::LocalResult::None => {
            let shifted = naive + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|t| t.timestamp_millis())
        }
    }
}

/// Fallback: an absolute date or datetime string.
fn parse_absolute(s: &str, tz: &Tz) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|t| t.timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return resolve_local(tz, date, 0, 0);
    }
    None
}
