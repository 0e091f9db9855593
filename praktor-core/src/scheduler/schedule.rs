//! Schedule normalization: accepts relative delays, cron
//! expressions/presets, and explicit interval literals; normalizes all
//! three into one of three canonical JSON forms. Evaluation is always in
//! **local time** — the contract explicitly forbids silently converting to
//! UTC at storage time.

use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::error::ScheduleError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    Once { at_ms: i64 },
    Interval { interval_ms: i64 },
    Cron { expr: String },
}

impl Schedule {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Schedule always serializes")
    }

    pub fn from_json(s: &str) -> Result<Self, ScheduleError> {
        serde_json::from_str(s).map_err(|e| ScheduleError::InvalidExpression(e.to_string()))
    }

    /// Next instant strictly after `after`, or `None` if the schedule has no
    /// future occurrence (one-shots that already fired).
    pub fn next_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Schedule::Once { at_ms } => {
                let at = DateTime::from_timestamp_millis(*at_ms)?.with_timezone(&Local);
                (at > after).then_some(at)
            }
            Schedule::Interval { interval_ms } => {
                Some(after + chrono::Duration::milliseconds(*interval_ms))
            }
            Schedule::Cron { expr } => {
                let cron_schedule = cron::Schedule::from_str(expr).ok()?;
                cron_schedule.after(&after).next()
            }
        }
    }
}

/// Normalizes a user-supplied schedule expression into its canonical
/// [`Schedule`]. Idempotent: normalizing the JSON output of a prior
/// normalization returns the same value (round-trips through
/// [`Schedule::from_json`]/[`Schedule::to_json`] without drift).
pub fn normalize(input: &str, now: DateTime<Local>) -> Result<Schedule, ScheduleError> {
    let input = input.trim();

    // Already-normalized JSON document (idempotence: re-normalizing a
    // stored schedule must return the same value, not reinterpret it).
    if input.starts_with('{') {
        return Schedule::from_json(input);
    }

    if let Some(schedule) = parse_relative_delay(input, now) {
        return Ok(schedule);
    }

    let expanded = expand_preset(input).unwrap_or_else(|| normalize_field_count(input));
    cron::Schedule::from_str(&expanded)
        .map(|_| Schedule::Cron { expr: expanded })
        .map_err(|e| ScheduleError::InvalidExpression(format!("{input}: {e}")))
}

/// The `cron` crate's own syntax is `sec min hour dom month dow [year]` (6 or
/// 7 fields). We additionally accept a bare 5-field standard cron
/// expression (`min hour dom month dow`, no seconds) and a 6-field one with
/// a trailing year (`min hour dom month dow year`) — both get a `0` seconds
/// field prepended so the crate sees its native 6- or 7-field form. A
/// 7-field input already matches the crate's syntax and passes through.
fn normalize_field_count(input: &str) -> String {
    match input.split_whitespace().count() {
        5 | 6 => format!("0 {input}"),
        _ => input.to_string(),
    }
}

/// `+<N>s` / `+<N>m` / `+<N>h` → a one-shot firing `N` units from `now`.
fn parse_relative_delay(input: &str, now: DateTime<Local>) -> Option<Schedule> {
    let rest = input.strip_prefix('+')?;
    let (digits, unit) = rest.split_at(rest.len().checked_sub(1)?);
    let n: i64 = digits.parse().ok()?;
    let seconds = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        _ => return None,
    };
    Some(Schedule::Once {
        at_ms: now.timestamp_millis() + seconds * 1000,
    })
}

/// Expands the named presets into 6-field (sec min hour dom month
/// dow) cron expressions understood by the `cron` crate.
fn expand_preset(input: &str) -> Option<String> {
    let expr = match input {
        "@yearly" | "@annually" => "0 0 0 1 1 *",
        "@monthly" => "0 0 0 1 * *",
        "@weekly" => "0 0 0 * * Sun",
        "@daily" | "@midnight" => "0 0 0 * * *",
        "@hourly" => "0 0 * * * *",
        "@5minutes" => "0 */5 * * * *",
        "@10minutes" => "0 */10 * * * *",
        "@15minutes" => "0 */15 * * * *",
        "@30minutes" => "0 */30 * * * *",
        "@always" => "0 * * * * *",
        "@everysecond" => "* * * * * *",
        _ => return None,
    };
    Some(expr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn relative_delay_seconds_produces_once_schedule() {
        let schedule = normalize("+30s", now()).unwrap();
        assert_eq!(
            schedule,
            Schedule::Once {
                at_ms: now().timestamp_millis() + 30_000
            }
        );
    }

    #[test]
    fn s4_cron_expression_evaluates_next_instant_in_local_time() {
        let schedule = normalize("0 9 * * *", now()).unwrap();
        let fired_at = Local.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let next = schedule.next_after(fired_at).unwrap();
        assert_eq!(next, Local.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn seven_field_cron_with_seconds_passes_through_unchanged() {
        let schedule = normalize("30 0 9 * * * *", now()).unwrap();
        assert_eq!(schedule, Schedule::Cron { expr: "30 0 9 * * * *".to_string() });
        let fired_at = Local.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let next = schedule.next_after(fired_at).unwrap();
        assert_eq!(next, Local.with_ymd_and_hms(2025, 1, 1, 9, 0, 30).unwrap());
    }

    #[test]
    fn six_field_cron_with_year_gets_seconds_prepended() {
        let schedule = normalize("0 9 * * * 2025", now()).unwrap();
        assert_eq!(schedule, Schedule::Cron { expr: "0 0 9 * * * 2025".to_string() });
    }

    #[test]
    fn preset_daily_expands_and_parses() {
        let schedule = normalize("@daily", now()).unwrap();
        assert!(matches!(schedule, Schedule::Cron { .. }));
    }

    #[test]
    fn explicit_interval_literal_round_trips() {
        let schedule = normalize(r#"{"kind":"interval","interval_ms":86400000}"#, now()).unwrap();
        assert_eq!(schedule, Schedule::Interval { interval_ms: 86_400_000 });
    }

    #[test]
    fn normalize_is_idempotent() {
        let first = normalize("+30s", now()).unwrap();
        let second = normalize(&first.to_json(), now()).unwrap();
        assert_eq!(first, second);
        let third = normalize(&second.to_json(), now()).unwrap();
        assert_eq!(second, third);
    }

    #[test]
    fn once_schedule_in_the_past_has_no_next_instant() {
        let schedule = Schedule::Once {
            at_ms: now().timestamp_millis() - 1000,
        };
        assert_eq!(schedule.next_after(now()), None);
    }

    #[test]
    fn invalid_expression_is_rejected() {
        assert!(normalize("not a schedule", now()).is_err());
    }
}
