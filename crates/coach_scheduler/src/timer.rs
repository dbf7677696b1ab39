//! Timer producer (§4.10): enumerates due `ReminderSetting`s on every
//! minute tick and computes each one's next fire time, skipping weekdays
//! the setting doesn't run on. Pure functions here so the weekday-skip
//! and interval math are unit-testable without a running scheduler loop.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use coach_core::ReminderSchedule;

/// Next fire time strictly after `after`, in the reminder's own schedule.
/// `tz_offset_minutes` is the user's local offset used to evaluate
/// `hour`/`minute`/`weekdays` in local time, mirroring the decision
/// engine's `local_hour` helper.
pub fn next_fire_after(schedule: &ReminderSchedule, after: DateTime<Utc>, tz_offset_minutes: i32) -> DateTime<Utc> {
    match schedule {
        ReminderSchedule::Interval { every_minutes } => {
            after + ChronoDuration::minutes((*every_minutes).max(1) as i64)
        }
        ReminderSchedule::TimeOfDay { hour, minute, weekdays } => {
            next_time_of_day(after, *hour, *minute, weekdays, tz_offset_minutes)
        }
    }
}

fn next_time_of_day(
    after: DateTime<Utc>,
    hour: u8,
    minute: u8,
    weekdays: &[chrono::Weekday],
    tz_offset_minutes: i32,
) -> DateTime<Utc> {
    let offset = ChronoDuration::minutes(tz_offset_minutes as i64);
    let local_after = after + offset;
    let target_time = NaiveTime::from_hms_opt(hour as u32, minute as u32, 0).unwrap_or(NaiveTime::MIN);

    for day_offset in 0..8 {
        let candidate_date = local_after.date_naive() + ChronoDuration::days(day_offset);
        if !weekdays.is_empty() && !weekdays.contains(&candidate_date.weekday()) {
            continue;
        }
        let candidate_local = candidate_date.and_time(target_time);
        let candidate_utc = Utc.from_utc_datetime(&candidate_local) - offset;
        if candidate_utc > after {
            return candidate_utc;
        }
    }

    // No weekday in the configured subset occurs within a week — schedule
    // is effectively disabled; push a week out so `list_due` doesn't spin.
    after + ChronoDuration::days(7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    #[test]
    fn interval_schedule_adds_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 2, 20, 8, 0, 0).unwrap();
        let next = next_fire_after(&ReminderSchedule::Interval { every_minutes: 90 }, after, 0);
        assert_eq!(next, after + ChronoDuration::minutes(90));
    }

    #[test]
    fn time_of_day_same_day_if_still_ahead() {
        let after = Utc.with_ymd_and_hms(2026, 2, 20, 8, 0, 0).unwrap(); // Friday
        let schedule = ReminderSchedule::TimeOfDay { hour: 19, minute: 0, weekdays: vec![] };
        let next = next_fire_after(&schedule, after, 0);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 20, 19, 0, 0).unwrap());
    }

    #[test]
    fn time_of_day_rolls_to_next_day_once_past() {
        let after = Utc.with_ymd_and_hms(2026, 2, 20, 20, 0, 0).unwrap();
        let schedule = ReminderSchedule::TimeOfDay { hour: 19, minute: 0, weekdays: vec![] };
        let next = next_fire_after(&schedule, after, 0);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 21, 19, 0, 0).unwrap());
    }

    #[test]
    fn time_of_day_skips_disabled_weekdays() {
        // Friday 2026-02-20 20:00, only Mon/Wed/Fri enabled -> next is Monday.
        let after = Utc.with_ymd_and_hms(2026, 2, 20, 20, 0, 0).unwrap();
        let schedule = ReminderSchedule::TimeOfDay {
            hour: 7,
            minute: 30,
            weekdays: vec![Weekday::Mon, Weekday::Wed, Weekday::Fri],
        };
        let next = next_fire_after(&schedule, after, 0);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 23, 7, 30, 0).unwrap());
    }

    #[test]
    fn time_of_day_honors_local_offset() {
        // 19:00 local in UTC+480 (e.g. China Standard Time) is 11:00 UTC.
        let after = Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap();
        let schedule = ReminderSchedule::TimeOfDay { hour: 19, minute: 0, weekdays: vec![] };
        let next = next_fire_after(&schedule, after, 480);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 20, 11, 0, 0).unwrap());
    }
}
