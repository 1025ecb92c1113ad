//! Schedule expressions for the job runner.
//!
//! A [`CronExpr`] is the parsed form of a 5-field expression
//! (minute hour day month weekday): each field compiles once into a bitmask
//! of accepted values, so evaluation is bit tests instead of re-parsing.
//! Out-of-range values (`61 * * * *`) are rejected at parse time.
//!
//! `next_after` walks calendar days first and only scans hour/minute bits
//! on days whose date fields match, resolving the result from the job's
//! timezone back to UTC.

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

/// Field ranges: (min, max) per position.
const FIELD_RANGES: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];

/// Search horizon in days. Four years covers every reachable date pattern,
/// leap days included; anything still unmatched never fires.
const MAX_SEARCH_DAYS: usize = 366 * 4;

/// A parsed cron expression. Bit `v` of a field mask is set when value `v`
/// is accepted. Weekday bit 0 is Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u32,
    days: u32,
    months: u16,
    weekdays: u8,
}

impl CronExpr {
    /// Parse a 5-field expression. Returns `None` for the wrong field
    /// count, unparseable parts, zero steps, or out-of-range values.
    pub fn parse(expr: &str) -> Option<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != FIELD_RANGES.len() {
            return None;
        }

        let mut masks = [0u64; 5];
        for (i, (field, (min, max))) in fields.iter().copied().zip(FIELD_RANGES).enumerate() {
            masks[i] = compile_field(field, min, max)?;
        }

        Some(Self {
            minutes: masks[0],
            hours: masks[1] as u32,
            days: masks[2] as u32,
            months: masks[3] as u16,
            weekdays: masks[4] as u8,
        })
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        self.days & (1 << date.day()) != 0
            && self.months & (1 << date.month()) != 0
            && self.weekdays & (1 << date.weekday().num_days_from_sunday()) != 0
    }

    /// Earliest accepted wall-clock time at or after `from` (midnight when
    /// `None`). Returns `None` when no accepted time remains that day.
    fn first_time_at_or_after(&self, from: Option<NaiveTime>) -> Option<NaiveTime> {
        let (from_hour, from_minute) = match from {
            Some(t) => (t.hour(), t.minute()),
            None => (0, 0),
        };

        for hour in from_hour..24 {
            if self.hours & (1 << hour) == 0 {
                continue;
            }
            let minute_floor = if hour == from_hour { from_minute } else { 0 };
            for minute in minute_floor..60 {
                if self.minutes & (1 << minute) != 0 {
                    return NaiveTime::from_hms_opt(hour, minute, 0);
                }
            }
        }
        None
    }

    /// Next occurrence strictly after `after`, evaluated in `tz`, as UTC.
    ///
    /// Local times that fall into a DST gap are skipped; a time that occurs
    /// twice in the fall-back fold resolves to the earlier instant.
    pub fn next_after(&self, after: &DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&tz).naive_local();
        let first_minute = local.with_second(0).unwrap_or(local) + chrono::Duration::minutes(1);

        let mut date = first_minute.date();
        let mut floor = Some(first_minute.time());

        for _ in 0..MAX_SEARCH_DAYS {
            if self.date_matches(date) {
                let mut candidate = self.first_time_at_or_after(floor);
                while let Some(time) = candidate {
                    match tz.from_local_datetime(&date.and_time(time)) {
                        LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                        LocalResult::Ambiguous(earlier, _) => {
                            return Some(earlier.with_timezone(&Utc));
                        }
                        LocalResult::None => {
                            // Inside a spring-forward gap; try the next
                            // accepted time the same day.
                            candidate = next_minute(time).and_then(|t| {
                                self.first_time_at_or_after(Some(t))
                            });
                        }
                    }
                }
            }
            date = date.succ_opt()?;
            floor = None;
        }
        None
    }
}

/// One minute later, or `None` past 23:59.
fn next_minute(time: NaiveTime) -> Option<NaiveTime> {
    match (time.hour(), time.minute()) {
        (23, 59) => None,
        (h, 59) => NaiveTime::from_hms_opt(h + 1, 0, 0),
        (h, m) => NaiveTime::from_hms_opt(h, m + 1, 0),
    }
}

/// Compile one field into a bitmask over `min..=max`. Supports `*`, `*/n`
/// (values divisible by `n`), and comma lists of values or `a-b` ranges.
fn compile_field(field: &str, min: u32, max: u32) -> Option<u64> {
    if field == "*" {
        let mut mask = 0u64;
        for v in min..=max {
            mask |= 1 << v;
        }
        return Some(mask);
    }

    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        let mut mask = 0u64;
        for v in min..=max {
            if v % n == 0 {
                mask |= 1 << v;
            }
        }
        return Some(mask);
    }

    let mut mask = 0u64;
    for part in field.split(',') {
        let (lo, hi) = match part.split_once('-') {
            Some((a, b)) => (a.parse().ok()?, b.parse().ok()?),
            None => {
                let v: u32 = part.parse().ok()?;
                (v, v)
            }
        };
        if lo < min || hi > max || lo > hi {
            return None;
        }
        for v in lo..=hi {
            mask |= 1 << v;
        }
    }
    (mask != 0).then_some(mask)
}

// ── String-level conveniences used by the schedule store ────────────

pub fn is_valid(expr: &str) -> bool {
    CronExpr::parse(expr).is_some()
}

pub fn next_occurrence(
    expr: &str,
    after: &DateTime<Utc>,
    tz: chrono_tz::Tz,
) -> Option<DateTime<Utc>> {
    CronExpr::parse(expr)?.next_after(after, tz)
}

/// Resolve a timezone name, treating anything unknown as UTC.
pub fn parse_tz(name: &str) -> chrono_tz::Tz {
    name.parse().unwrap_or(chrono_tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_compiles_field_masks() {
        let expr = CronExpr::parse("0,30 9-17 * * 1-5").unwrap();
        assert_eq!(expr.minutes, (1 << 0) | (1 << 30));
        assert_eq!(expr.hours, (9..=17).fold(0u32, |m, h| m | (1 << h)));
        assert_eq!(expr.weekdays, 0b0111110);
    }

    #[test]
    fn parse_step_takes_divisible_values() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        assert_eq!(expr.minutes, (1 << 0) | (1 << 15) | (1 << 30) | (1 << 45));
    }

    #[test]
    fn parse_rejects_malformed_expressions() {
        assert!(CronExpr::parse("* * * *").is_none()); // four fields
        assert!(CronExpr::parse("* * * * * *").is_none()); // six fields
        assert!(CronExpr::parse("a b c d e").is_none());
        assert!(CronExpr::parse("*/x * * * *").is_none());
        assert!(CronExpr::parse("*/0 * * * *").is_none());
        assert!(CronExpr::parse("61 * * * *").is_none()); // minute out of range
        assert!(CronExpr::parse("* 24 * * *").is_none()); // hour out of range
        assert!(CronExpr::parse("* * 0 * *").is_none()); // day zero
        assert!(CronExpr::parse("30-10 * * * *").is_none()); // inverted range
    }

    #[test]
    fn next_after_rolls_to_the_following_minute_slot() {
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 10, 1, 0).unwrap();
        let next = next_occurrence("*/5 * * * *", &after, chrono_tz::UTC).unwrap();
        assert_eq!(next.hour(), 10);
        assert_eq!(next.minute(), 5);
    }

    #[test]
    fn next_after_skips_to_tomorrow_when_today_is_spent() {
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let next = next_occurrence("30 9 * * *", &after, chrono_tz::UTC).unwrap();
        assert_eq!((next.day(), next.hour(), next.minute()), (16, 9, 30));
    }

    #[test]
    fn next_after_respects_weekday_masks() {
        // 2024-06-15 is a Saturday; the next weekday run is Monday the 17th.
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
        let next = next_occurrence("0 9 * * 1-5", &after, chrono_tz::UTC).unwrap();
        assert_eq!(next.day(), 17);
        assert_eq!(next.hour(), 9);
    }

    #[test]
    fn next_after_converts_from_the_job_timezone() {
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
        let next = next_occurrence("0 9 * * *", &after, parse_tz("Asia/Tokyo")).unwrap();
        // 09:00 JST is midnight UTC; `after` is exactly that, so the next
        // strict occurrence is the following day.
        assert_eq!((next.day(), next.hour(), next.minute()), (16, 0, 0));
    }

    #[test]
    fn spring_forward_gap_is_skipped() {
        // US/Eastern 2024-03-10: 02:30 local does not exist.
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap();
        let next = next_occurrence("30 2 * * *", &after, parse_tz("US/Eastern")).unwrap();
        assert_eq!(next.day(), 11);
        assert_eq!(next.hour(), 6); // 02:30 EDT
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn fall_back_fold_takes_the_earlier_instant() {
        // US/Eastern 2024-11-03: 01:30 local happens twice.
        let after = Utc.with_ymd_and_hms(2024, 11, 3, 4, 0, 0).unwrap();
        let next = next_occurrence("30 1 * * *", &after, parse_tz("US/Eastern")).unwrap();
        assert_eq!(next.hour(), 5); // 01:30 EDT, not 01:30 EST
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn unmatchable_date_returns_none() {
        // April has no 31st, and the day/month masks here accept nothing else.
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(next_occurrence("0 0 31 4 *", &after, chrono_tz::UTC).is_none());
    }

    #[test]
    fn is_valid_mirrors_parse() {
        assert!(is_valid("*/5 * * * *"));
        assert!(is_valid("0,30 9-17 * 1,2 0"));
        assert!(!is_valid("* * * *"));
        assert!(!is_valid("99 * * * *"));
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(parse_tz("Not/Real"), chrono_tz::UTC);
        assert_eq!(parse_tz(""), chrono_tz::UTC);
        assert_eq!(parse_tz("Europe/London"), chrono_tz::Europe::London);
    }
}
