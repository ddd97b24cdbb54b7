use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::Stay;

const CHECK_IN: NaiveTime = match NaiveTime::from_hms_opt(14, 0, 0) {
    Some(t) => t,
    None => panic!("14:00 is a valid clock time"),
};

const CHECK_OUT: NaiveTime = match NaiveTime::from_hms_opt(11, 0, 0) {
    Some(t) => t,
    None => panic!("11:00 is a valid clock time"),
};

/// Clock time a guest checks in when the request does not say.
pub fn default_check_in_time() -> NaiveTime {
    CHECK_IN
}

/// Clock time a guest checks out when the request does not say.
pub fn default_check_out_time() -> NaiveTime {
    CHECK_OUT
}

/// Build a stay, filling absent clock times.
///
/// A single-day stay takes its window from the instants themselves, so a
/// 10:00 → 16:00 day-use booking keeps 10:00 → 16:00. Anything longer falls
/// back to the 14:00 / 11:00 house times.
pub fn resolve_stay(
    check_in: NaiveDateTime,
    check_out: NaiveDateTime,
    check_in_time: Option<NaiveTime>,
    check_out_time: Option<NaiveTime>,
) -> Stay {
    let single_day = same_calendar_day(check_in, check_out);
    let (in_default, out_default) = if single_day {
        (check_in.time(), check_out.time())
    } else {
        (CHECK_IN, CHECK_OUT)
    };
    Stay {
        check_in,
        check_out,
        check_in_time: check_in_time.unwrap_or(in_default),
        check_out_time: check_out_time.unwrap_or(out_default),
    }
}

/// Strip the time of day.
pub fn normalize_to_midnight(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_time(NaiveTime::MIN)
}

/// Half-open overlap: `[a_start, a_end)` and `[b_start, b_end)` share at least one point.
/// Adjacent ranges (`a_end == b_start`) do not overlap.
pub fn intervals_overlap<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

pub fn same_calendar_day(a: NaiveDateTime, b: NaiveDateTime) -> bool {
    a.date() == b.date()
}

/// Calendar days touched by `[check_in, check_out)`, stepping one day at a time
/// from the check-in instant while still before check-out.
///
/// A same-day stay (10:00 → 16:00) yields its one day; a midnight-to-midnight
/// stay excludes the check-out day.
pub fn stay_days(check_in: NaiveDateTime, check_out: NaiveDateTime) -> impl Iterator<Item = NaiveDate> {
    std::iter::successors(Some(check_in), |t| t.checked_add_days(Days::new(1)))
        .take_while(move |t| *t < check_out)
        .map(|t| t.date())
}

/// `2025-09-01`, `2025-09-01T10:00`, `2025-09-01 10:00:00`. A bare date means midnight.
pub fn parse_instant(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// `14:00` or `14:00:00`.
pub fn parse_clock(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

/// Calendar-day key used by calendar pickers.
pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
