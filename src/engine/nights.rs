use chrono::NaiveDateTime;

use crate::model::Money;

use super::interval::normalize_to_midnight;

/// Billable nights between two instants: calendar-day difference after
/// midnight normalization, never less than one. A same-day stay bills one night.
pub fn compute_nights(check_in: NaiveDateTime, check_out: NaiveDateTime) -> u32 {
    let days = (normalize_to_midnight(check_out) - normalize_to_midnight(check_in)).num_days();
    u32::try_from(days.max(1)).unwrap_or(u32::MAX)
}

/// Default total when the caller supplies none.
pub fn compute_total(nights: u32, nightly_rate: Money) -> Money {
    nightly_rate.saturating_mul(nights)
}
