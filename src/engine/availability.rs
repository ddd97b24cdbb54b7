use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::model::*;

use super::interval::stay_days;

// ── Calendar projection ───────────────────────────────────────────

/// Every calendar day covered by an active reservation on this room.
///
/// Day granularity only: a day blocked for a few hours by a day-use booking
/// shows as unavailable. Admission decisions go through `conflict`, not this.
pub fn unavailable_dates(rs: &RoomState) -> BTreeSet<NaiveDate> {
    rs.active()
        .flat_map(|r| stay_days(r.stay.check_in, r.stay.check_out))
        .collect()
}
