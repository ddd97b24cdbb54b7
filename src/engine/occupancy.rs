use chrono::NaiveDateTime;

use crate::model::*;

/// Room status derived from the active reservations at `as_of`.
///
/// Occupied iff some active reservation has `check_in <= as_of < check_out`.
/// Maintenance is an administrative override and passes through untouched.
pub fn derive_status(rs: &RoomState, as_of: NaiveDateTime) -> RoomStatus {
    if rs.status == RoomStatus::Maintenance {
        return RoomStatus::Maintenance;
    }
    if rs.active().any(|r| r.stay.covers(as_of)) {
        RoomStatus::Occupied
    } else {
        RoomStatus::Available
    }
}
