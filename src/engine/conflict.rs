use ulid::Ulid;

use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;

use super::interval::{intervals_overlap, same_calendar_day};
use super::nights::compute_nights;
use super::EngineError;

pub(crate) fn validate_stay(stay: &Stay) -> Result<(), EngineError> {
    if stay.check_in >= stay.check_out {
        return Err(EngineError::validation("check-in must be before check-out"));
    }
    if stay.is_single_day() && stay.check_in_time >= stay.check_out_time {
        return Err(EngineError::validation("check-in time must be before check-out time"));
    }
    if compute_nights(stay.check_in, stay.check_out) > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// Does `candidate` collide with `existing`?
///
/// Any date-level overlap conflicts, except when both stays are single-day
/// bookings sharing a boundary day: then only overlapping clock windows conflict.
/// A multi-day stay touching a boundary day is always a hard conflict.
pub fn stays_conflict(existing: &Stay, candidate: &Stay) -> bool {
    if !intervals_overlap(
        candidate.check_in,
        candidate.check_out,
        existing.check_in,
        existing.check_out,
    ) {
        return false;
    }

    let shares_boundary_day = [candidate.check_in, candidate.check_out].iter().any(|c| {
        [existing.check_in, existing.check_out]
            .iter()
            .any(|e| same_calendar_day(*c, *e))
    });

    if shares_boundary_day && candidate.is_single_day() && existing.is_single_day() {
        return intervals_overlap(
            candidate.check_in_time,
            candidate.check_out_time,
            existing.check_in_time,
            existing.check_out_time,
        );
    }
    true
}

/// First active reservation (other than `exclude`) colliding with `candidate`.
pub fn find_conflict<'a>(
    active: impl IntoIterator<Item = &'a Reservation>,
    candidate: &Stay,
    exclude: Option<Ulid>,
) -> Option<&'a Reservation> {
    active
        .into_iter()
        .filter(|r| Some(r.id) != exclude)
        .find(|r| stays_conflict(&r.stay, candidate))
}

/// Admission decision for `candidate` on `rs`: Ok to admit, `DatesUnavailable` to reject.
/// Caller holds the room lock across this check and the insert that follows.
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    candidate: &Stay,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    validate_stay(candidate)?;
    match find_conflict(rs.active(), candidate, exclude) {
        Some(existing) => Err(EngineError::DatesUnavailable {
            room_id: rs.id,
            conflicting: existing.id,
        }),
        None => Ok(()),
    }
}
