use ulid::Ulid;

use crate::model::*;
use crate::payment::Checkout;

use super::availability::unavailable_dates;
use super::conflict::{find_conflict, validate_stay};
use super::interval::day_key;
use super::nights::{compute_nights, compute_total};
use super::{Engine, EngineError};

impl Engine {
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let rooms: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(rooms.len());
        for rs in rooms {
            out.push(rs.read().await.info());
        }
        out.sort_by_key(|r| r.id);
        out
    }

    /// Cached room record. Call `reconcile` for an authoritative status.
    pub async fn get_room_info(&self, id: Ulid) -> Result<RoomInfo, EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.info())
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let room_id = self
            .get_room_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Reservations matching `filter`, ordered by check-in.
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let rooms: Vec<_> = match filter.room_id {
            Some(id) => self.get_room(&id).into_iter().collect(),
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };
        let mut out = Vec::new();
        for rs in rooms {
            let guard = rs.read().await;
            out.extend(guard.reservations.iter().filter(|r| filter.matches(r)).cloned());
        }
        out.sort_by(|a, b| a.stay.check_in.cmp(&b.stay.check_in).then(a.id.cmp(&b.id)));
        out
    }

    /// Blocked calendar days for the room as `YYYY-MM-DD`, ascending.
    pub async fn unavailable_dates(&self, room_id: Ulid) -> Result<Vec<String>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(unavailable_dates(&guard).into_iter().map(day_key).collect())
    }

    /// Admission preview. Holds only a read lock, so the answer can be stale by
    /// the time a create arrives; the create re-checks under the write lock.
    pub async fn check_availability(&self, room_id: Ulid, stay: &Stay) -> Result<AvailabilityCheck, EngineError> {
        validate_stay(stay)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        let conflicting = find_conflict(guard.active(), stay, None).map(|r| r.id);
        let nights = compute_nights(stay.check_in, stay.check_out);
        Ok(AvailabilityCheck {
            room_id,
            available: conflicting.is_none(),
            conflicting,
            nights,
            total: compute_total(nights, guard.rate),
        })
    }

    /// Gateway checkout parameters: the advance if one was agreed, else the total.
    pub async fn payment_checkout(&self, reservation_id: Ulid) -> Result<Checkout, EngineError> {
        let r = self.get_reservation(reservation_id).await?;
        let amount = if r.advance_paid > Money::ZERO {
            r.advance_paid
        } else {
            r.total_amount
        };
        Ok(self.gateway.checkout(&r.id.to_string(), amount))
    }
}
