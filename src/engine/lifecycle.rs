use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime, Utc};
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NoticeKind;
use crate::observability as obs;
use crate::payment::{GatewayOutcome, PaymentNotification};

use super::conflict::check_no_conflict;
use super::interval::resolve_stay;
use super::nights::{compute_nights, compute_total};
use super::occupancy::derive_status;
use super::{Engine, EngineError, WalCommand};

/// A booking request, validated as a whole before it reaches the room lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub id: Ulid,
    pub room_id: Ulid,
    pub check_in: NaiveDateTime,
    pub check_out: NaiveDateTime,
    pub check_in_time: Option<NaiveTime>,
    pub check_out_time: Option<NaiveTime>,
    pub guests: u32,
    pub guest_details: Vec<Guest>,
    /// Overrides `nights * rate` when set.
    pub total_amount: Option<Money>,
    pub advance_paid: Option<Money>,
    pub special_requests: Option<String>,
}

impl ReservationRequest {
    pub fn stay(&self) -> Stay {
        resolve_stay(self.check_in, self.check_out, self.check_in_time, self.check_out_time)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.guests == 0 {
            return Err(EngineError::validation("guests must be at least 1"));
        }
        if self.guests > MAX_GUESTS_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many guests"));
        }
        if self.guest_details.is_empty() {
            return Err(EngineError::validation("at least one guest record is required"));
        }
        if self.guest_details.len() > MAX_GUEST_RECORDS {
            return Err(EngineError::LimitExceeded("too many guest records"));
        }
        for guest in &self.guest_details {
            validate_guest(guest)?;
        }
        for amount in [self.total_amount, self.advance_paid].into_iter().flatten() {
            if amount.is_negative() {
                return Err(EngineError::validation("amounts must not be negative"));
            }
        }
        if let (Some(total), Some(advance)) = (self.total_amount, self.advance_paid)
            && advance > total
        {
            return Err(EngineError::validation("advance exceeds total"));
        }
        if self
            .special_requests
            .as_ref()
            .is_some_and(|s| s.len() > MAX_SPECIAL_REQUESTS_LEN)
        {
            return Err(EngineError::LimitExceeded("special requests too long"));
        }
        Ok(())
    }
}

fn validate_guest(guest: &Guest) -> Result<(), EngineError> {
    if guest.name.trim().is_empty() {
        return Err(EngineError::validation("guest name is required"));
    }
    let email = guest.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(EngineError::validation("guest email is invalid"));
    }
    if guest.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    let contact = [Some(&guest.email), guest.phone.as_ref(), guest.address.as_ref()];
    if contact.into_iter().flatten().any(|s| s.len() > MAX_CONTACT_LEN) {
        return Err(EngineError::LimitExceeded("guest contact field too long"));
    }
    Ok(())
}

/// Admin-entered payment figures. `final_amount` is derived when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentRecord {
    pub payment_status: PaymentStatus,
    pub discount_amount: Option<Money>,
    /// Basis points.
    pub discount_percentage: Option<u32>,
    pub final_amount: Option<Money>,
}

impl PaymentRecord {
    fn validate(&self) -> Result<(), EngineError> {
        if self.discount_amount.is_some_and(Money::is_negative)
            || self.final_amount.is_some_and(Money::is_negative)
        {
            return Err(EngineError::validation("amounts must not be negative"));
        }
        if self.discount_percentage.is_some_and(|p| p > 10_000) {
            return Err(EngineError::validation("discount percentage above 100"));
        }
        Ok(())
    }

    fn final_amount_for(&self, total: Money) -> Money {
        match (self.final_amount, self.discount_amount, self.discount_percentage) {
            (Some(f), _, _) => f,
            (None, Some(d), _) => total.saturating_sub(d),
            (None, None, Some(p)) => total.saturating_sub(total.percent(p)),
            (None, None, None) => total,
        }
    }
}

fn check_name(name: &Option<String>) -> Result<(), EngineError> {
    if name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    Ok(())
}

/// Would moving `r` to these statuses bring it back into the active set?
fn reactivates(r: &Reservation, status: ReservationStatus, payment_status: PaymentStatus) -> bool {
    !r.is_active() && counts_as_active(status, payment_status)
}

impl Engine {
    // ── Rooms ─────────────────────────────────────────────

    pub async fn create_room(
        &self,
        id: Ulid,
        name: Option<String>,
        rate: Money,
        status: Option<RoomStatus>,
    ) -> Result<RoomInfo, EngineError> {
        check_name(&name)?;
        if rate.is_negative() {
            return Err(EngineError::validation("rate must not be negative"));
        }
        let _room_set = self.room_set.lock().await;
        if self.state.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let status = status.unwrap_or_default();
        let event = Event::RoomCreated {
            id,
            name: name.clone(),
            rate,
            status,
        };
        self.wal_append(&event).await?;
        let rs = RoomState::new(id, name, rate, status);
        let info = rs.info();
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        tracing::info!(room_id = %id, %rate, %status, "room created");
        Ok(info)
    }

    /// Replaces name, rate and status. Setting Available/Occupied here only
    /// writes the cache; the next reconciliation may overwrite it.
    pub async fn update_room(
        &self,
        id: Ulid,
        name: Option<String>,
        rate: Money,
        status: RoomStatus,
    ) -> Result<RoomInfo, EngineError> {
        check_name(&name)?;
        if rate.is_negative() {
            return Err(EngineError::validation("rate must not be negative"));
        }
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if guard.name == name && guard.rate == rate && guard.status == status {
            return Ok(guard.info());
        }
        let event = Event::RoomUpdated { id, name, rate, status };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(room_id = %id, %rate, %status, "room updated");
        Ok(guard.info())
    }

    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _room_set = self.room_set.lock().await;
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;
        if !guard.reservations.is_empty() {
            return Err(EngineError::RoomInUse(id));
        }
        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        // removed while still locked so waiters see the room gone
        self.state.remove(&id);
        drop(guard);
        tracing::info!(room_id = %id, "room deleted");
        Ok(())
    }

    // ── Reservations ──────────────────────────────────────

    /// Admit or reject a booking. The room's write lock is held from the
    /// conflict check through the WAL append, so two overlapping requests for
    /// one room can never both be admitted.
    pub async fn create_reservation(&self, req: ReservationRequest) -> Result<Reservation, EngineError> {
        req.validate()?;
        let stay = req.stay();
        let rs = self
            .get_room(&req.room_id)
            .ok_or(EngineError::NotFound(req.room_id))?;
        let mut guard = rs.write().await;
        if !self.state.contains_key(&req.room_id) {
            return Err(EngineError::NotFound(req.room_id));
        }
        if self.reservation_to_room.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }

        if let Err(e) = check_no_conflict(&guard, &stay, None) {
            if matches!(e, EngineError::DatesUnavailable { .. }) {
                metrics::counter!(obs::RESERVATIONS_REJECTED_TOTAL).increment(1);
                tracing::info!(room_id = %req.room_id, reservation_id = %req.id, "reservation rejected: {e}");
            }
            return Err(e);
        }

        let nights = compute_nights(stay.check_in, stay.check_out);
        let total_amount = req
            .total_amount
            .unwrap_or_else(|| compute_total(nights, guard.rate));
        let reservation = Reservation {
            id: req.id,
            room_id: req.room_id,
            stay,
            guests: req.guests,
            guest_details: req.guest_details,
            status: ReservationStatus::Pending,
            payment_status: PaymentStatus::Pending,
            nights,
            total_amount,
            advance_paid: req.advance_paid.unwrap_or(Money::ZERO),
            discount_amount: None,
            discount_percentage: None,
            final_amount: None,
            amount_paid: None,
            payment_reference: None,
            special_requests: req.special_requests,
            created_at: Utc::now(),
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let room = guard.info();
        drop(guard);

        metrics::counter!(obs::RESERVATIONS_ADMITTED_TOTAL).increment(1);
        tracing::info!(
            room_id = %reservation.room_id,
            reservation_id = %reservation.id,
            nights,
            total = %reservation.total_amount,
            "reservation admitted"
        );
        self.notify(NoticeKind::Created, reservation.clone(), room);
        Ok(reservation)
    }

    /// Admin status change. Any target is allowed; leaving Cancelled re-runs
    /// the conflict check against the room's other active reservations.
    pub async fn update_status(&self, id: Ulid, status: ReservationStatus) -> Result<Reservation, EngineError> {
        let (room_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))?;
        if current.status == status {
            tracing::debug!(reservation_id = %id, %status, "status unchanged");
            return Ok(current);
        }
        if reactivates(&current, status, current.payment_status) {
            check_no_conflict(&guard, &current.stay, Some(id))?;
        }

        let event = Event::ReservationStatusChanged { id, room_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))?;
        let room = guard.info();
        drop(guard);

        tracing::info!(reservation_id = %id, from = %current.status, to = %status, "reservation status changed");
        match status {
            ReservationStatus::Confirmed => self.notify(NoticeKind::Confirmed, updated.clone(), room),
            ReservationStatus::Cancelled => self.notify(NoticeKind::Cancelled, updated.clone(), room),
            ReservationStatus::Pending => {}
        }
        Ok(updated)
    }

    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.update_status(id, ReservationStatus::Cancelled).await
    }

    pub async fn record_payment(&self, id: Ulid, record: PaymentRecord) -> Result<Reservation, EngineError> {
        record.validate()?;
        let (room_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))?;

        let final_amount = Some(record.final_amount_for(current.total_amount));
        if current.payment_status == record.payment_status
            && current.discount_amount == record.discount_amount
            && current.discount_percentage == record.discount_percentage
            && current.final_amount == final_amount
        {
            tracing::debug!(reservation_id = %id, "payment unchanged");
            return Ok(current);
        }
        if reactivates(&current, current.status, record.payment_status) {
            check_no_conflict(&guard, &current.stay, Some(id))?;
        }

        let event = Event::PaymentRecorded {
            id,
            room_id,
            payment_status: record.payment_status,
            discount_amount: record.discount_amount,
            discount_percentage: record.discount_percentage,
            final_amount,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))?;
        let room = guard.info();
        drop(guard);

        tracing::info!(
            reservation_id = %id,
            payment_status = %record.payment_status,
            final_amount = ?final_amount.map(|m| m.to_string()),
            "payment recorded"
        );
        if record.payment_status == PaymentStatus::Paid && current.payment_status != PaymentStatus::Paid {
            self.notify(NoticeKind::PaymentConfirmed, updated.clone(), room);
        }
        Ok(updated)
    }

    /// Gateway status callback. The signature is checked before anything else;
    /// a rejected callback changes nothing.
    pub async fn apply_payment_notification(&self, n: &PaymentNotification) -> Result<Reservation, EngineError> {
        if let Err(e) = self.gateway.verify(n) {
            metrics::counter!(obs::WEBHOOKS_REJECTED_TOTAL).increment(1);
            tracing::warn!(order_id = %n.order_id, status_code = %n.status_code, "payment notification rejected: {e}");
            return Err(EngineError::SignatureRejected(n.order_id.clone()));
        }
        let id = Ulid::from_string(n.order_id.trim())
            .map_err(|_| EngineError::validation(format!("order id is not a reservation id: {}", n.order_id)))?;
        if n.payment_id.as_ref().is_some_and(|p| p.len() > MAX_PAYMENT_REFERENCE_LEN) {
            return Err(EngineError::LimitExceeded("payment reference too long"));
        }
        let outcome = GatewayOutcome::from_status_code(&n.status_code);

        let (room_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))?;

        let Some((payment_status, status)) = outcome.target() else {
            tracing::info!(reservation_id = %id, "payment pending at gateway");
            return Ok(current);
        };
        let amount_paid = match outcome {
            GatewayOutcome::Success => Some(
                Money::parse(&n.amount)
                    .ok_or_else(|| EngineError::validation(format!("bad amount: {}", n.amount)))?,
            ),
            _ => current.amount_paid,
        };
        let payment_reference = n.payment_id.clone().or_else(|| current.payment_reference.clone());

        if current.payment_status == payment_status
            && current.status == status
            && current.amount_paid == amount_paid
            && current.payment_reference == payment_reference
        {
            tracing::debug!(reservation_id = %id, "duplicate payment notification");
            return Ok(current);
        }
        if reactivates(&current, status, payment_status)
            && let Err(e) = check_no_conflict(&guard, &current.stay, Some(id))
        {
            tracing::error!(
                reservation_id = %id,
                amount = %n.amount,
                "payment captured for reservation whose dates were taken, refund required: {e}"
            );
            return Err(e);
        }

        let event = Event::PaymentNotified {
            id,
            room_id,
            payment_status,
            status,
            amount_paid,
            payment_reference,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))?;
        let room = guard.info();
        drop(guard);

        metrics::counter!(obs::WEBHOOKS_APPLIED_TOTAL, "outcome" => payment_status.as_str()).increment(1);
        tracing::info!(reservation_id = %id, %payment_status, %status, "payment notification applied");
        match outcome {
            GatewayOutcome::Success if current.payment_status != PaymentStatus::Paid => {
                self.notify(NoticeKind::PaymentConfirmed, updated.clone(), room)
            }
            GatewayOutcome::Failed if current.status != ReservationStatus::Cancelled => {
                self.notify(NoticeKind::Cancelled, updated.clone(), room)
            }
            _ => {}
        }
        Ok(updated)
    }

    pub async fn add_guest(&self, id: Ulid, guest: Guest) -> Result<Reservation, EngineError> {
        validate_guest(&guest)?;
        let (room_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let count = guard.reservation(id).map_or(0, |r| r.guest_details.len());
        if count >= MAX_GUEST_RECORDS {
            return Err(EngineError::LimitExceeded("too many guest records"));
        }
        let event = Event::GuestAdded { id, room_id, guest };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Physical removal. Cancellation is a status change, not this.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let event = Event::ReservationDeleted { id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(reservation_id = %id, room_id = %room_id, "reservation deleted");
        Ok(room_id)
    }

    // ── Room status reconciliation ────────────────────────

    /// Recompute the room's status as of `as_of`, persisting it only when it changed.
    pub async fn reconcile(&self, room_id: Ulid, as_of: NaiveDateTime) -> Result<RoomStatus, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        let derived = derive_status(&guard, as_of);
        if derived != guard.status {
            let event = Event::RoomStatusReconciled {
                id: room_id,
                status: derived,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            metrics::counter!(obs::ROOMS_RECONCILED_TOTAL).increment(1);
            tracing::info!(room_id = %room_id, status = %derived, "room status reconciled");
        }
        Ok(derived)
    }

    /// Reconcile every room. Rooms deleted mid-sweep are skipped.
    pub async fn reconcile_all(&self, as_of: NaiveDateTime) -> Result<Vec<(Ulid, RoomStatus)>, EngineError> {
        let mut ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        ids.sort();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.reconcile(id, as_of).await {
                Ok(status) => out.push((id, status)),
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    // ── WAL maintenance ───────────────────────────────────

    /// Rewrite the WAL as the minimal event set reproducing current state.
    /// The room set is locked and every room stays read-locked until the
    /// rewrite lands, so no room or reservation write can fall between the
    /// snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let room_set = self.room_set.lock().await;
        let mut rooms: Vec<_> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        rooms.sort_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(rooms.len());
        for (_, rs) in rooms {
            guards.push(rs.read_owned().await);
        }
        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::RoomCreated {
                id: guard.id,
                name: guard.name.clone(),
                rate: guard.rate,
                status: guard.status,
            });
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        drop(room_set);
        if result.is_ok() {
            tracing::info!("WAL compacted");
        }
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
