mod availability;
mod conflict;
mod error;
pub mod interval;
mod lifecycle;
pub mod nights;
mod occupancy;
mod queries;

pub use availability::unavailable_dates;
pub use conflict::{find_conflict, stays_conflict};
pub use error::EngineError;
pub use lifecycle::{PaymentRecord, ReservationRequest};
pub use occupancy::derive_status;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notice, NoticeKind, NotificationDispatcher};
use crate::payment::PaymentGateway;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Blocks for one append, drains whatever else is already
/// queued, then commits the whole batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // commit what we have before compaction sees the file
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush failed: {e}");
        }
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-buffered bytes don't leak into the next batch.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = wal.compact(&events);
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// Applies one event to a room already locked by the caller.
/// Room creation and deletion happen at the map level and are no-ops here.
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { name, rate, status, .. } => {
            rs.name = name.clone();
            rs.rate = *rate;
            rs.status = *status;
        }
        Event::RoomStatusReconciled { status, .. } => rs.status = *status,
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, rs.id);
            rs.insert_reservation(reservation.clone());
        }
        Event::GuestAdded { id, guest, .. } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.guest_details.push(guest.clone());
            }
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.status = *status;
            }
        }
        Event::PaymentRecorded {
            id,
            payment_status,
            discount_amount,
            discount_percentage,
            final_amount,
            ..
        } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.payment_status = *payment_status;
                r.discount_amount = *discount_amount;
                r.discount_percentage = *discount_percentage;
                r.final_amount = *final_amount;
            }
        }
        Event::PaymentNotified {
            id,
            payment_status,
            status,
            amount_paid,
            payment_reference,
            ..
        } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.payment_status = *payment_status;
                r.status = *status;
                r.amount_paid = *amount_paid;
                r.payment_reference = payment_reference.clone();
            }
        }
        Event::ReservationDeleted { id, .. } => {
            rs.remove_reservation(*id);
            index.remove(id);
        }
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
    }
}

/// Room an event belongs to, for everything except room creation/deletion.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomUpdated { id, .. } | Event::RoomStatusReconciled { id, .. } => Some(*id),
        Event::ReservationCreated { reservation } => Some(reservation.room_id),
        Event::GuestAdded { room_id, .. }
        | Event::ReservationStatusChanged { room_id, .. }
        | Event::PaymentRecorded { room_id, .. }
        | Event::PaymentNotified { room_id, .. }
        | Event::ReservationDeleted { room_id, .. } => Some(*room_id),
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => None,
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedRoomState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notifier: Arc<NotificationDispatcher>,
    /// Reverse lookup: reservation id → room id.
    pub(super) reservation_to_room: DashMap<Ulid, Ulid>,
    pub(super) gateway: PaymentGateway,
    /// Held by room create/delete and by compaction, so the set of rooms
    /// cannot change under a WAL snapshot. Taken before any room lock.
    pub(super) room_set: Mutex<()>,
}

impl Engine {
    /// Replays the WAL at `wal_path` and starts the group-commit writer.
    pub fn new(
        wal_path: PathBuf,
        notifier: Arc<NotificationDispatcher>,
        gateway: PaymentGateway,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let reservation_to_room = DashMap::new();
        let mut rooms: HashMap<Ulid, RoomState> = HashMap::new();
        for event in &events {
            match event {
                Event::RoomCreated { id, name, rate, status } => {
                    rooms.insert(*id, RoomState::new(*id, name.clone(), *rate, *status));
                }
                Event::RoomDeleted { id } => {
                    if let Some(rs) = rooms.remove(id) {
                        for r in &rs.reservations {
                            reservation_to_room.remove(&r.id);
                        }
                    }
                }
                other => {
                    if let Some(rs) = event_room_id(other).and_then(|id| rooms.get_mut(&id)) {
                        apply_to_room(rs, other, &reservation_to_room);
                    }
                }
            }
        }
        tracing::debug!(events = events.len(), rooms = rooms.len(), "WAL replayed");

        let state = DashMap::new();
        for (id, rs) in rooms {
            state.insert(id, Arc::new(RwLock::new(rs)));
        }

        Ok(Self {
            state,
            wal_tx,
            notifier,
            reservation_to_room,
            gateway,
            room_set: Mutex::new(()),
        })
    }

    pub fn gateway(&self) -> &PaymentGateway {
        &self.gateway
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_room.get(reservation_id).map(|e| *e.value())
    }

    /// WAL append, then apply. Caller holds the room's write lock throughout.
    pub(super) async fn persist_and_apply(&self, rs: &mut RoomState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.reservation_to_room);
        Ok(())
    }

    /// Reservation → room lookup, then the room's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .get_room_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        // deleted while we waited for the lock
        if guard.reservation(*reservation_id).is_none() {
            return Err(EngineError::NotFound(*reservation_id));
        }
        Ok((room_id, guard))
    }

    /// Queue a notice. Call only after the room lock is released.
    pub(super) fn notify(&self, kind: NoticeKind, reservation: Reservation, room: RoomInfo) {
        self.notifier.dispatch(Notice {
            kind,
            reservation,
            room,
        });
    }
}
