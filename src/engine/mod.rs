mod availability;
mod conflict;
mod mutations;
mod queries;
mod store;

pub use availability::{
    blocking_overlap, day_is_free, free_windows, merge_overlapping, slot_is_free, subtract_intervals,
    Snapshot,
};
pub use store::RoomState;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::error::{Error, Result};
use crate::model::*;
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

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, write the
/// batch with a single fsync, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so buffered bytes never bleed into the next batch.
    let flushed = wal.flush_sync();
    let result = appended.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Sequence number of a `PJ/<yyyymmdd>/<seq>` reference.
fn parse_reference_seq(reference: &str) -> Option<u32> {
    reference.rsplit('/').next()?.parse().ok()
}

/// Room catalog, reservation store and availability engine in one process.
///
/// Each room's reservations live behind that room's `RwLock`; a booking checks
/// for conflicts and appends to the WAL while holding the write lock, so two
/// overlapping submissions can never both be stored.
pub struct Engine {
    pub(super) rooms: DashMap<RoomId, SharedRoomState>,
    /// Keyed by building name, which is what rooms reference.
    pub(super) buildings: DashMap<String, Building>,
    /// Reverse lookup: reservation id → (room id, date).
    pub(super) reservation_index: DashMap<ReservationId, (RoomId, NaiveDate)>,
    pub(super) audit: DashMap<ReservationId, Vec<StatusChange>>,
    pub(super) reference_seq: AtomicU32,
    /// Serializes catalog writes (buildings, room create/delete).
    pub(super) catalog_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::open_with_replay(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            buildings: DashMap::new(),
            reservation_index: DashMap::new(),
            audit: DashMap::new(),
            reference_seq: AtomicU32::new(0),
            catalog_lock: Mutex::new(()),
            wal_tx,
        };

        let replayed = events.len();
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            path = %wal_path.display(),
            events = replayed,
            rooms = engine.rooms.len(),
            reservations = engine.reservation_index.len(),
            "engine state restored"
        );
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(engine.rooms.len() as f64);
        Ok(engine)
    }

    // We are the sole owner of every Arc during replay, so try_write always
    // succeeds. Never block here: this runs inside the async runtime.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::BuildingUpserted { building } => {
                self.buildings.insert(building.name.clone(), building.clone());
            }
            Event::RoomCreated { room } => {
                self.rooms
                    .insert(room.id.clone(), Arc::new(RwLock::new(RoomState::new(room.clone()))));
            }
            Event::RoomDeleted { id } => {
                self.rooms.remove(id);
            }
            Event::AuditAppended { change } => {
                self.audit.entry(change.reservation_id).or_default().push(change.clone());
            }
            Event::ReferenceIssued { seq } => {
                self.reference_seq.fetch_max(*seq, Ordering::Relaxed);
            }
            other => {
                if let Some(room_id) = event_room_id(other)
                    && let Some(rs) = self.get_room_state(room_id)
                {
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    self.apply_to_room(&mut guard, other);
                }
            }
        }
    }

    /// Apply a room-scoped event (caller holds the room's write lock).
    pub(super) fn apply_to_room(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::RoomUpdated { room } => {
                rs.room = room.clone();
            }
            Event::ReservationCreated { reservation } => {
                self.reservation_index
                    .insert(reservation.id, (reservation.room_id.clone(), reservation.date));
                if let Some(seq) = reservation.reference.as_deref().and_then(parse_reference_seq) {
                    self.reference_seq.fetch_max(seq, Ordering::Relaxed);
                }
                rs.insert_reservation(reservation.clone());
            }
            Event::StatusChanged {
                date,
                change,
                approved_at,
                reference,
                ..
            } => {
                if let Some(r) = rs.get_mut(*date, change.reservation_id) {
                    r.status = change.new;
                    if approved_at.is_some() {
                        r.approved_at = *approved_at;
                    }
                    if reference.is_some() {
                        r.reference = reference.clone();
                    }
                }
                if let Some(seq) = reference.as_deref().and_then(parse_reference_seq) {
                    self.reference_seq.fetch_max(seq, Ordering::Relaxed);
                }
                self.audit.entry(change.reservation_id).or_default().push(change.clone());
            }
            Event::ReservationRemoved { id, date, .. } => {
                rs.remove_reservation(*date, *id);
                self.reservation_index.remove(id);
            }
            Event::BuildingUpserted { .. }
            | Event::RoomCreated { .. }
            | Event::RoomDeleted { .. }
            | Event::AuditAppended { .. }
            | Event::ReferenceIssued { .. } => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| Error::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| Error::Store("WAL writer dropped response".into()))?
            .map_err(Error::from)
    }

    /// WAL-append then apply, with the room's write lock held by the caller.
    pub(super) async fn persist_and_apply(&self, rs: &mut RoomState, event: &Event) -> Result<()> {
        self.wal_append(event).await?;
        self.apply_to_room(rs, event);
        Ok(())
    }

    pub fn get_room_state(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Fails unless `rs` is still the state registered under `id`. A room
    /// deleted and recreated under the same id gets a fresh state, so a
    /// writer that waited on the old lock must not proceed.
    pub(super) fn ensure_current(&self, id: &RoomId, rs: &SharedRoomState) -> Result<()> {
        match self.rooms.get(id) {
            Some(current) if Arc::ptr_eq(current.value(), rs) => Ok(()),
            _ => Err(Error::not_found("room", id)),
        }
    }

    /// Lookup reservation → room, acquire that room's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: ReservationId,
    ) -> Result<(NaiveDate, tokio::sync::OwnedRwLockWriteGuard<RoomState>)> {
        let (room_id, date) = self
            .reservation_index
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::not_found("reservation", id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or_else(|| Error::not_found("room", &room_id))?;
        Ok((date, rs.write_owned().await))
    }

    pub(super) fn next_reference(&self, date: NaiveDate) -> String {
        let seq = self.reference_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("PJ/{}/{seq:04}", date.format("%Y%m%d"))
    }
}

/// The room a room-scoped event belongs to.
fn event_room_id(event: &Event) -> Option<&RoomId> {
    match event {
        Event::RoomUpdated { room } => Some(&room.id),
        Event::ReservationCreated { reservation } => Some(&reservation.room_id),
        Event::StatusChanged { room_id, .. } | Event::ReservationRemoved { room_id, .. } => Some(room_id),
        Event::BuildingUpserted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::AuditAppended { .. }
        | Event::ReferenceIssued { .. } => None,
    }
}
