use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::{NaiveDateTime, Utc};
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_draft, validate_note, validate_room};
use super::{Engine, RoomState, WalCommand};

impl Engine {
    // ── Catalog ──────────────────────────────────────────────────

    pub async fn upsert_building(&self, building: Building) -> Result<()> {
        if building.name.trim().is_empty() || building.id.trim().is_empty() {
            return Err(Error::Validation("building id and name are required".into()));
        }
        if building.name.len() > MAX_NAME_LEN {
            return Err(Error::limit("building name too long"));
        }
        if building.zones.len() > MAX_ZONES_PER_BUILDING {
            return Err(Error::limit("too many zones"));
        }
        let _catalog = self.catalog_lock.lock().await;

        // Shrinking the zone set must not orphan an existing room.
        for room in self.rooms_snapshot().await {
            if room.building == building.name && !building.has_zone(&room.zone) {
                return Err(Error::Validation(format!(
                    "zone {} is still used by room {}",
                    room.zone, room.id
                )));
            }
        }

        let event = Event::BuildingUpserted {
            building: building.clone(),
        };
        self.wal_append(&event).await?;
        tracing::info!(building = %building.name, zones = building.zones.len(), "building saved");
        self.buildings.insert(building.name.clone(), building);
        Ok(())
    }

    fn check_placement(&self, room: &Room) -> Result<()> {
        let building = self
            .buildings
            .get(&room.building)
            .ok_or_else(|| Error::not_found("building", &room.building))?;
        if !building.has_zone(&room.zone) {
            return Err(Error::Validation(format!(
                "zone {} does not belong to building {}",
                room.zone, room.building
            )));
        }
        Ok(())
    }

    pub async fn create_room(&self, room: Room) -> Result<()> {
        validate_room(&room)?;
        let _catalog = self.catalog_lock.lock().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(Error::limit("too many rooms"));
        }
        if self.rooms.contains_key(&room.id) {
            return Err(Error::AlreadyExists(format!("room {}", room.id)));
        }
        self.check_placement(&room)?;

        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        tracing::info!(room = %room.id, building = %room.building, "room created");
        self.rooms
            .insert(room.id.clone(), Arc::new(RwLock::new(RoomState::new(room))));
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(self.rooms.len() as f64);
        Ok(())
    }

    /// Replace a room's attributes; its reservations are untouched.
    pub async fn update_room(&self, room: Room) -> Result<Room> {
        validate_room(&room)?;
        self.check_placement(&room)?;
        let rs = self
            .get_room_state(&room.id)
            .ok_or_else(|| Error::not_found("room", &room.id))?;
        let mut guard = rs.write().await;
        self.ensure_current(&room.id, &rs)?;
        let event = Event::RoomUpdated { room: room.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(room = %room.id, status = %room.status, "room updated");
        Ok(room)
    }

    pub async fn delete_room(&self, id: &RoomId) -> Result<()> {
        let _catalog = self.catalog_lock.lock().await;
        let rs = self
            .get_room_state(id)
            .ok_or_else(|| Error::not_found("room", id))?;
        let guard = rs.write().await;
        if guard.reservation_count() > 0 {
            return Err(Error::Conflict(format!(
                "room {id} still has {} reservations on record",
                guard.reservation_count()
            )));
        }
        let event = Event::RoomDeleted { id: id.clone() };
        self.wal_append(&event).await?;
        // Removed while the write lock is held: a waiting booking sees the room gone.
        self.rooms.remove(id);
        drop(guard);
        tracing::info!(room = %id, "room deleted");
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(self.rooms.len() as f64);
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────────

    /// Store a new `pending` reservation. The conflict check and the write
    /// happen under the room's write lock.
    pub async fn insert_reservation(&self, draft: ReservationDraft) -> Result<Reservation> {
        let span = validate_draft(&draft)?;
        let rs = self
            .get_room_state(&draft.room_id)
            .ok_or_else(|| Error::not_found("room", &draft.room_id))?;
        let mut guard = rs.write().await;
        self.ensure_current(&draft.room_id, &rs)?;
        if guard.on(draft.date).len() >= MAX_RESERVATIONS_PER_ROOM_DAY {
            return Err(Error::limit("too many reservations for this room and date"));
        }

        if let Err(e) = check_no_conflict(&guard, draft.date, span) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            tracing::info!(room = %draft.room_id, date = %draft.date, %span, "booking rejected: {e}");
            return Err(e);
        }

        let reservation = Reservation {
            id: Ulid::new(),
            room_id: draft.room_id,
            requester: draft.requester,
            date: draft.date,
            start: draft.start,
            end: draft.end,
            purpose: draft.purpose,
            status: ReservationStatus::Pending,
            created_at: Utc::now(),
            approved_at: None,
            reference: None,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        tracing::info!(
            reservation = %reservation.id,
            room = %reservation.room_id,
            requester = %reservation.requester.id,
            date = %reservation.date,
            %span,
            minutes = span.duration_minutes(),
            "reservation created"
        );
        Ok(reservation)
    }

    pub async fn update_status(
        &self,
        id: ReservationId,
        new: ReservationStatus,
        note: Option<String>,
    ) -> Result<Reservation> {
        validate_note(note.as_deref())?;
        let (date, mut guard) = self.resolve_reservation_write(id).await?;
        let current = guard
            .get(date, id)
            .ok_or_else(|| Error::not_found("reservation", id))?
            .status;
        if !current.can_transition_to(new) {
            tracing::warn!(reservation = %id, from = %current, to = %new, "status transition rejected");
            return Err(Error::invalid_transition(current, new));
        }

        let now = Utc::now();
        let (approved_at, reference) = if new == ReservationStatus::Approved {
            (Some(now), Some(self.next_reference(date)))
        } else {
            (None, None)
        };
        let event = Event::StatusChanged {
            room_id: guard.room.id.clone(),
            date,
            change: StatusChange {
                reservation_id: id,
                previous: current,
                new,
                note,
                created_at: now,
            },
            approved_at,
            reference,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(crate::observability::STATUS_TRANSITIONS_TOTAL, "to" => new.to_string())
            .increment(1);
        tracing::info!(reservation = %id, from = %current, to = %new, "reservation status changed");
        guard
            .get(date, id)
            .cloned()
            .ok_or_else(|| Error::not_found("reservation", id))
    }

    pub async fn remove_reservation(&self, id: ReservationId) -> Result<()> {
        let (date, mut guard) = self.resolve_reservation_write(id).await?;
        let event = Event::ReservationRemoved {
            id,
            room_id: guard.room.id.clone(),
            date,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(reservation = %id, "reservation removed");
        Ok(())
    }

    /// Record an externally supplied audit entry for an existing reservation.
    pub async fn append_status_note(&self, change: StatusChange) -> Result<StatusChange> {
        validate_note(change.note.as_deref())?;
        let (_, _guard) = self.resolve_reservation_write(change.reservation_id).await?;
        let event = Event::AuditAppended {
            change: change.clone(),
        };
        self.wal_append(&event).await?;
        self.audit
            .entry(change.reservation_id)
            .or_default()
            .push(change.clone());
        Ok(change)
    }

    /// Approved reservations whose end lies at or before `now`.
    pub fn collect_finished(&self, now: NaiveDateTime) -> Vec<ReservationId> {
        let mut finished = Vec::new();
        for entry in self.rooms.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                finished.extend(
                    guard
                        .days
                        .range(..=now.date())
                        .flat_map(|(_, day)| day)
                        .filter(|r| {
                            r.status == ReservationStatus::Approved && r.date.and_time(r.end) <= now
                        })
                        .map(|r| r.id),
                );
            }
        }
        finished
    }

    // ── Compaction ───────────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<()> {
        let mut events = Vec::new();

        // Holding the catalog lock and every room's read lock keeps writers out
        // until the rewritten log is in place.
        let _catalog = self.catalog_lock.lock().await;
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(states.len());
        for rs in states {
            guards.push(rs.read_owned().await);
        }
        guards.sort_by(|a, b| a.room.id.cmp(&b.room.id));

        events.push(Event::ReferenceIssued {
            seq: self.reference_seq.load(Ordering::Relaxed),
        });

        let mut buildings: Vec<Building> = self.buildings.iter().map(|e| e.value().clone()).collect();
        buildings.sort_by(|a, b| a.name.cmp(&b.name));
        events.extend(buildings.into_iter().map(|building| Event::BuildingUpserted { building }));

        for guard in &guards {
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            events.extend(guard.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }

        let mut changes: Vec<StatusChange> = self
            .audit
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        changes.sort_by_key(|c| c.created_at);
        events.extend(changes.into_iter().map(|change| Event::AuditAppended { change }));

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| Error::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| Error::Store("WAL writer dropped response".into()))??;
        drop(guards);
        tracing::info!(events = count, "WAL compacted");
        Ok(())
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
