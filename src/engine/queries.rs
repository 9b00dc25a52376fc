use chrono::{NaiveDate, NaiveTime};

use crate::error::{Error, Result};
use crate::model::*;

use super::availability::{date_range, day_is_free, free_windows, slot_is_free};
use super::{Engine, SharedRoomState};

impl Engine {
    /// Clone out the room handles so no DashMap guard is held across an await.
    fn room_states(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    fn room_state(&self, id: &RoomId) -> Result<SharedRoomState> {
        self.get_room_state(id)
            .ok_or_else(|| Error::not_found("room", id))
    }

    pub(super) async fn rooms_snapshot(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for rs in self.room_states() {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }

    // ── Catalog ──────────────────────────────────────────────────

    pub fn list_buildings(&self) -> Vec<Building> {
        let mut buildings: Vec<Building> = self.buildings.iter().map(|e| e.value().clone()).collect();
        buildings.sort_by(|a, b| a.name.cmp(&b.name));
        buildings
    }

    /// Rooms matching `filter`, ordered by room id.
    pub async fn list_rooms(&self, filter: &RoomFilter) -> Vec<Room> {
        let mut rooms = self.rooms_snapshot().await;
        rooms.retain(|r| filter.matches(r));
        rooms
    }

    pub async fn get_room(&self, id: &RoomId) -> Result<Room> {
        Ok(self.room_state(id)?.read().await.room.clone())
    }

    // ── Reservations ─────────────────────────────────────────────

    /// Reservations matching `filter`, ordered by (date, start, id).
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let states = match &filter.room_id {
            Some(id) => self.get_room_state(id).into_iter().collect(),
            None => self.room_states(),
        };
        let mut out = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            match filter.date {
                Some(date) => out.extend(guard.on(date).iter().filter(|r| filter.matches(r)).cloned()),
                None => out.extend(guard.iter().filter(|r| filter.matches(r)).cloned()),
            }
        }
        out.sort_by(|a, b| (a.date, a.start, a.id).cmp(&(b.date, b.start, b.id)));
        out
    }

    pub async fn get_reservation(&self, id: ReservationId) -> Result<Reservation> {
        let (room_id, date) = self
            .reservation_index
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::not_found("reservation", id))?;
        let rs = self.room_state(&room_id)?;
        let guard = rs.read().await;
        guard
            .get(date, id)
            .cloned()
            .ok_or_else(|| Error::not_found("reservation", id))
    }

    /// Audit trail, oldest first. With an id, only that reservation's entries.
    pub fn status_history(&self, id: Option<ReservationId>) -> Result<Vec<StatusChange>> {
        let mut changes: Vec<StatusChange> = match id {
            Some(id) => {
                if !self.reservation_index.contains_key(&id) && !self.audit.contains_key(&id) {
                    return Err(Error::not_found("reservation", id));
                }
                self.audit.get(&id).map(|e| e.value().clone()).unwrap_or_default()
            }
            None => self.audit.iter().flat_map(|e| e.value().clone()).collect(),
        };
        changes.sort_by_key(|c| c.created_at);
        Ok(changes)
    }

    /// Reporting view: reservations joined with their room's location.
    pub async fn report(&self, filter: &ReservationFilter) -> Vec<ReportRow> {
        let mut rows = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            if filter.room_id.as_ref().is_some_and(|id| *id != guard.room.id) {
                continue;
            }
            rows.extend(
                guard
                    .iter()
                    .filter(|r| filter.matches(r))
                    .map(|r| ReportRow::new(&guard.room, r)),
            );
        }
        rows.sort_by(|a, b| {
            (a.date, a.start, &a.room_id, a.reservation_id).cmp(&(b.date, b.start, &b.room_id, b.reservation_id))
        });
        rows
    }

    // ── Availability ─────────────────────────────────────────────

    pub async fn is_available(
        &self,
        room_id: &RoomId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<bool> {
        let span = Span::from_times(start, end)?;
        let rs = self.room_state(room_id)?;
        let guard = rs.read().await;
        Ok(slot_is_free(&guard.room, guard.overlapping(date, span), span))
    }

    /// Whole-day listing: rooms matching `filter` with no blocking reservation on `date`.
    pub async fn available_rooms(&self, date: NaiveDate, filter: &RoomFilter) -> Vec<Room> {
        let mut rooms = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            if filter.matches(&guard.room) && day_is_free(&guard.room, guard.on(date)) {
                rooms.push(guard.room.clone());
            }
        }
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }

    pub async fn free_slots(&self, room_id: &RoomId, date: NaiveDate, window: Option<Span>) -> Result<Vec<Span>> {
        let rs = self.room_state(room_id)?;
        let guard = rs.read().await;
        Ok(free_windows(&guard.room, guard.on(date), window.unwrap_or_else(Span::whole_day)))
    }

    pub async fn calendar(
        &self,
        room_id: &RoomId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, bool)>> {
        let days = date_range(from, to)?;
        let rs = self.room_state(room_id)?;
        let guard = rs.read().await;
        Ok(days
            .into_iter()
            .map(|date| (date, day_is_free(&guard.room, guard.on(date))))
            .collect())
    }
}
