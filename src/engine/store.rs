use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::*;

/// One room plus every reservation on record for it, bucketed by date.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Each day's reservations sorted by start time.
    pub days: BTreeMap<NaiveDate, Vec<Reservation>>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            days: BTreeMap::new(),
        }
    }

    /// Reservations on `date`, any status, sorted by start.
    pub fn on(&self, date: NaiveDate) -> &[Reservation] {
        self.days.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn reservation_count(&self) -> usize {
        self.days.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.days.values().flatten()
    }

    /// Insert maintaining start-time order within the day.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let day = self.days.entry(reservation.date).or_default();
        let start = reservation.start;
        let pos = day.partition_point(|r| r.start <= start);
        day.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, date: NaiveDate, id: ReservationId) -> Option<Reservation> {
        let day = self.days.get_mut(&date)?;
        let pos = day.iter().position(|r| r.id == id)?;
        let removed = day.remove(pos);
        if day.is_empty() {
            self.days.remove(&date);
        }
        Some(removed)
    }

    pub fn get(&self, date: NaiveDate, id: ReservationId) -> Option<&Reservation> {
        self.on(date).iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, date: NaiveDate, id: ReservationId) -> Option<&mut Reservation> {
        self.days.get_mut(&date)?.iter_mut().find(|r| r.id == id)
    }

    /// Reservations on `date` whose interval overlaps `query`.
    /// Stops scanning at the first reservation starting at or after `query.end`.
    pub fn overlapping(&self, date: NaiveDate, query: Span) -> impl Iterator<Item = &Reservation> {
        let day = self.on(date);
        let right_bound = day.partition_point(|r| r.span().start < query.end);
        day[..right_bound]
            .iter()
            .filter(move |r| r.span().end > query.start)
    }
}
