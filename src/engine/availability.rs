use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};

use crate::error::{Error, Result};
use crate::limits::MAX_CALENDAR_DAYS;
use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────
//
// Everything here is pure: callers hand in one room and the reservations
// already loaded for it on one date. The engine calls these under its room
// lock; clients call them through `Snapshot` over data fetched from a backend.

/// First reservation that holds the slot: status pending/approved and an
/// interval overlapping `span`.
pub fn blocking_overlap<'a, I>(same_day: I, span: Span) -> Option<&'a Reservation>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    same_day
        .into_iter()
        .find(|r| r.status.blocks() && r.span().overlaps(&span))
}

/// Maintenance is a hard block; `in-use` is advisory and ignored.
pub fn slot_is_free<'a, I>(room: &Room, same_day: I, span: Span) -> bool
where
    I: IntoIterator<Item = &'a Reservation>,
{
    room.status != RoomStatus::Maintenance && blocking_overlap(same_day, span).is_none()
}

/// Whole-day granularity used by the multi-room listing: any blocking
/// reservation that day makes the room unavailable.
pub fn day_is_free<'a, I>(room: &Room, same_day: I) -> bool
where
    I: IntoIterator<Item = &'a Reservation>,
{
    slot_is_free(room, same_day, Span::whole_day())
}

/// Open sub-ranges of `window` not held by any blocking reservation.
pub fn free_windows<'a, I>(room: &Room, same_day: I, window: Span) -> Vec<Span>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    if room.status == RoomStatus::Maintenance {
        return Vec::new();
    }
    let mut busy: Vec<Span> = same_day
        .into_iter()
        .filter(|r| r.status.blocks())
        .map(Reservation::span)
        .filter(|s| s.overlaps(&window))
        .map(|s| Span::new(s.start.max(window.start), s.end.min(window.end)))
        .collect();
    busy.sort_by_key(|s| s.start);
    subtract_intervals(&[window], &merge_overlapping(&busy))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}

/// Inclusive date range for calendar queries, bounded by `MAX_CALENDAR_DAYS`.
pub(crate) fn date_range(from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDate>> {
    if from > to {
        return Err(Error::Validation(format!(
            "range start {} is after end {}",
            format_date(from),
            format_date(to)
        )));
    }
    if (to - from).num_days() + 1 > MAX_CALENDAR_DAYS {
        return Err(Error::limit("calendar range too wide"));
    }
    Ok(from.iter_days().take_while(|d| *d <= to).collect())
}

/// Read-only view over a catalog and a set of reservations, as loaded by a
/// client from the backend.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    rooms: BTreeMap<RoomId, Room>,
    reservations: Vec<Reservation>,
}

impl Snapshot {
    pub fn new(
        rooms: impl IntoIterator<Item = Room>,
        reservations: impl IntoIterator<Item = Reservation>,
    ) -> Self {
        Self {
            rooms: rooms.into_iter().map(|r| (r.id.clone(), r)).collect(),
            reservations: reservations.into_iter().collect(),
        }
    }

    pub fn room(&self, id: &RoomId) -> Result<&Room> {
        self.rooms.get(id).ok_or_else(|| Error::not_found("room", id))
    }

    fn same_day<'a>(
        &'a self,
        room_id: &'a RoomId,
        date: NaiveDate,
    ) -> impl Iterator<Item = &'a Reservation> + 'a {
        self.reservations
            .iter()
            .filter(move |r| r.room_id == *room_id && r.date == date)
    }

    pub fn is_available(
        &self,
        room_id: &RoomId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<bool> {
        let span = Span::from_times(start, end)?;
        let room = self.room(room_id)?;
        Ok(slot_is_free(room, self.same_day(room_id, date), span))
    }

    /// Rooms matching `filter` that are free for the whole of `date`, by room id.
    pub fn available_rooms(&self, date: NaiveDate, filter: &RoomFilter) -> Vec<Room> {
        self.rooms
            .values()
            .filter(|room| filter.matches(room))
            .filter(|room| day_is_free(room, self.same_day(&room.id, date)))
            .cloned()
            .collect()
    }

    pub fn free_slots(&self, room_id: &RoomId, date: NaiveDate, window: Option<Span>) -> Result<Vec<Span>> {
        let room = self.room(room_id)?;
        Ok(free_windows(room, self.same_day(room_id, date), window.unwrap_or_else(Span::whole_day)))
    }

    pub fn calendar(&self, room_id: &RoomId, from: NaiveDate, to: NaiveDate) -> Result<Vec<(NaiveDate, bool)>> {
        let room = self.room(room_id)?;
        Ok(date_range(from, to)?
            .into_iter()
            .map(|date| (date, day_is_free(room, self.same_day(room_id, date))))
            .collect())
    }
}
