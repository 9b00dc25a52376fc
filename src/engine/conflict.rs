use crate::error::{Error, Result};
use crate::limits::*;
use crate::model::*;

use super::availability::blocking_overlap;
use super::store::RoomState;

fn require_text(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} is required")));
    }
    if value.len() > max_len {
        return Err(Error::limit(&format!("{field} too long")));
    }
    Ok(())
}

/// Field-level checks for a new reservation. Returns its span.
pub(crate) fn validate_draft(draft: &ReservationDraft) -> Result<Span> {
    require_text("room id", &draft.room_id.0, MAX_NAME_LEN)?;
    require_text("requester id", &draft.requester.id.0, MAX_NAME_LEN)?;
    require_text("requester name", &draft.requester.name, MAX_NAME_LEN)?;
    require_text("purpose", &draft.purpose, MAX_PURPOSE_LEN)?;
    Span::from_times(draft.start, draft.end)
}

pub(crate) fn validate_note(note: Option<&str>) -> Result<()> {
    if note.is_some_and(|n| n.len() > MAX_NOTE_LEN) {
        return Err(Error::limit("note too long"));
    }
    Ok(())
}

pub(crate) fn validate_room(room: &Room) -> Result<()> {
    require_text("room id", &room.id.0, MAX_NAME_LEN)?;
    require_text("room name", &room.name, MAX_NAME_LEN)?;
    if room.floor < 1 {
        return Err(Error::Validation("floor must be at least 1".into()));
    }
    if room.capacity == 0 {
        return Err(Error::Validation("capacity must be positive".into()));
    }
    if room.amenities.len() > MAX_AMENITIES_PER_ROOM {
        return Err(Error::limit("too many amenities"));
    }
    Ok(())
}

/// Reject a slot held by a pending/approved reservation or a room under maintenance.
pub(crate) fn check_no_conflict(rs: &RoomState, date: chrono::NaiveDate, span: Span) -> Result<()> {
    if rs.room.status == RoomStatus::Maintenance {
        return Err(Error::Conflict(format!("room {} is under maintenance", rs.room.id)));
    }
    if let Some(existing) = blocking_overlap(rs.overlapping(date, span), span) {
        return Err(Error::Conflict(format!(
            "room {} is already reserved {} on {} ({})",
            rs.room.id,
            existing.span(),
            format_date(date),
            existing.id
        )));
    }
    Ok(())
}
