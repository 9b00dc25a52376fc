use crate::backend::ReservationRequest;
use crate::engine::Snapshot;
use crate::error::{Error, Result};
use crate::model::*;
use crate::session::{Session, Tab};

/// A booking form as submitted, fields still unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub room_id: String,
    pub requester_id: String,
    pub date: String,
    pub start: String,
    pub end: String,
    pub purpose: String,
}

async fn require_session(tab: &Tab) -> Result<Session> {
    tab.current_session()
        .await
        .ok_or_else(|| Error::Unauthorized("login required".into()))
}

/// Invalidate the tab's session when the backend rejected its token.
async fn checked<T>(tab: &Tab, result: Result<T>) -> Result<T> {
    if let Err(e) = &result
        && e.is_unauthorized()
    {
        tab.invalidate().await;
    }
    result
}

/// Submit a booking from `tab`: validate, check availability against the
/// backend's view of the room and date, create, then record it in the
/// tab's history. Nothing is written when any step before create fails.
pub async fn submit(tab: &Tab, request: SubmitRequest) -> Result<Reservation> {
    let session = require_session(tab).await?;
    if session.identity.id.0 != request.requester_id {
        return Err(Error::Unauthorized(format!(
            "signed in as {}, cannot book for {}",
            session.identity.id, request.requester_id
        )));
    }
    if request.purpose.trim().is_empty() {
        return Err(Error::Validation("purpose is required".into()));
    }
    if request.room_id.trim().is_empty() {
        return Err(Error::Validation("room id is required".into()));
    }
    let (date, start, end) = parse_slot(&request.date, &request.start, &request.end)?;
    let room_id = RoomId(request.room_id);
    let backend = tab.backend();

    let room = checked(tab, backend.room(&session.token, &room_id).await).await?;
    let same_day = checked(
        tab,
        backend
            .reservations(&session.token, &ReservationFilter::for_room_on(room_id.clone(), date))
            .await,
    )
    .await?;
    let snapshot = Snapshot::new(vec![room], same_day);
    if !snapshot.is_available(&room_id, date, start, end)? {
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        tracing::info!(room = %room_id, %date, "submission rejected: slot not available");
        return Err(Error::Conflict(format!(
            "room {room_id} is not available on {} {}-{}",
            format_date(date),
            format_time(start),
            format_time(end)
        )));
    }

    let created = checked(
        tab,
        backend
            .create_reservation(
                &session.token,
                &ReservationRequest {
                    room_id,
                    requester_id: session.identity.id.clone(),
                    requester_name: session.identity.name.clone(),
                    date,
                    start,
                    end,
                    purpose: request.purpose,
                },
            )
            .await,
    )
    .await?;
    tab.record_created(&created).await;
    tracing::info!(reservation = %created.id, room = %created.room_id, "booking submitted");
    Ok(created)
}

/// Move a reservation to `status` on behalf of the tab's session.
pub async fn transition(
    tab: &Tab,
    id: ReservationId,
    status: ReservationStatus,
    note: Option<String>,
) -> Result<Reservation> {
    let session = require_session(tab).await?;
    checked(tab, tab.backend().update_status(&session.token, id, status, note).await).await
}
