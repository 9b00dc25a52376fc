//! The RPC boundary between a client tab and the reservation backend.

mod http;
mod local;

pub use http::HttpBackend;
pub use local::LocalBackend;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};

use crate::auth::Login;
use crate::error::Result;
use crate::model::*;

/// A booking request as the workflow hands it to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub room_id: RoomId,
    pub requester_id: UserId,
    pub requester_name: String,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub purpose: String,
}

/// Every call except `login` carries the session's bearer token.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn login(&self, username: &str, secret: &str) -> Result<Login>;
    async fn logout(&self, token: &str) -> Result<()>;
    async fn me(&self, token: &str) -> Result<Identity>;
    async fn refresh(&self, token: &str) -> Result<Login>;

    async fn buildings(&self, token: &str) -> Result<Vec<Building>>;
    async fn rooms(&self, token: &str, filter: &RoomFilter) -> Result<Vec<Room>>;
    async fn room(&self, token: &str, id: &RoomId) -> Result<Room>;
    async fn available_rooms(&self, token: &str, date: NaiveDate, filter: &RoomFilter) -> Result<Vec<Room>>;

    async fn reservations(&self, token: &str, filter: &ReservationFilter) -> Result<Vec<Reservation>>;
    async fn reservation(&self, token: &str, id: ReservationId) -> Result<Reservation>;
    async fn create_reservation(&self, token: &str, request: &ReservationRequest) -> Result<Reservation>;
    async fn update_status(
        &self,
        token: &str,
        id: ReservationId,
        status: ReservationStatus,
        note: Option<String>,
    ) -> Result<Reservation>;
    async fn delete_reservation(&self, token: &str, id: ReservationId) -> Result<()>;

    async fn status_history(&self, token: &str, id: Option<ReservationId>) -> Result<Vec<StatusChange>>;
    async fn append_status_note(&self, token: &str, change: &StatusChange) -> Result<StatusChange>;
    async fn report(&self, token: &str, filter: &ReservationFilter) -> Result<Vec<ReportRow>>;
}
