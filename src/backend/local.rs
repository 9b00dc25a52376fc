use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::auth::{Directory, Login};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::*;

use super::{Backend, ReservationRequest};

/// In-process backend: the engine plus the token directory. The HTTP server
/// answers every route through one of these.
pub struct LocalBackend {
    engine: Arc<Engine>,
    directory: Arc<Directory>,
}

impl LocalBackend {
    pub fn new(engine: Arc<Engine>, directory: Arc<Directory>) -> Self {
        Self { engine, directory }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn login(&self, username: &str, secret: &str) -> Result<Login> {
        self.directory.login(username, secret)
    }

    async fn logout(&self, token: &str) -> Result<()> {
        self.directory.logout(token);
        Ok(())
    }

    async fn me(&self, token: &str) -> Result<Identity> {
        self.directory.resolve(token)
    }

    async fn refresh(&self, token: &str) -> Result<Login> {
        self.directory.refresh(token)
    }

    async fn buildings(&self, token: &str) -> Result<Vec<Building>> {
        self.directory.resolve(token)?;
        Ok(self.engine.list_buildings())
    }

    async fn rooms(&self, token: &str, filter: &RoomFilter) -> Result<Vec<Room>> {
        self.directory.resolve(token)?;
        Ok(self.engine.list_rooms(filter).await)
    }

    async fn room(&self, token: &str, id: &RoomId) -> Result<Room> {
        self.directory.resolve(token)?;
        self.engine.get_room(id).await
    }

    async fn available_rooms(&self, token: &str, date: NaiveDate, filter: &RoomFilter) -> Result<Vec<Room>> {
        self.directory.resolve(token)?;
        Ok(self.engine.available_rooms(date, filter).await)
    }

    async fn reservations(&self, token: &str, filter: &ReservationFilter) -> Result<Vec<Reservation>> {
        self.directory.resolve(token)?;
        Ok(self.engine.list_reservations(filter).await)
    }

    async fn reservation(&self, token: &str, id: ReservationId) -> Result<Reservation> {
        self.directory.resolve(token)?;
        self.engine.get_reservation(id).await
    }

    async fn create_reservation(&self, token: &str, request: &ReservationRequest) -> Result<Reservation> {
        let identity = self.directory.resolve(token)?;
        if identity.id != request.requester_id {
            return Err(Error::Unauthorized(format!(
                "token belongs to {}, not {}",
                identity.id, request.requester_id
            )));
        }
        let requester = Identity {
            name: request.requester_name.clone(),
            ..identity
        };
        self.engine
            .insert_reservation(ReservationDraft {
                room_id: request.room_id.clone(),
                requester,
                date: request.date,
                start: request.start,
                end: request.end,
                purpose: request.purpose.clone(),
            })
            .await
    }

    async fn update_status(
        &self,
        token: &str,
        id: ReservationId,
        status: ReservationStatus,
        note: Option<String>,
    ) -> Result<Reservation> {
        self.directory.resolve(token)?;
        self.engine.update_status(id, status, note).await
    }

    async fn delete_reservation(&self, token: &str, id: ReservationId) -> Result<()> {
        self.directory.resolve(token)?;
        self.engine.remove_reservation(id).await
    }

    async fn status_history(&self, token: &str, id: Option<ReservationId>) -> Result<Vec<StatusChange>> {
        self.directory.resolve(token)?;
        self.engine.status_history(id)
    }

    async fn append_status_note(&self, token: &str, change: &StatusChange) -> Result<StatusChange> {
        self.directory.resolve(token)?;
        self.engine.append_status_note(change.clone()).await
    }

    async fn report(&self, token: &str, filter: &ReservationFilter) -> Result<Vec<ReportRow>> {
        self.directory.resolve(token)?;
        Ok(self.engine.report(filter).await)
    }
}
