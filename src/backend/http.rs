use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::auth::Login;
use crate::error::{Error, Result};
use crate::model::*;
use crate::wire::*;

use super::{Backend, ReservationRequest};

/// REST client for the reservation backend.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Store(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get(&self, token: &str, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(token)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = Self::dispatch(request).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Store(format!("malformed response: {e}")))
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        Self::dispatch(request).await.map(|_| ())
    }

    async fn dispatch(request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Store("backend request timed out".into())
            } else {
                Error::Store(format!("backend unreachable: {e}"))
            }
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody { code, error }) => Error::from_code(&code, error),
            Err(_) if status == StatusCode::UNAUTHORIZED => Error::Unauthorized(body),
            Err(_) => Error::Store(format!("backend answered {status}: {body}")),
        };
        tracing::debug!(%status, code = err.code(), "backend call failed");
        Err(err)
    }

    async fn send_reservation(&self, request: RequestBuilder) -> Result<Reservation> {
        let record: ReservationRecord = self.send(request).await?;
        record.normalize().map_err(malformed)
    }
}

fn malformed(e: Error) -> Error {
    Error::Store(format!("malformed record from backend: {}", e.message()))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn login(&self, username: &str, secret: &str) -> Result<Login> {
        let body = LoginBody {
            username: username.to_string(),
            password: secret.to_string(),
        };
        let response: LoginResponse = self
            .send(self.client.post(self.url("/auth/login")).json(&body))
            .await?;
        Ok(Login {
            token: response.token,
            identity: response.user,
        })
    }

    async fn logout(&self, token: &str) -> Result<()> {
        self.send_empty(self.client.post(self.url("/auth/logout")).bearer_auth(token))
            .await
    }

    async fn me(&self, token: &str) -> Result<Identity> {
        self.send(self.get(token, "/auth/me")).await
    }

    async fn refresh(&self, token: &str) -> Result<Login> {
        let response: LoginResponse = self
            .send(self.client.post(self.url("/auth/refresh")).bearer_auth(token))
            .await?;
        Ok(Login {
            token: response.token,
            identity: response.user,
        })
    }

    async fn buildings(&self, token: &str) -> Result<Vec<Building>> {
        self.send(self.get(token, "/gedung")).await
    }

    async fn rooms(&self, token: &str, filter: &RoomFilter) -> Result<Vec<Room>> {
        self.send(self.get(token, "/ruangan").query(&RoomQuery::from(filter)))
            .await
    }

    async fn room(&self, token: &str, id: &RoomId) -> Result<Room> {
        self.send(self.get(token, &format!("/ruangan/{id}"))).await
    }

    async fn available_rooms(&self, token: &str, date: NaiveDate, filter: &RoomFilter) -> Result<Vec<Room>> {
        let query = RoomQuery {
            tanggal: Some(format_date(date)),
            ..RoomQuery::from(filter)
        };
        self.send(self.get(token, "/ruangan/tersedia").query(&query)).await
    }

    async fn reservations(&self, token: &str, filter: &ReservationFilter) -> Result<Vec<Reservation>> {
        let records: Vec<ReservationRecord> = self
            .send(self.get(token, "/peminjaman").query(&ReservationQuery::from(filter)))
            .await?;
        records
            .into_iter()
            .map(|r| r.normalize().map_err(malformed))
            .collect()
    }

    async fn reservation(&self, token: &str, id: ReservationId) -> Result<Reservation> {
        self.send_reservation(self.get(token, &format!("/peminjaman/{id}")))
            .await
    }

    async fn create_reservation(&self, token: &str, request: &ReservationRequest) -> Result<Reservation> {
        let body = CreateReservationBody {
            id_user: request.requester_id.0.clone(),
            id_ruangan: request.room_id.0.clone(),
            tanggal: format_date(request.date),
            jam_mulai: format_time(request.start),
            jam_selesai: format_time(request.end),
            nama_pengguna: request.requester_name.clone(),
            keperluan: request.purpose.clone(),
        };
        self.send_reservation(
            self.client
                .post(self.url("/peminjaman"))
                .bearer_auth(token)
                .json(&body),
        )
        .await
    }

    async fn update_status(
        &self,
        token: &str,
        id: ReservationId,
        status: ReservationStatus,
        note: Option<String>,
    ) -> Result<Reservation> {
        let body = StatusUpdateBody {
            status: backend_status(status).to_string(),
            keterangan: note,
        };
        self.send_reservation(
            self.client
                .put(self.url(&format!("/peminjaman/{id}/status")))
                .bearer_auth(token)
                .json(&body),
        )
        .await
    }

    async fn delete_reservation(&self, token: &str, id: ReservationId) -> Result<()> {
        self.send_empty(
            self.client
                .delete(self.url(&format!("/peminjaman/{id}")))
                .bearer_auth(token),
        )
        .await
    }

    async fn status_history(&self, token: &str, id: Option<ReservationId>) -> Result<Vec<StatusChange>> {
        let path = match id {
            Some(id) => format!("/riwayat-peminjaman/{id}"),
            None => "/riwayat-peminjaman".to_string(),
        };
        let changes: Vec<ApiStatusChange> = self.send(self.get(token, &path)).await?;
        changes
            .into_iter()
            .map(|c| c.into_change().map_err(malformed))
            .collect()
    }

    async fn append_status_note(&self, token: &str, change: &StatusChange) -> Result<StatusChange> {
        let stored: ApiStatusChange = self
            .send(
                self.client
                    .post(self.url("/riwayat-peminjaman"))
                    .bearer_auth(token)
                    .json(&ApiStatusChange::from(change)),
            )
            .await?;
        stored.into_change().map_err(malformed)
    }

    async fn report(&self, token: &str, filter: &ReservationFilter) -> Result<Vec<ReportRow>> {
        self.send(self.get(token, "/laporan-peminjaman").query(&ReservationQuery::from(filter)))
            .await
    }
}
