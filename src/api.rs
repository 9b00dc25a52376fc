//! REST surface of the reservation backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, MatchedPath, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use tokio::net::TcpListener;

use crate::backend::{Backend, LocalBackend, ReservationRequest};
use crate::error::Error;
use crate::model::*;
use crate::observability::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};
use crate::wire::*;

type ApiResult<T> = std::result::Result<T, Error>;

#[derive(Clone)]
pub struct AppState {
    backend: Arc<LocalBackend>,
}

impl AppState {
    pub fn new(backend: Arc<LocalBackend>) -> Self {
        Self { backend }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

/// `Authorization: Bearer <token>`; the token itself is checked by the backend.
pub struct Bearer(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Bearer {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> ApiResult<Self> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or_else(|| Error::Unauthorized("missing Authorization header".into()))?
            .to_str()
            .map_err(|_| Error::Unauthorized("malformed Authorization header".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthorized("expected a Bearer token".into()))?;
        Ok(Bearer(token.to_string()))
    }
}

fn body<T>(json: std::result::Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    json.map(|Json(t)| t)
        .map_err(|e| Error::Validation(e.body_text()))
}

fn query<T>(q: std::result::Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    q.map(|Query(t)| t)
        .map_err(|e| Error::Validation(e.body_text()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/auth/refresh", post(refresh))
        .route("/gedung", get(list_buildings))
        .route("/ruangan", get(list_rooms))
        .route("/ruangan/tersedia", get(available_rooms))
        .route("/ruangan/{id}", get(get_room))
        .route("/peminjaman", post(create_reservation).get(list_reservations))
        .route("/peminjaman/{id}", get(get_reservation).delete(delete_reservation))
        .route("/peminjaman/{id}/status", put(update_status))
        .route("/riwayat-peminjaman", post(append_status_note).get(status_history))
        .route("/riwayat-peminjaman/{id}", get(status_history_for))
        .route("/laporan-peminjaman", get(report))
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".into());
    let method = req.method().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route.clone(), "status" => status).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route.clone())
        .record(start.elapsed().as_secs_f64());
    tracing::debug!(%method, route = %route, status = response.status().as_u16(), "request");
    response
}

// ── Auth ─────────────────────────────────────────────────────────

async fn login(
    State(s): State<AppState>,
    payload: std::result::Result<Json<LoginBody>, JsonRejection>,
) -> ApiResult<Json<LoginResponse>> {
    let LoginBody { username, password } = body(payload)?;
    let login = s.backend.login(&username, &password).await?;
    Ok(Json(LoginResponse {
        token: login.token,
        user: login.identity,
    }))
}

async fn logout(State(s): State<AppState>, Bearer(token): Bearer) -> ApiResult<StatusCode> {
    s.backend.logout(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(State(s): State<AppState>, Bearer(token): Bearer) -> ApiResult<Json<Identity>> {
    Ok(Json(s.backend.me(&token).await?))
}

async fn refresh(State(s): State<AppState>, Bearer(token): Bearer) -> ApiResult<Json<LoginResponse>> {
    let login = s.backend.refresh(&token).await?;
    Ok(Json(LoginResponse {
        token: login.token,
        user: login.identity,
    }))
}

// ── Catalog ──────────────────────────────────────────────────────

async fn list_buildings(State(s): State<AppState>, Bearer(token): Bearer) -> ApiResult<Json<Vec<Building>>> {
    Ok(Json(s.backend.buildings(&token).await?))
}

async fn list_rooms(
    State(s): State<AppState>,
    Bearer(token): Bearer,
    q: std::result::Result<Query<RoomQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Room>>> {
    let q = query(q)?;
    Ok(Json(s.backend.rooms(&token, &q.to_filter()).await?))
}

async fn available_rooms(
    State(s): State<AppState>,
    Bearer(token): Bearer,
    q: std::result::Result<Query<RoomQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Room>>> {
    let q = query(q)?;
    let date = q
        .tanggal
        .as_deref()
        .ok_or_else(|| Error::Validation("tanggal is required".into()))
        .and_then(parse_date)?;
    Ok(Json(s.backend.available_rooms(&token, date, &q.to_filter()).await?))
}

async fn get_room(
    State(s): State<AppState>,
    Bearer(token): Bearer,
    Path(id): Path<String>,
) -> ApiResult<Json<Room>> {
    Ok(Json(s.backend.room(&token, &RoomId(id)).await?))
}

// ── Reservations ─────────────────────────────────────────────────

async fn create_reservation(
    State(s): State<AppState>,
    Bearer(token): Bearer,
    payload: std::result::Result<Json<CreateReservationBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiReservation>)> {
    let b = body(payload)?;
    let (date, start, end) = parse_slot(&b.tanggal, &b.jam_mulai, &b.jam_selesai)?;
    let request = ReservationRequest {
        room_id: RoomId(b.id_ruangan),
        requester_id: UserId(b.id_user),
        requester_name: b.nama_pengguna,
        date,
        start,
        end,
        purpose: b.keperluan,
    };
    let created = s.backend.create_reservation(&token, &request).await?;
    Ok((StatusCode::CREATED, Json(ApiReservation::from(&created))))
}

async fn list_reservations(
    State(s): State<AppState>,
    Bearer(token): Bearer,
    q: std::result::Result<Query<ReservationQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ApiReservation>>> {
    let filter = query(q)?.to_filter()?;
    let found = s.backend.reservations(&token, &filter).await?;
    Ok(Json(found.iter().map(ApiReservation::from).collect()))
}

async fn get_reservation(
    State(s): State<AppState>,
    Bearer(token): Bearer,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiReservation>> {
    let id = parse_reservation_id(&id)?;
    let r = s.backend.reservation(&token, id).await?;
    Ok(Json(ApiReservation::from(&r)))
}

async fn update_status(
    State(s): State<AppState>,
    Bearer(token): Bearer,
    Path(id): Path<String>,
    payload: std::result::Result<Json<StatusUpdateBody>, JsonRejection>,
) -> ApiResult<Json<ApiReservation>> {
    let id = parse_reservation_id(&id)?;
    let b = body(payload)?;
    let status = parse_status(&b.status)?;
    let r = s.backend.update_status(&token, id, status, b.keterangan).await?;
    Ok(Json(ApiReservation::from(&r)))
}

async fn delete_reservation(
    State(s): State<AppState>,
    Bearer(token): Bearer,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_reservation_id(&id)?;
    s.backend.delete_reservation(&token, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Audit & reporting ────────────────────────────────────────────

async fn append_status_note(
    State(s): State<AppState>,
    Bearer(token): Bearer,
    payload: std::result::Result<Json<ApiStatusChange>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiStatusChange>)> {
    let change = body(payload)?.into_change()?;
    let stored = s.backend.append_status_note(&token, &change).await?;
    Ok((StatusCode::CREATED, Json(ApiStatusChange::from(&stored))))
}

async fn status_history(
    State(s): State<AppState>,
    Bearer(token): Bearer,
) -> ApiResult<Json<Vec<ApiStatusChange>>> {
    let changes = s.backend.status_history(&token, None).await?;
    Ok(Json(changes.iter().map(ApiStatusChange::from).collect()))
}

async fn status_history_for(
    State(s): State<AppState>,
    Bearer(token): Bearer,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ApiStatusChange>>> {
    let id = parse_reservation_id(&id)?;
    let changes = s.backend.status_history(&token, Some(id)).await?;
    Ok(Json(changes.iter().map(ApiStatusChange::from).collect()))
}

async fn report(
    State(s): State<AppState>,
    Bearer(token): Bearer,
    q: std::result::Result<Query<ReservationQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ReportRow>>> {
    let filter = query(q)?.to_filter()?;
    Ok(Json(s.backend.report(&token, &filter).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Account, Directory};
    use crate::engine::Engine;
    use crate::model::fixtures::{identity, room};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app(name: &str) -> Router {
        let dir = std::env::temp_dir().join("roombook_test_api");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);

        let engine = Arc::new(Engine::new(path).unwrap());
        engine
            .upsert_building(Building {
                id: "A".into(),
                name: "Gedung A".into(),
                zones: vec!["Utara".into()],
            })
            .await
            .unwrap();
        engine.create_room(room("R1", RoomStatus::Available)).await.unwrap();
        let directory = Arc::new(Directory::new());
        directory
            .add_account(Account {
                username: "budi".into(),
                secret: "rahasia".into(),
                identity: identity("u1"),
            })
            .unwrap();
        router(AppState::new(Arc::new(LocalBackend::new(engine, directory))))
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn login(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/auth/login",
                None,
                serde_json::json!({"username": "budi", "password": "rahasia"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        read_json::<LoginResponse>(response).await.token
    }

    fn booking(start: &str, end: &str) -> serde_json::Value {
        serde_json::json!({
            "id_user": "u1", "id_ruangan": "R1", "tanggal": "2024-03-15",
            "jam_mulai": start, "jam_selesai": end,
            "nama_pengguna": "Budi", "keperluan": "Rapat himpunan"
        })
    }

    #[tokio::test]
    async fn missing_token_is_401_with_code() {
        let app = app("api_missing_token.wal").await;
        let response = app
            .oneshot(Request::builder().uri("/gedung").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let err: ErrorBody = read_json(response).await;
        assert_eq!(err.code, "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn wrong_password_is_auth_failed() {
        let app = app("api_wrong_password.wal").await;
        let response = app
            .oneshot(json_request(
                "POST",
                "/auth/login",
                None,
                serde_json::json!({"username": "budi", "password": "salah"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let err: ErrorBody = read_json(response).await;
        assert_eq!(err.code, "AUTH_FAILED");
    }

    #[tokio::test]
    async fn create_then_conflict_then_list() {
        let app = app("api_create_conflict.wal").await;
        let token = login(&app).await;

        let created = app
            .clone()
            .oneshot(json_request("POST", "/peminjaman", Some(&token), booking("09:00", "11:00")))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let created: ApiReservation = read_json(created).await;
        assert_eq!(created.status, "draft");

        let clash = app
            .clone()
            .oneshot(json_request("POST", "/peminjaman", Some(&token), booking("10:00", "12:00")))
            .await
            .unwrap();
        assert_eq!(clash.status(), StatusCode::CONFLICT);
        let err: ErrorBody = read_json(clash).await;
        assert_eq!(err.code, "CONFLICT");

        let listed = app
            .clone()
            .oneshot(get_request("/peminjaman?id_ruangan=R1&tanggal=2024-03-15&status=draft", &token))
            .await
            .unwrap();
        assert_eq!(listed.status(), StatusCode::OK);
        let listed: Vec<ApiReservation> = read_json(listed).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);

        let free = app
            .oneshot(get_request("/ruangan/tersedia?tanggal=2024-03-15", &token))
            .await
            .unwrap();
        let free: Vec<Room> = read_json(free).await;
        assert!(free.is_empty());
    }

    #[tokio::test]
    async fn malformed_input_is_validation_error() {
        let app = app("api_malformed.wal").await;
        let token = login(&app).await;

        let inverted = app
            .clone()
            .oneshot(json_request("POST", "/peminjaman", Some(&token), booking("11:00", "09:00")))
            .await
            .unwrap();
        assert_eq!(inverted.status(), StatusCode::BAD_REQUEST);

        let not_json = app
            .clone()
            .oneshot(json_request("POST", "/peminjaman", Some(&token), serde_json::json!({"id_user": "u1"})))
            .await
            .unwrap();
        assert_eq!(not_json.status(), StatusCode::BAD_REQUEST);
        let err: ErrorBody = read_json(not_json).await;
        assert_eq!(err.code, "VALIDATION_ERROR");

        let bad_id = app
            .oneshot(get_request("/peminjaman/not-a-ulid", &token))
            .await
            .unwrap();
        assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_update_and_audit_trail() {
        let app = app("api_status.wal").await;
        let token = login(&app).await;
        let created = app
            .clone()
            .oneshot(json_request("POST", "/peminjaman", Some(&token), booking("09:00", "10:00")))
            .await
            .unwrap();
        let created: ApiReservation = read_json(created).await;

        let approved = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/peminjaman/{}/status", created.id),
                Some(&token),
                serde_json::json!({"status": "confirmed", "keterangan": "disetujui BAAK"}),
            ))
            .await
            .unwrap();
        assert_eq!(approved.status(), StatusCode::OK);
        let approved: ApiReservation = read_json(approved).await;
        assert_eq!(approved.status, "confirmed");
        assert!(approved.nomor_surat.is_some());

        let backwards = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/peminjaman/{}/status", created.id),
                Some(&token),
                serde_json::json!({"status": "draft"}),
            ))
            .await
            .unwrap();
        assert_eq!(backwards.status(), StatusCode::CONFLICT);
        let err: ErrorBody = read_json(backwards).await;
        assert_eq!(err.code, "INVALID_TRANSITION");

        let trail = app
            .oneshot(get_request(&format!("/riwayat-peminjaman/{}", created.id), &token))
            .await
            .unwrap();
        let trail: Vec<ApiStatusChange> = read_json(trail).await;
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].status_sebelumnya, "draft");
        assert_eq!(trail[0].status_baru, "confirmed");
    }

    #[tokio::test]
    async fn booking_for_someone_else_is_unauthorized() {
        let app = app("api_impersonate.wal").await;
        let token = login(&app).await;
        let mut body = booking("09:00", "10:00");
        body["id_user"] = serde_json::json!("u2");
        let response = app
            .oneshot(json_request("POST", "/peminjaman", Some(&token), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
