//! JSON shapes of the REST boundary and their mapping onto the model.
//!
//! The backend speaks Indonesian field names and its own status words
//! (`draft`, `locked`, `confirmed`, `expired`); everything is normalized to
//! the canonical model types as soon as it crosses the boundary.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::model::*;

// ── Status vocabulary ────────────────────────────────────────────

/// Parse any status word the backend, the cache or a user may send.
pub fn parse_status(s: &str) -> Result<ReservationStatus> {
    match s.trim().to_ascii_lowercase().as_str() {
        "draft" | "locked" | "pending" | "menunggu" => Ok(ReservationStatus::Pending),
        "confirmed" | "approved" | "disetujui" => Ok(ReservationStatus::Approved),
        "expired" | "rejected" | "ditolak" => Ok(ReservationStatus::Rejected),
        "completed" | "selesai" => Ok(ReservationStatus::Completed),
        other => Err(Error::Validation(format!("unknown status: {other:?}"))),
    }
}

/// Status word emitted to the backend wire.
pub fn backend_status(status: ReservationStatus) -> &'static str {
    match status {
        ReservationStatus::Pending => "draft",
        ReservationStatus::Approved => "confirmed",
        ReservationStatus::Rejected => "expired",
        ReservationStatus::Completed => "completed",
    }
}

/// Comma-separated status list, e.g. `draft,confirmed`.
pub fn parse_status_list(s: &str) -> Result<BTreeSet<ReservationStatus>> {
    s.split(',')
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(parse_status)
        .collect()
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        S(String),
        N(i64),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::S(s) => s,
        Raw::N(n) => n.to_string(),
    })
}

pub fn parse_reservation_id(s: &str) -> Result<ReservationId> {
    s.parse()
        .map_err(|_| Error::Validation(format!("malformed reservation id: {s:?}")))
}

// ── Reservation records ──────────────────────────────────────────

/// A reservation as the backend sends and receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiReservation {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub id_user: String,
    #[serde(deserialize_with = "string_or_number")]
    pub id_ruangan: String,
    pub tanggal: String,
    pub jam_mulai: String,
    pub jam_selesai: String,
    pub nama_pengguna: String,
    #[serde(default)]
    pub jenis_pengguna: Option<RequesterClass>,
    pub keperluan: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub nomor_surat: Option<String>,
}

impl From<&Reservation> for ApiReservation {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id.to_string(),
            id_user: r.requester.id.0.clone(),
            id_ruangan: r.room_id.0.clone(),
            tanggal: format_date(r.date),
            jam_mulai: format_time(r.start),
            jam_selesai: format_time(r.end),
            nama_pengguna: r.requester.name.clone(),
            jenis_pengguna: Some(r.requester.class),
            keperluan: r.purpose.clone(),
            status: backend_status(r.status).to_string(),
            created_at: r.created_at,
            approved_at: r.approved_at,
            nomor_surat: r.reference.clone(),
        }
    }
}

impl ApiReservation {
    pub fn into_reservation(self) -> Result<Reservation> {
        let (date, start, end) = parse_slot(&self.tanggal, &self.jam_mulai, &self.jam_selesai)?;
        Ok(Reservation {
            id: parse_reservation_id(&self.id)?,
            room_id: RoomId(self.id_ruangan),
            requester: Identity {
                id: UserId(self.id_user),
                name: self.nama_pengguna,
                class: self.jenis_pengguna.unwrap_or(RequesterClass::Student),
            },
            date,
            start,
            end,
            purpose: self.keperluan,
            status: parse_status(&self.status)?,
            created_at: self.created_at,
            approved_at: self.approved_at,
            reference: self.nomor_surat,
        })
    }
}

/// Either record shape found in responses or in the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ReservationRecord {
    Local(Reservation),
    Api(ApiReservation),
}

impl ReservationRecord {
    pub fn normalize(self) -> Result<Reservation> {
        match self {
            ReservationRecord::Local(r) => Ok(r),
            ReservationRecord::Api(r) => r.into_reservation(),
        }
    }
}

/// Parse a JSON array of records, dropping (and logging) any that do not
/// normalize.
pub fn parse_records(json: &str) -> Result<Vec<Reservation>> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(json).map_err(|e| Error::Validation(format!("malformed record list: {e}")))?;
    Ok(raw
        .into_iter()
        .filter_map(|v| {
            match serde_json::from_value::<ReservationRecord>(v)
                .map_err(|e| Error::Validation(e.to_string()))
                .and_then(ReservationRecord::normalize)
            {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!("skipping unreadable reservation record: {e}");
                    None
                }
            }
        })
        .collect())
}

// ── Request bodies and queries ───────────────────────────────────

/// `POST /peminjaman`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReservationBody {
    #[serde(deserialize_with = "string_or_number")]
    pub id_user: String,
    #[serde(deserialize_with = "string_or_number")]
    pub id_ruangan: String,
    pub tanggal: String,
    pub jam_mulai: String,
    pub jam_selesai: String,
    pub nama_pengguna: String,
    pub keperluan: String,
}

/// `PUT /peminjaman/{id}/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateBody {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keterangan: Option<String>,
}

/// One audit entry under `/riwayat-peminjaman`. `created_at` may be omitted
/// on `POST`; the server stamps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiStatusChange {
    pub id_peminjaman: String,
    pub status_sebelumnya: String,
    pub status_baru: String,
    #[serde(default)]
    pub keterangan: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&StatusChange> for ApiStatusChange {
    fn from(c: &StatusChange) -> Self {
        Self {
            id_peminjaman: c.reservation_id.to_string(),
            status_sebelumnya: backend_status(c.previous).to_string(),
            status_baru: backend_status(c.new).to_string(),
            keterangan: c.note.clone(),
            created_at: Some(c.created_at),
        }
    }
}

impl ApiStatusChange {
    pub fn into_change(self) -> Result<StatusChange> {
        Ok(StatusChange {
            reservation_id: parse_reservation_id(&self.id_peminjaman)?,
            previous: parse_status(&self.status_sebelumnya)?,
            new: parse_status(&self.status_baru)?,
            note: self.keterangan,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Query string of `GET /peminjaman` and `GET /laporan-peminjaman`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_ruangan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tanggal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ReservationQuery {
    pub fn to_filter(&self) -> Result<ReservationFilter> {
        Ok(ReservationFilter {
            room_id: self.id_ruangan.as_deref().map(RoomId::from),
            date: self.tanggal.as_deref().map(parse_date).transpose()?,
            requester_id: self.id_user.as_deref().map(UserId::from),
            statuses: self.status.as_deref().map(parse_status_list).transpose()?,
        })
    }
}

impl From<&ReservationFilter> for ReservationQuery {
    fn from(f: &ReservationFilter) -> Self {
        Self {
            id_ruangan: f.room_id.as_ref().map(|id| id.0.clone()),
            tanggal: f.date.map(format_date),
            id_user: f.requester_id.as_ref().map(|id| id.0.clone()),
            status: f.statuses.as_ref().map(|set| {
                set.iter()
                    .map(|s| backend_status(*s))
                    .collect::<Vec<_>>()
                    .join(",")
            }),
        }
    }
}

/// Query string of `GET /ruangan` and `GET /ruangan/tersedia`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gedung: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zona: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lantai: Option<u32>,
    /// Only used by `/ruangan/tersedia`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tanggal: Option<String>,
}

impl RoomQuery {
    pub fn to_filter(&self) -> RoomFilter {
        RoomFilter {
            building: self.gedung.clone(),
            zone: self.zona.clone(),
            floor: self.lantai,
        }
    }
}

impl From<&RoomFilter> for RoomQuery {
    fn from(f: &RoomFilter) -> Self {
        Self {
            gedung: f.building.clone(),
            zona: f.zone.clone(),
            lantai: f.floor,
            tanggal: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub error: String,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        Self {
            code: e.code().to_string(),
            error: e.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: Identity,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    #[test]
    fn status_words_map_both_ways() {
        assert_eq!(parse_status("draft").unwrap(), ReservationStatus::Pending);
        assert_eq!(parse_status("locked").unwrap(), ReservationStatus::Pending);
        assert_eq!(parse_status("confirmed").unwrap(), ReservationStatus::Approved);
        assert_eq!(parse_status("expired").unwrap(), ReservationStatus::Rejected);
        assert_eq!(parse_status("Disetujui").unwrap(), ReservationStatus::Approved);
        assert_eq!(parse_status("selesai").unwrap(), ReservationStatus::Completed);
        assert!(matches!(parse_status("cancelled"), Err(Error::Validation(_))));

        for s in [
            ReservationStatus::Pending,
            ReservationStatus::Approved,
            ReservationStatus::Rejected,
            ReservationStatus::Completed,
        ] {
            assert_eq!(parse_status(backend_status(s)).unwrap(), s);
        }
    }

    #[test]
    fn status_list_parses_and_rejects_unknown() {
        let set = parse_status_list("draft, confirmed,").unwrap();
        assert_eq!(
            set,
            BTreeSet::from([ReservationStatus::Pending, ReservationStatus::Approved])
        );
        assert!(parse_status_list("draft,bogus").is_err());
    }

    #[test]
    fn api_record_normalizes_with_numeric_ids_and_default_class() {
        let id = ulid::Ulid::new();
        let json = format!(
            r#"{{"id":"{id}","id_user":7,"id_ruangan":12,"tanggal":"2024-03-15",
                "jam_mulai":"09:00:00","jam_selesai":"11:00","nama_pengguna":"Budi",
                "keperluan":"Rapat","status":"locked","created_at":"2024-03-01T08:00:00Z"}}"#
        );
        let rec: ReservationRecord = serde_json::from_str(&json).unwrap();
        assert!(matches!(rec, ReservationRecord::Api(_)));
        let r = rec.normalize().unwrap();
        assert_eq!(r.id, id);
        assert_eq!(r.room_id.0, "12");
        assert_eq!(r.requester.id.0, "7");
        assert_eq!(r.requester.class, RequesterClass::Student);
        assert_eq!(r.status, ReservationStatus::Pending);
        assert_eq!(r.start, t("09:00"));
    }

    #[test]
    fn both_record_shapes_in_one_list() {
        let local = reservation("R1", "2024-03-15", "09:00", "10:00", ReservationStatus::Approved);
        let api = ApiReservation::from(&reservation("R2", "2024-03-16", "13:00", "14:00", ReservationStatus::Pending));
        let json = serde_json::to_string(&vec![
            serde_json::to_value(&local).unwrap(),
            serde_json::to_value(&api).unwrap(),
            serde_json::json!({"garbage": true}),
        ])
        .unwrap();

        let records = parse_records(&json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], local);
        assert_eq!(records[1].room_id.0, "R2");
        assert_eq!(records[1].status, ReservationStatus::Pending);
        assert!(parse_records("{not a list").is_err());
    }

    #[test]
    fn emitted_record_uses_backend_words() {
        let r = reservation("R1", "2024-03-15", "09:00", "10:00", ReservationStatus::Rejected);
        let api = ApiReservation::from(&r);
        assert_eq!(api.status, "expired");
        assert_eq!(api.tanggal, "2024-03-15");
        assert_eq!(api.jam_mulai, "09:00");
    }

    #[test]
    fn reservation_query_round_trips_filter() {
        let q = ReservationQuery {
            id_ruangan: Some("R1".into()),
            tanggal: Some("2024-03-15".into()),
            id_user: None,
            status: Some("draft,confirmed".into()),
        };
        let filter = q.to_filter().unwrap();
        assert_eq!(filter.room_id, Some(RoomId::from("R1")));
        assert_eq!(filter.date, Some(d("2024-03-15")));
        assert_eq!(ReservationQuery::from(&filter), q);

        let bad = ReservationQuery {
            tanggal: Some("15/03/2024".into()),
            ..Default::default()
        };
        assert!(matches!(bad.to_filter(), Err(Error::Validation(_))));
    }

    #[test]
    fn status_change_maps_words() {
        let api = ApiStatusChange {
            id_peminjaman: ulid::Ulid::new().to_string(),
            status_sebelumnya: "draft".into(),
            status_baru: "confirmed".into(),
            keterangan: Some("ok".into()),
            created_at: None,
        };
        let change = api.clone().into_change().unwrap();
        assert_eq!(change.previous, ReservationStatus::Pending);
        assert_eq!(change.new, ReservationStatus::Approved);
        let back = ApiStatusChange::from(&change);
        assert_eq!(back.status_baru, "confirmed");
        assert!(back.created_at.is_some());
    }
}
