use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

/// Minutes since midnight, the only wall-clock unit inside the engine.
pub type Minute = u32;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

pub type ReservationId = Ulid;

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from wall-clock times, rejecting empty or inverted ranges.
    pub fn from_times(start: NaiveTime, end: NaiveTime) -> Result<Self> {
        let (s, e) = (minute_of(start), minute_of(end));
        if s >= e {
            return Err(Error::Validation(format!(
                "start {} must be before end {}",
                format_time(start),
                format_time(end)
            )));
        }
        Ok(Self::new(s, e))
    }

    pub fn whole_day() -> Self {
        Self::new(0, MINUTES_PER_DAY)
    }

    pub fn duration_minutes(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}

pub fn minute_of(t: NaiveTime) -> Minute {
    t.hour() * 60 + t.minute()
}

pub fn format_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Parse a plain calendar date (`YYYY-MM-DD`).
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| Error::Validation(format!("malformed date: {s:?}")))
}

/// Parse a wall-clock time, `HH:MM` or `HH:MM:SS`.
pub fn parse_time(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| Error::Validation(format!("malformed time: {s:?}")))
}

/// Parse the `(date, start, end)` triple of an availability query or booking.
pub fn parse_slot(date: &str, start: &str, end: &str) -> Result<(NaiveDate, NaiveTime, NaiveTime)> {
    let date = parse_date(date)?;
    let start = parse_time(start)?;
    let end = parse_time(end)?;
    Span::from_times(start, end)?;
    Ok((date, start, end))
}

// ── Identifiers ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        RoomId(s.to_string())
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    pub id: String,
    pub name: String,
    pub zones: Vec<String>,
}

impl Building {
    pub fn has_zone(&self, zone: &str) -> bool {
        self.zones.iter().any(|z| z == zone)
    }
}

/// Coarse, advisory room flag. Only `Maintenance` blocks bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    #[serde(rename = "available", alias = "tersedia")]
    Available,
    #[serde(rename = "in-use", alias = "in_use", alias = "digunakan")]
    InUse,
    #[serde(rename = "maintenance", alias = "perbaikan", alias = "pemeliharaan")]
    Maintenance,
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoomStatus::Available => "available",
            RoomStatus::InUse => "in-use",
            RoomStatus::Maintenance => "maintenance",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub building: String,
    pub zone: String,
    pub floor: u32,
    pub capacity: u32,
    #[serde(default)]
    pub amenities: BTreeSet<String>,
    pub status: RoomStatus,
}

/// Exact-match catalog filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomFilter {
    pub building: Option<String>,
    pub zone: Option<String>,
    pub floor: Option<u32>,
}

impl RoomFilter {
    pub fn matches(&self, room: &Room) -> bool {
        self.building.as_ref().is_none_or(|b| *b == room.building)
            && self.zone.as_ref().is_none_or(|z| *z == room.zone)
            && self.floor.is_none_or(|f| f == room.floor)
    }
}

// ── People ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequesterClass {
    #[serde(rename = "student", alias = "mahasiswa")]
    Student,
    #[serde(rename = "faculty", alias = "dosen")]
    Faculty,
    #[serde(rename = "staff", alias = "staf")]
    Staff,
    #[serde(rename = "external", alias = "umum", alias = "eksternal")]
    External,
}

impl fmt::Display for RequesterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequesterClass::Student => "student",
            RequesterClass::Faculty => "faculty",
            RequesterClass::Staff => "staff",
            RequesterClass::External => "external",
        })
    }
}

/// An authenticated person; also the requester recorded on a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub name: String,
    pub class: RequesterClass,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReservationStatus {
    #[serde(rename = "pending", alias = "menunggu")]
    Pending,
    #[serde(rename = "approved", alias = "disetujui")]
    Approved,
    #[serde(rename = "rejected", alias = "ditolak")]
    Rejected,
    #[serde(rename = "completed", alias = "selesai")]
    Completed,
}

impl ReservationStatus {
    /// Pending requests hold their slot exactly like approved ones.
    pub fn blocks(self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::Rejected | ReservationStatus::Completed)
    }

    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Completed)
        )
    }

    /// User-facing label shown in the booking history.
    pub fn label(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "menunggu",
            ReservationStatus::Approved => "disetujui",
            ReservationStatus::Rejected => "ditolak",
            ReservationStatus::Completed => "selesai",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Completed => "completed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub requester: Identity,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub purpose: String,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    /// Formal reference number, assigned on approval.
    #[serde(default)]
    pub reference: Option<String>,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span {
            start: minute_of(self.start),
            end: minute_of(self.end),
        }
    }

    pub fn requester_id(&self) -> &UserId {
        &self.requester.id
    }
}

/// Everything needed to insert a reservation; the store assigns the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDraft {
    pub room_id: RoomId,
    pub requester: Identity,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub purpose: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub room_id: Option<RoomId>,
    pub date: Option<NaiveDate>,
    pub requester_id: Option<UserId>,
    pub statuses: Option<BTreeSet<ReservationStatus>>,
}

impl ReservationFilter {
    pub fn for_room_on(room_id: RoomId, date: NaiveDate) -> Self {
        Self {
            room_id: Some(room_id),
            date: Some(date),
            ..Self::default()
        }
    }

    pub fn for_requester(requester_id: UserId) -> Self {
        Self {
            requester_id: Some(requester_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        self.room_id.as_ref().is_none_or(|id| *id == r.room_id)
            && self.date.is_none_or(|d| d == r.date)
            && self.requester_id.as_ref().is_none_or(|id| id == r.requester_id())
            && self.statuses.as_ref().is_none_or(|s| s.contains(&r.status))
    }
}

/// One entry of the status-change audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub reservation_id: ReservationId,
    pub previous: ReservationStatus,
    pub new: ReservationStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Denormalized reservation row for the reporting screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    pub reservation_id: ReservationId,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub room_id: RoomId,
    pub room_name: String,
    pub building: String,
    pub zone: String,
    pub floor: u32,
    pub requester_id: UserId,
    pub requester_name: String,
    pub requester_class: RequesterClass,
    pub purpose: String,
    pub status: ReservationStatus,
    /// Display word for `status`.
    #[serde(default)]
    pub status_label: String,
    pub reference: Option<String>,
}

impl ReportRow {
    pub fn new(room: &Room, r: &Reservation) -> Self {
        Self {
            reservation_id: r.id,
            date: r.date,
            start: r.start,
            end: r.end,
            room_id: room.id.clone(),
            room_name: room.name.clone(),
            building: room.building.clone(),
            zone: room.zone.clone(),
            floor: room.floor,
            requester_id: r.requester.id.clone(),
            requester_name: r.requester.name.clone(),
            requester_class: r.requester.class,
            purpose: r.purpose.clone(),
            status: r.status,
            status_label: r.status.label().to_string(),
            reference: r.reference.clone(),
        }
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BuildingUpserted {
        building: Building,
    },
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    RoomDeleted {
        id: RoomId,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    StatusChanged {
        room_id: RoomId,
        date: NaiveDate,
        change: StatusChange,
        approved_at: Option<DateTime<Utc>>,
        reference: Option<String>,
    },
    AuditAppended {
        change: StatusChange,
    },
    ReservationRemoved {
        id: ReservationId,
        room_id: RoomId,
        date: NaiveDate,
    },
    /// Highest reference sequence issued so far. Written by compaction,
    /// which may drop the reservation that carried it.
    ReferenceIssued {
        seq: u32,
    },
}
