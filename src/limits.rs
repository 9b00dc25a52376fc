use std::time::Duration;

/// Room, building and account display names.
pub const MAX_NAME_LEN: usize = 128;

/// Free-text purpose of a reservation (keperluan).
pub const MAX_PURPOSE_LEN: usize = 1000;

/// Free-text note attached to a status change (keterangan).
pub const MAX_NOTE_LEN: usize = 1000;

pub const MAX_AMENITIES_PER_ROOM: usize = 64;

pub const MAX_ZONES_PER_BUILDING: usize = 64;

pub const MAX_ROOMS: usize = 10_000;

/// Reservations of any status kept for one room on one date.
pub const MAX_RESERVATIONS_PER_ROOM_DAY: usize = 500;

/// Widest date range a calendar query may cover, inclusive.
pub const MAX_CALENDAR_DAYS: i64 = 366;

/// How long a bearer token stays valid after it was issued.
pub const TOKEN_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Live tokens one identity may hold; the oldest is revoked past this.
pub const MAX_TOKENS_PER_IDENTITY: usize = 8;
