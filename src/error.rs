use crate::model::ReservationStatus;

/// Every failure the engine, session and workflow can surface.
///
/// Variants carry a human-readable message so they survive the HTTP boundary
/// intact: the server maps them to a `code` string and the client maps the
/// code back with [`Error::from_code`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("{entity} {id}"))
    }

    pub fn invalid_transition(from: ReservationStatus, to: ReservationStatus) -> Self {
        Error::InvalidTransition(format!("{from} -> {to}"))
    }

    pub fn limit(what: &str) -> Self {
        Error::LimitExceeded(what.to_string())
    }

    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::Auth(_) => "AUTH_FAILED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::Conflict(_) => "CONFLICT",
            Error::InvalidTransition(_) => "INVALID_TRANSITION",
            Error::LimitExceeded(_) => "LIMIT_EXCEEDED",
            Error::Store(_) => "STORE_ERROR",
        }
    }

    /// Inverse of [`Error::code`]. Unknown codes become `Store`.
    pub fn from_code(code: &str, message: String) -> Self {
        match code {
            "VALIDATION_ERROR" => Error::Validation(message),
            "UNAUTHORIZED" => Error::Unauthorized(message),
            "AUTH_FAILED" => Error::Auth(message),
            "NOT_FOUND" => Error::NotFound(message),
            "ALREADY_EXISTS" => Error::AlreadyExists(message),
            "CONFLICT" => Error::Conflict(message),
            "INVALID_TRANSITION" => Error::InvalidTransition(message),
            "LIMIT_EXCEEDED" => Error::LimitExceeded(message),
            _ => Error::Store(message),
        }
    }

    /// The message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::Validation(m)
            | Error::Unauthorized(m)
            | Error::Auth(m)
            | Error::NotFound(m)
            | Error::AlreadyExists(m)
            | Error::Conflict(m)
            | Error::InvalidTransition(m)
            | Error::LimitExceeded(m)
            | Error::Store(m) => m,
        }
    }

    /// HTTP status the server answers with.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::LimitExceeded(_) => 400,
            Error::Unauthorized(_) | Error::Auth(_) => 401,
            Error::NotFound(_) => 404,
            Error::AlreadyExists(_) | Error::Conflict(_) | Error::InvalidTransition(_) => 409,
            Error::Store(_) => 500,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrip_preserves_variant() {
        let errors = [
            Error::Validation("bad date".into()),
            Error::Unauthorized("no session".into()),
            Error::Auth("wrong secret".into()),
            Error::NotFound("room r9".into()),
            Error::AlreadyExists("room r1".into()),
            Error::Conflict("slot taken".into()),
            Error::InvalidTransition("rejected -> approved".into()),
            Error::LimitExceeded("purpose too long".into()),
            Error::Store("backend unreachable".into()),
        ];
        for e in errors {
            let message = e.message().to_string();
            assert_eq!(Error::from_code(e.code(), message), e);
        }
    }

    #[test]
    fn unknown_code_is_store_error() {
        let e = Error::from_code("TEAPOT", "short and stout".into());
        assert!(matches!(e, Error::Store(_)));
        assert_eq!(e.http_status(), 500);
        assert_eq!(Error::Conflict("x".into()).http_status(), 409);
    }

    #[test]
    fn invalid_transition_message_names_both_states() {
        let e = Error::invalid_transition(ReservationStatus::Rejected, ReservationStatus::Approved);
        assert_eq!(e.to_string(), "invalid transition: rejected -> approved");
    }
}
