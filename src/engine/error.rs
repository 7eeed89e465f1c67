use ulid::Ulid;

use crate::model::{BookingStatus, Money};

/// Errors surfaced by engine operations. These map onto SQL error responses
/// at the wire layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// No free room remained in the requested category for the stay.
    NoAvailability,
    InvalidDateRange(String),
    InvalidField(String),
    /// Server-side recomputation disagreed with the client's declared total.
    PriceMismatch {
        expected: Money,
        declared: Money,
    },
    /// A room claimed by the hold was taken before finalize committed.
    RoomUnavailable(Ulid),
    /// The hold passed its TTL before finalize.
    HoldExpired(Ulid),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// The pool slot is at capacity.
    SlotFull(Ulid),
    AlreadyCancelled(Ulid),
    LimitExceeded(&'static str),
    /// Storage append failed; transient, retried by finalize.
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::NoAvailability => write!(f, "no room available for the requested stay"),
            EngineError::InvalidDateRange(msg) => write!(f, "invalid date range: {msg}"),
            EngineError::InvalidField(msg) => write!(f, "invalid field: {msg}"),
            EngineError::PriceMismatch { expected, declared } => write!(
                f,
                "price mismatch: expected total {expected}, declared {declared}"
            ),
            EngineError::RoomUnavailable(id) => write!(f, "room no longer available: {id}"),
            EngineError::HoldExpired(id) => write!(f, "reservation hold expired: {id}"),
            EngineError::InvalidTransition { from, to } => write!(
                f,
                "invalid booking transition: {} -> {}",
                from.as_str(),
                to.as_str()
            ),
            EngineError::SlotFull(id) => write!(f, "pool slot full: {id}"),
            EngineError::AlreadyCancelled(id) => write!(f, "already cancelled: {id}"),
            EngineError::LimitExceeded(what) => write!(f, "limit exceeded: {what}"),
            EngineError::WalError(msg) => write!(f, "wal error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
