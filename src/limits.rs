//! Hard caps that keep a single property's state bounded. Exceeding any of
//! these returns an error to the client rather than degrading the engine.

use crate::model::Ms;

/// Maximum room categories per property.
pub const MAX_CATEGORIES: usize = 1_000;

/// Maximum rooms per property.
pub const MAX_ROOMS: usize = 100_000;

/// Maximum stays (holds + bookings) recorded on a single room.
pub const MAX_STAYS_PER_ROOM: usize = 10_000;

/// Maximum pool slots per property.
pub const MAX_POOL_SLOTS: usize = 100_000;

/// Maximum seats a single pool slot may advertise.
pub const MAX_SLOT_CAPACITY: u32 = 10_000;

/// Maximum guest name length in bytes.
pub const MAX_GUEST_LEN: usize = 256;

/// Longest bookable stay in nights.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Bookable horizon: days since epoch must fall in this window.
/// 2000-01-01 .. 2100-01-01.
pub const MIN_DAY: i32 = 10_957;
pub const MAX_DAY: i32 = 47_482;

/// How long a pending reservation holds its room.
pub const HOLD_TTL_MS: Ms = 15 * 60 * 1_000;

/// Attempts for a finalize whose log append hit a transient storage error.
pub const FINALIZE_RETRIES: u32 = 3;

/// Maximum properties a single server will host.
pub const MAX_PROPERTIES: usize = 1_000;

/// Maximum property name length after sanitization.
pub const MAX_PROPERTY_NAME_LEN: usize = 64;
