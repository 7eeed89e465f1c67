use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only clock type.
pub type Ms = i64;

/// Whole currency units. Every derived amount (discounted rate, tax) is
/// rounded to a whole unit at the step that produces it.
pub type Money = i64;

/// Calendar day, stored as days since 1970-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Day(pub i32);

impl Day {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Self {
        let y = if month <= 2 { year - 1 } else { year };
        let era = if y >= 0 { y } else { y - 399 } / 400;
        let yoe = (y - era * 400) as u32;
        let mp = if month > 2 { month - 3 } else { month + 9 };
        let doy = (153 * mp + 2) / 5 + day - 1;
        let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
        Day(era * 146_097 + doe as i32 - 719_468)
    }

    /// Parse `YYYY-MM-DD`. Returns `None` on anything else.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('-');
        let year: i32 = parts.next()?.parse().ok()?;
        let month: u32 = parts.next()?.parse().ok()?;
        let day: u32 = parts.next()?.parse().ok()?;
        if parts.next().is_some() || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return None;
        }
        let parsed = Self::from_ymd(year, month, day);
        // Round-trips only for real calendar dates (rejects e.g. Feb 30).
        if parsed.to_ymd() == (year, month, day) {
            Some(parsed)
        } else {
            None
        }
    }

    pub fn to_ymd(self) -> (i32, u32, u32) {
        let z = self.0 + 719_468;
        let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
        let doe = (z - era * 146_097) as u32;
        let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
        let y = yoe as i32 + era * 400;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = doy - (153 * mp + 2) / 5 + 1;
        let month = if mp < 10 { mp + 3 } else { mp - 9 };
        (if month <= 2 { y + 1 } else { y }, month, day)
    }
}

impl std::fmt::Display for Day {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (y, m, d) = self.to_ymd();
        write!(f, "{y:04}-{m:02}-{d:02}")
    }
}

/// Half-open stay `[check_in, check_out)` in whole days.
/// A checkout on day X and a new check-in on day X do not conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayRange {
    pub check_in: Day,
    pub check_out: Day,
}

impl StayRange {
    /// Plain constructor. Ordering is not checked here; every mutation and
    /// query path rejects a reversed or empty range with `InvalidDateRange`
    /// before touching state, so client input cannot bypass validation.
    pub fn new(check_in: Day, check_out: Day) -> Self {
        Self {
            check_in,
            check_out,
        }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out.0 - self.check_in.0) as i64
    }

    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }
}

// ── Status enums ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Reserved,
    Occupied,
    Dirty,
    Cleaning,
    Maintenance,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Reserved => "reserved",
            RoomStatus::Occupied => "occupied",
            RoomStatus::Dirty => "dirty",
            RoomStatus::Cleaning => "cleaning",
            RoomStatus::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "available" => RoomStatus::Available,
            "reserved" => RoomStatus::Reserved,
            "occupied" => RoomStatus::Occupied,
            "dirty" => RoomStatus::Dirty,
            "cleaning" => RoomStatus::Cleaning,
            "maintenance" => RoomStatus::Maintenance,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Expired,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Expired => "expired",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    ConfirmedUnpaid,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl BookingStatus {
    /// The allowed transition table. Re-submitting the current status is
    /// handled by the caller as a no-op, not here.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (PendingPayment, Confirmed)
                | (PendingPayment, Cancelled)
                | (ConfirmedUnpaid, Confirmed)
                | (ConfirmedUnpaid, CheckedIn)
                | (ConfirmedUnpaid, Cancelled)
                | (Confirmed, CheckedIn)
                | (Confirmed, Cancelled)
                | (CheckedIn, CheckedOut)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::ConfirmedUnpaid => "confirmed_unpaid",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::CheckedOut => "checked_out",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending_payment" => BookingStatus::PendingPayment,
            "confirmed" => BookingStatus::Confirmed,
            "confirmed_unpaid" => BookingStatus::ConfirmedUnpaid,
            "checked_in" => BookingStatus::CheckedIn,
            "checked_out" => BookingStatus::CheckedOut,
            "cancelled" => BookingStatus::Cancelled,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
        }
    }
}

/// Non-cash methods are treated as settled at finalize time; no external
/// payment gateway is modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "cash" => PaymentMethod::Cash,
            "card" => PaymentMethod::Card,
            "transfer" => PaymentMethod::Transfer,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolReservationStatus {
    Confirmed,
    Cancelled,
    Completed,
}

impl PoolReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolReservationStatus::Confirmed => "confirmed",
            PoolReservationStatus::Cancelled => "cancelled",
            PoolReservationStatus::Completed => "completed",
        }
    }
}

// ── Catalog ─────────────────────────────────────────────────────────────────

/// Room category pricing entry. Read-only to the allocation paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Ulid,
    pub base_price: Money,
    /// Whole percent, `0..100`.
    pub discount_percent: u32,
}

// ── Rooms ───────────────────────────────────────────────────────────────────

/// What a stay entry on a room represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StayKind {
    /// Temporary claim by a pending reservation.
    Hold { expires_at: Ms },
    /// Claim by a non-cancelled booking.
    Booked,
}

/// One claim on a room for a date range. `entity_id` is the owning
/// reservation (holds) or booking (booked stays).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub entity_id: Ulid,
    pub range: StayRange,
    pub kind: StayKind,
}

/// Mutable per-room state. All writes go through the room's lock; the
/// availability check and the stay insert for one room are never separated.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub category_id: Ulid,
    pub status: RoomStatus,
    /// All claims on this room, sorted by `range.check_in`.
    pub stays: Vec<Stay>,
}

impl RoomState {
    pub fn new(id: Ulid, category_id: Ulid) -> Self {
        Self {
            id,
            category_id,
            status: RoomStatus::Available,
            stays: Vec::new(),
        }
    }

    /// Insert a stay maintaining sort order by check-in day.
    pub fn insert_stay(&mut self, stay: Stay) {
        let pos = self
            .stays
            .binary_search_by_key(&stay.range.check_in, |s| s.range.check_in)
            .unwrap_or_else(|e| e);
        self.stays.insert(pos, stay);
    }

    /// Remove the stay owned by `entity_id`, if present.
    pub fn remove_stay(&mut self, entity_id: Ulid) -> Option<Stay> {
        let pos = self.stays.iter().position(|s| s.entity_id == entity_id)?;
        Some(self.stays.remove(pos))
    }

    /// Only the stays whose range overlaps the query window.
    pub fn overlapping(&self, query: &StayRange) -> impl Iterator<Item = &Stay> {
        // Everything at index >= right_bound checks in at or after the query
        // checkout day and cannot overlap.
        let right_bound = self
            .stays
            .partition_point(|s| s.range.check_in < query.check_out);
        self.stays[..right_bound]
            .iter()
            .filter(move |s| s.range.check_out > query.check_in)
    }
}

// ── Reservations (holds) ────────────────────────────────────────────────────

/// The single room a reservation claims, with its priced breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedRoom {
    pub room_id: Ulid,
    pub price_per_night: Money,
    pub nights: i64,
    pub subtotal: Money,
}

/// A time-boxed claim on one room. Never physically deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub guest: String,
    pub stay: StayRange,
    pub adults: u32,
    pub children: u32,
    pub room: ReservedRoom,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub status: ReservationStatus,
    pub created_at: Ms,
    pub expires_at: Ms,
}

impl Reservation {
    /// Pure expiry projection, applied at every read boundary. The stored
    /// status field is never trusted for expiry: a pending reservation past
    /// `expires_at` is expired whether or not the reaper has caught up.
    pub fn effective_status(&self, now: Ms) -> ReservationStatus {
        if self.status == ReservationStatus::Pending && now > self.expires_at {
            ReservationStatus::Expired
        } else {
            self.status
        }
    }
}

// ── Bookings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedRoom {
    pub room_id: Ulid,
    pub price_per_night: Money,
    pub nights: i64,
    pub subtotal: Money,
}

/// The durable, billable artifact. Created atomically with its Payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub reservation_id: Option<Ulid>,
    pub guest: String,
    pub stay: StayRange,
    pub adults: u32,
    pub children: u32,
    pub rooms: Vec<BookedRoom>,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub status: BookingStatus,
    pub payment_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
}

// ── Pool slots ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReservation {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub guest: String,
    pub status: PoolReservationStatus,
    pub created_at: Ms,
}

/// Fixed-capacity slot keyed by `(date, start_time)`. The occupancy counter
/// is private: the only ways to move it are `try_occupy` and `release`, which
/// keep `0 <= reserved <= max_people` by construction.
#[derive(Debug, Clone)]
pub struct PoolSlotState {
    pub id: Ulid,
    pub date: Day,
    pub start_time: Ms,
    pub max_people: u32,
    reserved: u32,
    pub reservations: Vec<PoolReservation>,
}

impl PoolSlotState {
    pub fn new(id: Ulid, date: Day, start_time: Ms, max_people: u32) -> Self {
        Self {
            id,
            date,
            start_time,
            max_people,
            reserved: 0,
            reservations: Vec::new(),
        }
    }

    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Conditional occupy: increments only while below capacity. Callers hold
    /// the slot's write lock, so the check and the increment are one step.
    pub fn try_occupy(&mut self) -> bool {
        if self.reserved < self.max_people {
            self.reserved += 1;
            true
        } else {
            false
        }
    }

    /// Release one spot. Paired with exactly one prior successful
    /// `try_occupy`; saturates rather than going negative.
    pub fn release(&mut self) {
        debug_assert!(self.reserved > 0, "release without matching occupy");
        self.reserved = self.reserved.saturating_sub(1);
    }

    pub fn reservation(&self, id: Ulid) -> Option<&PoolReservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut PoolReservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }
}

// ── WAL record format ───────────────────────────────────────────────────────

/// One event per committed engine mutation. A single event is the atomic
/// unit of every multi-entity operation: either the whole event is on the
/// log or none of its effects are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CategoryCreated {
        id: Ulid,
        base_price: Money,
        discount_percent: u32,
    },
    CategoryUpdated {
        id: Ulid,
        base_price: Money,
        discount_percent: u32,
    },
    RoomCreated {
        id: Ulid,
        category_id: Ulid,
    },
    RoomStatusSet {
        id: Ulid,
        status: RoomStatus,
    },
    HoldCreated {
        reservation: Reservation,
    },
    ReservationExpired {
        id: Ulid,
        room_id: Ulid,
    },
    ReservationCancelled {
        id: Ulid,
        room_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
        payment: Payment,
    },
    BookingStatusSet {
        id: Ulid,
        status: BookingStatus,
    },
    PoolSlotCreated {
        id: Ulid,
        date: Day,
        start_time: Ms,
        max_people: u32,
    },
    PoolSlotReserved {
        reservation: PoolReservation,
    },
    PoolReservationCancelled {
        id: Ulid,
        slot_id: Ulid,
    },
    PoolReservationCompleted {
        id: Ulid,
        slot_id: Ulid,
    },
}
