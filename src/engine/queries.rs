//! Read-side queries. All reads project reservation expiry through
//! `effective_status`; no query ever reports a stale pending hold.

use ulid::Ulid;

use super::{Engine, EngineError, now_ms};
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityRow {
    pub room_id: Ulid,
    pub check_in: Day,
    pub check_out: Day,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomRow {
    pub id: Ulid,
    pub category_id: Ulid,
    pub status: RoomStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRow {
    pub id: Ulid,
    pub guest: String,
    pub room_id: Ulid,
    pub check_in: Day,
    pub check_out: Day,
    pub adults: u32,
    pub children: u32,
    pub price_per_night: Money,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub status: ReservationStatus,
    pub expires_at: Ms,
}

/// One row per booked room, so multi-room bookings list each room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRow {
    pub id: Ulid,
    pub guest: String,
    pub room_id: Ulid,
    pub check_in: Day,
    pub check_out: Day,
    pub price_per_night: Money,
    pub room_subtotal: Money,
    pub total: Money,
    pub status: BookingStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSlotRow {
    pub id: Ulid,
    pub date: Day,
    pub start_time: Ms,
    pub max_people: u32,
    pub reserved: u32,
}

impl Engine {
    /// Free rooms in a category for a stay, lowest id first.
    pub async fn availability(
        &self,
        category_id: Ulid,
        range: &StayRange,
    ) -> Result<Vec<AvailabilityRow>, EngineError> {
        let rooms = self.available_rooms(category_id, range).await?;
        Ok(rooms
            .into_iter()
            .map(|room_id| AvailabilityRow {
                room_id,
                check_in: range.check_in,
                check_out: range.check_out,
            })
            .collect())
    }

    pub async fn list_rooms(&self) -> Vec<RoomRow> {
        let handles: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rows = Vec::with_capacity(handles.len());
        for room in handles {
            let guard = room.read().await;
            rows.push(RoomRow {
                id: guard.id,
                category_id: guard.category_id,
                status: guard.status,
            });
        }
        rows.sort_unstable_by_key(|r| r.id);
        rows
    }

    pub fn list_reservations(&self) -> Vec<ReservationRow> {
        let now = now_ms();
        let mut rows: Vec<ReservationRow> = self
            .reservations
            .iter()
            .map(|res| ReservationRow {
                id: res.id,
                guest: res.guest.clone(),
                room_id: res.room.room_id,
                check_in: res.stay.check_in,
                check_out: res.stay.check_out,
                adults: res.adults,
                children: res.children,
                price_per_night: res.room.price_per_night,
                subtotal: res.subtotal,
                tax: res.tax,
                total: res.total,
                status: res.effective_status(now),
                expires_at: res.expires_at,
            })
            .collect();
        rows.sort_unstable_by_key(|r| r.id);
        rows
    }

    pub fn list_bookings(&self) -> Vec<BookingRow> {
        let mut rows = Vec::new();
        for booking in self.bookings.iter() {
            let (payment_method, payment_status) = self
                .payments
                .get(&booking.payment_id)
                .map(|p| (p.method, p.status))
                .unwrap_or((PaymentMethod::Cash, PaymentStatus::Pending));
            for room in &booking.rooms {
                rows.push(BookingRow {
                    id: booking.id,
                    guest: booking.guest.clone(),
                    room_id: room.room_id,
                    check_in: booking.stay.check_in,
                    check_out: booking.stay.check_out,
                    price_per_night: room.price_per_night,
                    room_subtotal: room.subtotal,
                    total: booking.total,
                    status: booking.status,
                    payment_method,
                    payment_status,
                });
            }
        }
        rows.sort_unstable_by_key(|r| (r.id, r.room_id));
        rows
    }

    pub async fn list_pool_slots(&self) -> Vec<PoolSlotRow> {
        let handles: Vec<_> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut rows = Vec::with_capacity(handles.len());
        for slot in handles {
            let guard = slot.read().await;
            rows.push(PoolSlotRow {
                id: guard.id,
                date: guard.date,
                start_time: guard.start_time,
                max_people: guard.max_people,
                reserved: guard.reserved(),
            });
        }
        rows.sort_unstable_by_key(|r| (r.date, r.start_time, r.id));
        rows
    }

    pub async fn list_pool_reservations(&self) -> Vec<PoolReservation> {
        let handles: Vec<_> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut rows = Vec::new();
        for slot in handles {
            let guard = slot.read().await;
            rows.extend(guard.reservations.iter().cloned());
        }
        rows.sort_unstable_by_key(|r| r.id);
        rows
    }
}
