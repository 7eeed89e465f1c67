//! Reservation holds: creation, cancellation, and expiry.

use ulid::Ulid;

use super::rooms::{room_is_free, validate_guest, validate_stay};
use super::{Engine, EngineError, now_ms};
use crate::limits;
use crate::model::*;
use crate::notify::{Notice, room_channel};
use crate::pricing;

impl Engine {
    /// Place a time-boxed hold on the lowest-id free room of a category.
    ///
    /// The room's write lock is held across the free check, the WAL append
    /// and the stay insert, so two concurrent holds for an overlapping stay
    /// can never both claim the same room.
    pub async fn create_hold(
        &self,
        id: Ulid,
        category_id: Ulid,
        guest: &str,
        range: StayRange,
        adults: u32,
        children: u32,
    ) -> Result<Reservation, EngineError> {
        validate_stay(&range)?;
        validate_guest(guest)?;
        if adults == 0 {
            return Err(EngineError::InvalidField(
                "at least one adult required".into(),
            ));
        }
        if self.reservations.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let category = self
            .categories
            .get(&category_id)
            .map(|c| *c.value())
            .ok_or(EngineError::NotFound(category_id))?;

        let quote = pricing::quote(category.base_price, category.discount_percent, range.nights());
        let now = now_ms();

        // Lowest id first. Locks are taken one room at a time; a room that
        // fills up between the snapshot and its lock is simply skipped.
        for room_id in self.sorted_rooms_in(category_id) {
            let Some(room) = self.get_room(&room_id) else {
                continue;
            };
            let mut guard = room.write().await;
            if guard.stays.len() >= limits::MAX_STAYS_PER_ROOM {
                return Err(EngineError::LimitExceeded("stays per room"));
            }
            if !room_is_free(&guard, &range, now, None) {
                continue;
            }

            let reservation = Reservation {
                id,
                guest: guest.to_string(),
                stay: range,
                adults,
                children,
                room: ReservedRoom {
                    room_id,
                    price_per_night: quote.price_per_night,
                    nights: range.nights(),
                    subtotal: quote.subtotal,
                },
                subtotal: quote.subtotal,
                tax: quote.tax,
                total: quote.total,
                status: ReservationStatus::Pending,
                created_at: now,
                expires_at: now + limits::HOLD_TTL_MS,
            };
            let event = Event::HoldCreated {
                reservation: reservation.clone(),
            };
            self.wal_append(&event).await?;
            guard.insert_stay(Stay {
                entity_id: id,
                range,
                kind: StayKind::Hold {
                    expires_at: reservation.expires_at,
                },
            });
            self.reservations.insert(id, reservation.clone());
            self.notify
                .send(&room_channel(room_id), &Notice::Domain { event });
            metrics::counter!(crate::observability::HOLDS_CREATED_TOTAL).increment(1);
            return Ok(reservation);
        }

        Err(EngineError::NoAvailability)
    }

    /// Guest-initiated cancellation of a pending hold.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let (room_id, status) = {
            let res = self.reservations.get(&id).ok_or(EngineError::NotFound(id))?;
            (res.room.room_id, res.effective_status(now_ms()))
        };
        match status {
            ReservationStatus::Pending => {}
            ReservationStatus::Cancelled => return Err(EngineError::AlreadyCancelled(id)),
            ReservationStatus::Expired => return Err(EngineError::HoldExpired(id)),
            ReservationStatus::Confirmed => {
                return Err(EngineError::InvalidField(
                    "reservation already confirmed; cancel the booking instead".into(),
                ));
            }
        }

        let room = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = room.write().await;
        // Re-check under the lock; finalize may have confirmed it meanwhile.
        {
            let res = self.reservations.get(&id).ok_or(EngineError::NotFound(id))?;
            if res.status != ReservationStatus::Pending {
                return Err(EngineError::InvalidField(
                    "reservation is no longer pending".into(),
                ));
            }
        }
        let event = Event::ReservationCancelled { id, room_id };
        self.wal_append(&event).await?;
        if let Some(mut res) = self.reservations.get_mut(&id) {
            res.status = ReservationStatus::Cancelled;
        }
        guard.remove_stay(id);
        self.notify
            .send(&room_channel(room_id), &Notice::Domain { event });
        Ok(())
    }

    /// Snapshot of pending holds whose TTL has passed: `(reservation, room)`.
    pub fn collect_expired_holds(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        self.reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Pending && now > r.expires_at)
            .map(|r| (r.id, r.room.room_id))
            .collect()
    }

    /// Persist the expiry of one hold. Expiry is already effective through
    /// the status projection; this makes it durable and frees the stay entry.
    pub async fn expire_reservation(&self, id: Ulid, room_id: Ulid) -> Result<(), EngineError> {
        let room = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = room.write().await;
        {
            let res = self.reservations.get(&id).ok_or(EngineError::NotFound(id))?;
            // Finalize or cancel may have won the race since the sweep.
            if res.effective_status(now_ms()) != ReservationStatus::Expired {
                return Ok(());
            }
        }
        let event = Event::ReservationExpired { id, room_id };
        self.wal_append(&event).await?;
        if let Some(mut res) = self.reservations.get_mut(&id) {
            res.status = ReservationStatus::Expired;
        }
        guard.remove_stay(id);
        self.notify
            .send(&room_channel(room_id), &Notice::Domain { event });
        metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL).increment(1);
        Ok(())
    }
}
