//! Booking finalization and the booking status lifecycle.

use tokio::sync::OwnedRwLockWriteGuard;
use ulid::Ulid;

use super::rooms::{room_is_free, validate_guest, validate_stay};
use super::{Engine, EngineError, now_ms};
use crate::limits;
use crate::model::*;
use crate::notify::{HOUSEKEEPING_CHANNEL, Notice, STAFF_CHANNEL, room_channel};
use crate::pricing;

/// Everything the client submits to turn a hold (or a walk-in) into a
/// booking. The declared total is what the guest saw; the engine recomputes
/// the authoritative total and refuses to commit on any difference.
#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub id: Ulid,
    pub reservation_id: Option<Ulid>,
    pub guest: String,
    pub stay: StayRange,
    pub adults: u32,
    pub children: u32,
    pub room_ids: Vec<Ulid>,
    pub declared_total: Money,
    pub method: PaymentMethod,
}

impl Engine {
    /// Finalize a booking: re-validate price, re-validate availability, then
    /// commit booking + payment + reservation confirmation + room statuses
    /// as one WAL event under all affected room locks.
    ///
    /// A transient storage failure on the append is retried a bounded number
    /// of times; each retry re-runs the hold and availability checks from
    /// scratch. Domain rejections are never retried.
    pub async fn finalize_booking(&self, req: FinalizeRequest) -> Result<Booking, EngineError> {
        validate_stay(&req.stay)?;
        validate_guest(&req.guest)?;
        if req.room_ids.is_empty() {
            return Err(EngineError::InvalidField("no rooms in booking".into()));
        }
        let mut sorted_ids = req.room_ids.clone();
        sorted_ids.sort_unstable();
        sorted_ids.dedup();
        if sorted_ids.len() != req.room_ids.len() {
            return Err(EngineError::InvalidField("duplicate room in booking".into()));
        }
        if self.bookings.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let hold = match req.reservation_id {
            Some(res_id) => {
                let res = self
                    .reservations
                    .get(&res_id)
                    .map(|r| r.clone())
                    .ok_or(EngineError::NotFound(res_id))?;
                if res.stay != req.stay {
                    return Err(EngineError::InvalidField(
                        "booking dates differ from the hold".into(),
                    ));
                }
                if !req.room_ids.contains(&res.room.room_id) {
                    return Err(EngineError::InvalidField(
                        "booking does not include the held room".into(),
                    ));
                }
                Some(res)
            }
            None => None,
        };

        // Price re-validation. The held room keeps its quoted rate; any
        // additional room is priced at the current category rate.
        let nights = req.stay.nights();
        let mut rooms = Vec::with_capacity(req.room_ids.len());
        for &room_id in &req.room_ids {
            let price_per_night = match &hold {
                Some(res) if res.room.room_id == room_id => res.room.price_per_night,
                _ => {
                    let room = self
                        .get_room(&room_id)
                        .ok_or(EngineError::NotFound(room_id))?;
                    let category_id = room.read().await.category_id;
                    let category = self
                        .categories
                        .get(&category_id)
                        .map(|c| *c.value())
                        .ok_or(EngineError::NotFound(category_id))?;
                    pricing::nightly_rate(category.base_price, category.discount_percent)
                }
            };
            rooms.push(BookedRoom {
                room_id,
                price_per_night,
                nights,
                subtotal: price_per_night * nights,
            });
        }
        let subtotal: Money = rooms.iter().map(|r| r.subtotal).sum();
        let tax = pricing::tax_on(subtotal);
        let total = subtotal + tax;
        if total != req.declared_total {
            metrics::counter!(crate::observability::PRICE_MISMATCHES_TOTAL).increment(1);
            return Err(EngineError::PriceMismatch {
                expected: total,
                declared: req.declared_total,
            });
        }

        let mut last_err = EngineError::WalError("finalize retries exhausted".into());
        for _ in 0..limits::FINALIZE_RETRIES {
            match self
                .try_commit_booking(&req, &hold, &rooms, &sorted_ids, subtotal, tax, total)
                .await
            {
                Ok(booking) => return Ok(booking),
                // Only transient storage failures are worth another attempt
                Err(e @ EngineError::WalError(_)) => last_err = e,
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_commit_booking(
        &self,
        req: &FinalizeRequest,
        hold: &Option<Reservation>,
        rooms: &[BookedRoom],
        sorted_ids: &[Ulid],
        subtotal: Money,
        tax: Money,
        total: Money,
    ) -> Result<Booking, EngineError> {
        let now = now_ms();
        if let Some(res) = hold {
            // Projection check: the stored record may still say pending.
            let current = self
                .reservations
                .get(&res.id)
                .ok_or(EngineError::NotFound(res.id))?;
            match current.effective_status(now) {
                ReservationStatus::Pending => {}
                ReservationStatus::Expired => return Err(EngineError::HoldExpired(res.id)),
                ReservationStatus::Cancelled => return Err(EngineError::AlreadyCancelled(res.id)),
                ReservationStatus::Confirmed => {
                    return Err(EngineError::InvalidField(
                        "reservation already finalized".into(),
                    ));
                }
            }
        }

        // Sorted acquisition keeps concurrent multi-room finalizes deadlock
        // free. Validate every room before committing anything.
        let mut guards: Vec<OwnedRwLockWriteGuard<RoomState>> =
            Vec::with_capacity(sorted_ids.len());
        for room_id in sorted_ids {
            let room = self
                .get_room(room_id)
                .ok_or(EngineError::NotFound(*room_id))?;
            guards.push(room.write_owned().await);
        }
        let exclude = req.reservation_id;
        for guard in &guards {
            if !room_is_free(guard, &req.stay, now, exclude) {
                metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(EngineError::RoomUnavailable(guard.id));
            }
        }

        let (status, payment_status) = match req.method {
            PaymentMethod::Cash => (BookingStatus::ConfirmedUnpaid, PaymentStatus::Pending),
            PaymentMethod::Card | PaymentMethod::Transfer => {
                (BookingStatus::Confirmed, PaymentStatus::Completed)
            }
        };
        let payment = Payment {
            id: Ulid::new(),
            booking_id: req.id,
            amount: total,
            method: req.method,
            status: payment_status,
            transaction_id: None,
        };
        let booking = Booking {
            id: req.id,
            reservation_id: req.reservation_id,
            guest: req.guest.clone(),
            stay: req.stay,
            adults: req.adults,
            children: req.children,
            rooms: rooms.to_vec(),
            subtotal,
            tax,
            total,
            status,
            payment_id: payment.id,
        };

        let event = Event::BookingCreated {
            booking: booking.clone(),
            payment: payment.clone(),
        };
        self.wal_append(&event).await?;

        for guard in &mut guards {
            if let Some(res_id) = req.reservation_id {
                guard.remove_stay(res_id);
            }
            guard.insert_stay(Stay {
                entity_id: booking.id,
                range: booking.stay,
                kind: StayKind::Booked,
            });
            guard.status = RoomStatus::Reserved;
        }
        if let Some(res_id) = req.reservation_id
            && let Some(mut res) = self.reservations.get_mut(&res_id)
        {
            res.status = ReservationStatus::Confirmed;
        }
        self.payments.insert(payment.id, payment);
        self.bookings.insert(booking.id, booking.clone());
        for guard in &guards {
            self.notify.send(
                &room_channel(guard.id),
                &Notice::Domain {
                    event: event.clone(),
                },
            );
        }
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        Ok(booking)
    }

    /// Move a booking along its lifecycle. Submitting the current status is
    /// a no-op; anything outside the transition table is rejected.
    ///
    /// The checked-out transition marks every booked room dirty and emits
    /// one cleaning notice per room. The transition check runs under the
    /// booking's room locks, so checked-in → checked-out fires once and the
    /// notice fires exactly once per checkout.
    pub async fn advance_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<(), EngineError> {
        let booking = self
            .bookings
            .get(&id)
            .map(|b| b.clone())
            .ok_or(EngineError::NotFound(id))?;

        let mut sorted_ids: Vec<Ulid> = booking.rooms.iter().map(|r| r.room_id).collect();
        sorted_ids.sort_unstable();
        let mut guards = Vec::with_capacity(sorted_ids.len());
        for room_id in &sorted_ids {
            let room = self
                .get_room(room_id)
                .ok_or(EngineError::NotFound(*room_id))?;
            guards.push(room.write_owned().await);
        }

        // Re-read under the room locks. A concurrent submission of the same
        // status loses the lock race, observes the transition already
        // applied, and lands on the no-op path.
        let current = self
            .bookings
            .get(&id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound(id))?;
        if current == status {
            return Ok(());
        }
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: current,
                to: status,
            });
        }

        let event = Event::BookingStatusSet { id, status };
        self.wal_append(&event).await?;

        if let Some(mut b) = self.bookings.get_mut(&id) {
            b.status = status;
        }
        if status == BookingStatus::Confirmed
            && let Some(mut payment) = self.payments.get_mut(&booking.payment_id)
        {
            payment.status = PaymentStatus::Completed;
        }
        for guard in &mut guards {
            match status {
                BookingStatus::CheckedIn => guard.status = RoomStatus::Occupied,
                BookingStatus::CheckedOut => {
                    guard.status = RoomStatus::Dirty;
                    self.notify.send(
                        HOUSEKEEPING_CHANNEL,
                        &Notice::CleaningRequested {
                            room_id: guard.id,
                            booking_code: id.to_string(),
                        },
                    );
                    self.notify.send(
                        STAFF_CHANNEL,
                        &Notice::TaskAssigned {
                            message: format!("clean room {} after checkout {}", guard.id, id),
                            link: format!("/rooms/{}", guard.id),
                        },
                    );
                }
                BookingStatus::Cancelled => {
                    guard.remove_stay(id);
                    guard.status = RoomStatus::Available;
                }
                _ => {}
            }
            self.notify.send(
                &room_channel(guard.id),
                &Notice::Domain {
                    event: event.clone(),
                },
            );
        }
        Ok(())
    }
}
