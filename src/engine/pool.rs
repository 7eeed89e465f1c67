//! Pool slot allocation: capacity-counted reservations against fixed slots.

use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use super::rooms::validate_guest;
use super::{Engine, EngineError, now_ms};
use crate::limits;
use crate::model::*;
use crate::notify::{Notice, slot_channel};

impl Engine {
    /// Create a slot. `(date, start_time)` is unique per property.
    pub async fn create_pool_slot(
        &self,
        id: Ulid,
        date: Day,
        start_time: Ms,
        max_people: u32,
    ) -> Result<(), EngineError> {
        if date.0 < limits::MIN_DAY || date.0 > limits::MAX_DAY {
            return Err(EngineError::InvalidDateRange(
                "slot date outside the bookable horizon".into(),
            ));
        }
        if max_people == 0 || max_people > limits::MAX_SLOT_CAPACITY {
            return Err(EngineError::InvalidField(
                "max_people out of range".into(),
            ));
        }
        if self.slots.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.slots.len() >= limits::MAX_POOL_SLOTS {
            return Err(EngineError::LimitExceeded("pool slots"));
        }
        if let Some(existing) = self.slot_by_time.get(&(date, start_time)) {
            return Err(EngineError::AlreadyExists(*existing.value()));
        }
        let event = Event::PoolSlotCreated {
            id,
            date,
            start_time,
            max_people,
        };
        self.wal_append(&event).await?;
        self.slots.insert(
            id,
            Arc::new(RwLock::new(PoolSlotState::new(id, date, start_time, max_people))),
        );
        self.slot_by_time.insert((date, start_time), id);
        Ok(())
    }

    /// Reserve one spot in a slot. The capacity check and the counter
    /// increment happen under the slot's write lock, so oversubscription is
    /// impossible no matter how many reservations race.
    pub async fn reserve_pool_slot(
        &self,
        id: Ulid,
        slot_id: Ulid,
        guest: &str,
    ) -> Result<PoolReservation, EngineError> {
        validate_guest(guest)?;
        if self.slot_for_reservation.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let slot = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = slot.write().await;
        if guard.reserved() >= guard.max_people {
            metrics::counter!(crate::observability::POOL_SLOT_FULL_TOTAL).increment(1);
            return Err(EngineError::SlotFull(slot_id));
        }

        let reservation = PoolReservation {
            id,
            slot_id,
            guest: guest.to_string(),
            status: PoolReservationStatus::Confirmed,
            created_at: now_ms(),
        };
        let event = Event::PoolSlotReserved {
            reservation: reservation.clone(),
        };
        self.wal_append(&event).await?;
        // Cannot fail: capacity was checked above under this same lock
        let occupied = guard.try_occupy();
        debug_assert!(occupied);
        guard.reservations.push(reservation.clone());
        self.slot_for_reservation.insert(id, slot_id);
        self.notify
            .send(&slot_channel(slot_id), &Notice::Domain { event });
        Ok(reservation)
    }

    /// Cancel a pool reservation: mark it cancelled and free its spot, as
    /// one committed event. Cancelling twice fails and never double-frees.
    pub async fn cancel_pool_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let slot_id = self
            .slot_for_reservation
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let slot = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = slot.write().await;
        match guard.reservation(id).map(|r| r.status) {
            None => return Err(EngineError::NotFound(id)),
            Some(PoolReservationStatus::Cancelled) => {
                return Err(EngineError::AlreadyCancelled(id));
            }
            Some(PoolReservationStatus::Completed) => {
                return Err(EngineError::InvalidField(
                    "completed reservation cannot be cancelled".into(),
                ));
            }
            Some(PoolReservationStatus::Confirmed) => {}
        }
        let event = Event::PoolReservationCancelled { id, slot_id };
        self.wal_append(&event).await?;
        if let Some(r) = guard.reservation_mut(id) {
            r.status = PoolReservationStatus::Cancelled;
        }
        guard.release();
        self.notify
            .send(&slot_channel(slot_id), &Notice::Domain { event });
        Ok(())
    }

    /// Mark a confirmed reservation as used. The counter is untouched; a
    /// completed reservation still holds its spot for the slot's duration.
    pub async fn complete_pool_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let slot_id = self
            .slot_for_reservation
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let slot = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = slot.write().await;
        match guard.reservation(id).map(|r| r.status) {
            None => return Err(EngineError::NotFound(id)),
            Some(PoolReservationStatus::Cancelled) => {
                return Err(EngineError::AlreadyCancelled(id));
            }
            Some(PoolReservationStatus::Completed) => return Ok(()),
            Some(PoolReservationStatus::Confirmed) => {}
        }
        let event = Event::PoolReservationCompleted { id, slot_id };
        self.wal_append(&event).await?;
        if let Some(r) = guard.reservation_mut(id) {
            r.status = PoolReservationStatus::Completed;
        }
        self.notify
            .send(&slot_channel(slot_id), &Notice::Domain { event });
        Ok(())
    }
}
