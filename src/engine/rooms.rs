//! Catalog mutations and room availability.
//!
//! Availability is purely a question of date-range claims: a room is free
//! for a stay iff no live claim overlaps it. The operational room status
//! (dirty, cleaning, maintenance) is housekeeping state and does not enter
//! the overlap check.

use ulid::Ulid;

use super::{Engine, EngineError, now_ms};
use crate::limits;
use crate::model::*;

/// Whether a room is free for `want`, judged against its recorded claims.
///
/// A hold whose TTL has passed no longer blocks, whether or not the reaper
/// has persisted the expiry. `exclude` skips the claim owned by that entity
/// so a hold can be re-validated without conflicting with itself.
pub fn room_is_free(room: &RoomState, want: &StayRange, now: Ms, exclude: Option<Ulid>) -> bool {
    for stay in room.overlapping(want) {
        if Some(stay.entity_id) == exclude {
            continue;
        }
        match stay.kind {
            StayKind::Hold { expires_at } if now > expires_at => continue,
            StayKind::Hold { .. } | StayKind::Booked => return false,
        }
    }
    true
}

pub(super) fn validate_stay(range: &StayRange) -> Result<(), EngineError> {
    if range.check_in >= range.check_out {
        return Err(EngineError::InvalidDateRange(
            "check-in must precede check-out".into(),
        ));
    }
    if range.check_in.0 < limits::MIN_DAY || range.check_out.0 > limits::MAX_DAY {
        return Err(EngineError::InvalidDateRange(
            "stay outside the bookable horizon".into(),
        ));
    }
    if range.nights() > limits::MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay length"));
    }
    Ok(())
}

pub(super) fn validate_guest(guest: &str) -> Result<(), EngineError> {
    if guest.trim().is_empty() {
        return Err(EngineError::InvalidField("guest must not be empty".into()));
    }
    if guest.len() > limits::MAX_GUEST_LEN {
        return Err(EngineError::LimitExceeded("guest name length"));
    }
    Ok(())
}

fn validate_category(base_price: Money, discount_percent: u32) -> Result<(), EngineError> {
    if base_price <= 0 {
        return Err(EngineError::InvalidField(
            "base_price must be positive".into(),
        ));
    }
    if discount_percent >= 100 {
        return Err(EngineError::InvalidField(
            "discount_percent must be below 100".into(),
        ));
    }
    Ok(())
}

impl Engine {
    pub async fn create_category(
        &self,
        id: Ulid,
        base_price: Money,
        discount_percent: u32,
    ) -> Result<(), EngineError> {
        validate_category(base_price, discount_percent)?;
        if self.categories.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.categories.len() >= limits::MAX_CATEGORIES {
            return Err(EngineError::LimitExceeded("categories"));
        }
        let event = Event::CategoryCreated {
            id,
            base_price,
            discount_percent,
        };
        self.wal_append(&event).await?;
        self.categories.insert(
            id,
            Category {
                id,
                base_price,
                discount_percent,
            },
        );
        Ok(())
    }

    /// Reprices the category for future quotes. Existing holds and bookings
    /// keep the prices they were created with.
    pub async fn update_category(
        &self,
        id: Ulid,
        base_price: Money,
        discount_percent: u32,
    ) -> Result<(), EngineError> {
        validate_category(base_price, discount_percent)?;
        if !self.categories.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::CategoryUpdated {
            id,
            base_price,
            discount_percent,
        };
        self.wal_append(&event).await?;
        self.categories.insert(
            id,
            Category {
                id,
                base_price,
                discount_percent,
            },
        );
        Ok(())
    }

    pub async fn create_room(&self, id: Ulid, category_id: Ulid) -> Result<(), EngineError> {
        if !self.categories.contains_key(&category_id) {
            return Err(EngineError::NotFound(category_id));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.rooms.len() >= limits::MAX_ROOMS {
            return Err(EngineError::LimitExceeded("rooms"));
        }
        let event = Event::RoomCreated { id, category_id };
        self.wal_append(&event).await?;
        self.rooms.insert(
            id,
            std::sync::Arc::new(tokio::sync::RwLock::new(RoomState::new(id, category_id))),
        );
        let mut ids = self.rooms_by_category.entry(category_id).or_default();
        ids.push(id);
        ids.sort_unstable();
        Ok(())
    }

    /// Housekeeping status change (cleaning started, maintenance, back in
    /// service). Allocation state is untouched.
    pub async fn set_room_status(&self, id: Ulid, status: RoomStatus) -> Result<(), EngineError> {
        let room = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = room.write().await;
        let event = Event::RoomStatusSet { id, status };
        self.wal_append(&event).await?;
        guard.status = status;
        self.notify.send(
            &crate::notify::room_channel(id),
            &crate::notify::Notice::Domain { event },
        );
        Ok(())
    }

    /// All rooms in the category free for the stay, lowest id first.
    pub async fn available_rooms(
        &self,
        category_id: Ulid,
        range: &StayRange,
    ) -> Result<Vec<Ulid>, EngineError> {
        validate_stay(range)?;
        if !self.categories.contains_key(&category_id) {
            return Err(EngineError::NotFound(category_id));
        }
        let candidates = self.sorted_rooms_in(category_id);
        let now = now_ms();
        let mut free = Vec::new();
        for room_id in candidates {
            let Some(room) = self.get_room(&room_id) else {
                continue;
            };
            let guard = room.read().await;
            if room_is_free(&guard, range, now, None) {
                free.push(room_id);
            }
        }
        Ok(free)
    }

    /// Point check for one room, optionally ignoring the claim held by
    /// `exclude` (a reservation re-validating its own hold).
    pub async fn is_room_available(
        &self,
        room_id: Ulid,
        range: &StayRange,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        validate_stay(range)?;
        let room = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = room.read().await;
        Ok(room_is_free(&guard, range, now_ms(), exclude))
    }

    /// Sorted snapshot of room ids for a category.
    pub(super) fn sorted_rooms_in(&self, category_id: Ulid) -> Vec<Ulid> {
        self.rooms_by_category
            .get(&category_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }
}
