mod booking;
mod error;
mod holds;
mod pool;
mod queries;
mod rooms;

pub use booking::FinalizeRequest;
pub use error::EngineError;
pub use queries::{AvailabilityRow, BookingRow, PoolSlotRow, ReservationRow, RoomRow};
pub use rooms::room_is_free;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type SharedSlotState = Arc<RwLock<PoolSlotState>>;

pub fn now_ms() -> Ms {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

// ── Group-commit WAL channel ────────────────────────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch before the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes don't
    // leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// In-memory state for one property, rebuilt from the WAL at startup.
///
/// Concurrency model: the catalog and record maps are concurrent maps; each
/// room and pool slot carries its own async RwLock. Every mutation appends a
/// single event to the WAL while holding the write locks it needs, so the
/// availability check and the state write for a room (or the capacity check
/// and increment for a slot) are one atomic step.
pub struct Engine {
    pub categories: DashMap<Ulid, Category>,
    pub rooms: DashMap<Ulid, SharedRoomState>,
    /// Category → room ids, kept sorted ascending for lowest-id allocation.
    pub(super) rooms_by_category: DashMap<Ulid, Vec<Ulid>>,
    /// Reservation records, never physically deleted.
    pub reservations: DashMap<Ulid, Reservation>,
    pub bookings: DashMap<Ulid, Booking>,
    pub payments: DashMap<Ulid, Payment>,
    pub slots: DashMap<Ulid, SharedSlotState>,
    /// (date, start_time) uniqueness index for pool slots.
    pub(super) slot_by_time: DashMap<(Day, Ms), Ulid>,
    /// Pool reservation id → slot id.
    pub(super) slot_for_reservation: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            categories: DashMap::new(),
            rooms: DashMap::new(),
            rooms_by_category: DashMap::new(),
            reservations: DashMap::new(),
            bookings: DashMap::new(),
            payments: DashMap::new(),
            slots: DashMap::new(),
            slot_by_time: DashMap::new(),
            slot_for_reservation: DashMap::new(),
            wal_tx,
            notify,
        };

        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    /// Apply one replayed event. We are the sole owner of every lock here,
    /// so try_write always succeeds instantly. Never blocking_write: replay
    /// may run inside an async context (lazy property creation).
    fn replay_event(&self, event: &Event) {
        match event {
            Event::CategoryCreated {
                id,
                base_price,
                discount_percent,
            }
            | Event::CategoryUpdated {
                id,
                base_price,
                discount_percent,
            } => {
                self.categories.insert(
                    *id,
                    Category {
                        id: *id,
                        base_price: *base_price,
                        discount_percent: *discount_percent,
                    },
                );
            }
            Event::RoomCreated { id, category_id } => {
                self.rooms.insert(
                    *id,
                    Arc::new(RwLock::new(RoomState::new(*id, *category_id))),
                );
                let mut ids = self.rooms_by_category.entry(*category_id).or_default();
                ids.push(*id);
                ids.sort_unstable();
            }
            Event::RoomStatusSet { id, status } => {
                if let Some(entry) = self.rooms.get(id) {
                    let room = entry.clone();
                    let mut guard = room.try_write().expect("replay: uncontended write");
                    guard.status = *status;
                }
            }
            Event::HoldCreated { reservation } => {
                if reservation.status == ReservationStatus::Pending
                    && let Some(entry) = self.rooms.get(&reservation.room.room_id)
                {
                    let room = entry.clone();
                    let mut guard = room.try_write().expect("replay: uncontended write");
                    guard.insert_stay(Stay {
                        entity_id: reservation.id,
                        range: reservation.stay,
                        kind: StayKind::Hold {
                            expires_at: reservation.expires_at,
                        },
                    });
                }
                self.reservations
                    .insert(reservation.id, reservation.clone());
            }
            Event::ReservationExpired { id, room_id } => {
                if let Some(mut res) = self.reservations.get_mut(id) {
                    res.status = ReservationStatus::Expired;
                }
                self.remove_stay_replay(room_id, *id);
            }
            Event::ReservationCancelled { id, room_id } => {
                if let Some(mut res) = self.reservations.get_mut(id) {
                    res.status = ReservationStatus::Cancelled;
                }
                self.remove_stay_replay(room_id, *id);
            }
            Event::BookingCreated { booking, payment } => {
                if booking.status != BookingStatus::Cancelled {
                    for br in &booking.rooms {
                        if let Some(entry) = self.rooms.get(&br.room_id) {
                            let room = entry.clone();
                            let mut guard = room.try_write().expect("replay: uncontended write");
                            if let Some(res_id) = booking.reservation_id {
                                guard.remove_stay(res_id);
                            }
                            guard.insert_stay(Stay {
                                entity_id: booking.id,
                                range: booking.stay,
                                kind: StayKind::Booked,
                            });
                            if let Some(status) = room_status_for(booking.status) {
                                guard.status = status;
                            }
                        }
                    }
                }
                if let Some(res_id) = booking.reservation_id
                    && let Some(mut res) = self.reservations.get_mut(&res_id)
                {
                    res.status = ReservationStatus::Confirmed;
                }
                self.payments.insert(payment.id, payment.clone());
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingStatusSet { id, status } => {
                if let Some(mut booking) = self.bookings.get_mut(id) {
                    booking.status = *status;
                    if *status == BookingStatus::Confirmed
                        && let Some(mut payment) = self.payments.get_mut(&booking.payment_id)
                    {
                        payment.status = PaymentStatus::Completed;
                    }
                    for br in booking.rooms.clone() {
                        if let Some(entry) = self.rooms.get(&br.room_id) {
                            let room = entry.clone();
                            let mut guard = room.try_write().expect("replay: uncontended write");
                            if *status == BookingStatus::Cancelled {
                                guard.remove_stay(*id);
                            }
                            if let Some(rs) = room_status_for(*status) {
                                guard.status = rs;
                            } else if *status == BookingStatus::Cancelled {
                                guard.status = RoomStatus::Available;
                            }
                        }
                    }
                }
            }
            Event::PoolSlotCreated {
                id,
                date,
                start_time,
                max_people,
            } => {
                self.slots.insert(
                    *id,
                    Arc::new(RwLock::new(PoolSlotState::new(
                        *id,
                        *date,
                        *start_time,
                        *max_people,
                    ))),
                );
                self.slot_by_time.insert((*date, *start_time), *id);
            }
            Event::PoolSlotReserved { reservation } => {
                if let Some(entry) = self.slots.get(&reservation.slot_id) {
                    let slot = entry.clone();
                    let mut guard = slot.try_write().expect("replay: uncontended write");
                    if reservation.status != PoolReservationStatus::Cancelled {
                        guard.try_occupy();
                    }
                    guard.reservations.push(reservation.clone());
                    self.slot_for_reservation
                        .insert(reservation.id, reservation.slot_id);
                }
            }
            Event::PoolReservationCancelled { id, slot_id } => {
                if let Some(entry) = self.slots.get(slot_id) {
                    let slot = entry.clone();
                    let mut guard = slot.try_write().expect("replay: uncontended write");
                    if let Some(r) = guard.reservation_mut(*id)
                        && r.status != PoolReservationStatus::Cancelled
                    {
                        r.status = PoolReservationStatus::Cancelled;
                        guard.release();
                    }
                }
            }
            Event::PoolReservationCompleted { id, slot_id } => {
                if let Some(entry) = self.slots.get(slot_id) {
                    let slot = entry.clone();
                    let mut guard = slot.try_write().expect("replay: uncontended write");
                    if let Some(r) = guard.reservation_mut(*id) {
                        r.status = PoolReservationStatus::Completed;
                    }
                }
            }
        }
    }

    fn remove_stay_replay(&self, room_id: &Ulid, entity_id: Ulid) {
        if let Some(entry) = self.rooms.get(room_id) {
            let room = entry.clone();
            let mut guard = room.try_write().expect("replay: uncontended write");
            guard.remove_stay(entity_id);
        }
    }

    /// Write an event to the WAL via the background group-commit writer.
    /// Callers hold whatever locks make the subsequent in-memory apply
    /// atomic with this append.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_slot(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the WAL as a minimal snapshot of current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let events = self.snapshot_events().await;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Minimal event list whose replay reproduces the current state.
    async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        for c in self.categories.iter() {
            events.push(Event::CategoryCreated {
                id: c.id,
                base_price: c.base_price,
                discount_percent: c.discount_percent,
            });
        }

        let mut room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        room_ids.sort_unstable();
        let mut room_statuses = Vec::with_capacity(room_ids.len());
        for id in &room_ids {
            let Some(room) = self.get_room(id) else {
                continue;
            };
            let guard = room.read().await;
            events.push(Event::RoomCreated {
                id: guard.id,
                category_id: guard.category_id,
            });
            room_statuses.push((guard.id, guard.status));
        }

        // Records carry their status, so replay restores stays and counters
        // from the creation events alone.
        for res in self.reservations.iter() {
            events.push(Event::HoldCreated {
                reservation: res.clone(),
            });
        }
        for booking in self.bookings.iter() {
            if let Some(payment) = self.payments.get(&booking.payment_id) {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                    payment: payment.clone(),
                });
            }
        }

        for entry in self.slots.iter() {
            let slot = entry.value().clone();
            let guard = slot.read().await;
            events.push(Event::PoolSlotCreated {
                id: guard.id,
                date: guard.date,
                start_time: guard.start_time,
                max_people: guard.max_people,
            });
            for r in &guard.reservations {
                events.push(Event::PoolSlotReserved {
                    reservation: r.clone(),
                });
            }
        }

        // Pin exact room statuses last; booking replay only approximates
        // them (housekeeping may have set cleaning/maintenance since).
        for (id, status) in room_statuses {
            events.push(Event::RoomStatusSet { id, status });
        }

        events
    }
}

/// Room status implied by a booking in the given status, if any.
fn room_status_for(status: BookingStatus) -> Option<RoomStatus> {
    match status {
        BookingStatus::PendingPayment
        | BookingStatus::Confirmed
        | BookingStatus::ConfirmedUnpaid => Some(RoomStatus::Reserved),
        BookingStatus::CheckedIn => Some(RoomStatus::Occupied),
        BookingStatus::CheckedOut => Some(RoomStatus::Dirty),
        BookingStatus::Cancelled => None,
    }
}
