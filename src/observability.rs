use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "innkeep_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "innkeep_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "innkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "innkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeep_connections_rejected_total";

/// Gauge: number of active properties (loaded engines).
pub const PROPERTIES_ACTIVE: &str = "innkeep_properties_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "innkeep_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

// ── Domain metrics ──────────────────────────────────────────────────────────

/// Counter: holds placed.
pub const HOLDS_CREATED_TOTAL: &str = "innkeep_holds_created_total";

/// Counter: holds reaped after TTL.
pub const HOLDS_EXPIRED_TOTAL: &str = "innkeep_holds_expired_total";

/// Counter: bookings committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "innkeep_bookings_created_total";

/// Counter: finalizes rejected because a room was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "innkeep_booking_conflicts_total";

/// Counter: finalizes rejected on price re-validation.
pub const PRICE_MISMATCHES_TOTAL: &str = "innkeep_price_mismatches_total";

/// Counter: pool reservations refused at capacity.
pub const POOL_SLOT_FULL_TOTAL: &str = "innkeep_pool_slot_full_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCategory { .. } => "insert_category",
        Command::UpdateCategory { .. } => "update_category",
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoomStatus { .. } => "update_room_status",
        Command::InsertHold { .. } => "insert_hold",
        Command::DeleteHold { .. } => "delete_hold",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::InsertPoolSlot { .. } => "insert_pool_slot",
        Command::InsertPoolReservation { .. } => "insert_pool_reservation",
        Command::DeletePoolReservation { .. } => "delete_pool_reservation",
        Command::CompletePoolReservation { .. } => "complete_pool_reservation",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectPoolSlots { .. } => "select_pool_slots",
        Command::SelectPoolReservations { .. } => "select_pool_reservations",
        Command::Listen { .. } => "listen",
    }
}
