use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use innkeep::tenant::PropertyManager;
use innkeep::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<PropertyManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("innkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let pm = Arc::new(PropertyManager::new(dir, 1000));

    let pm2 = pm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let pm = pm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, pm, "innkeep".to_string(), None).await;
            });
        }
    });

    (addr, pm)
}

async fn connect(addr: SocketAddr, property: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(property)
        .user("innkeep")
        .password("innkeep");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Data rows of a simple query result, as text columns.
fn data_rows(messages: Vec<SimpleQueryMessage>) -> Vec<Vec<String>> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(
                (0..row.len())
                    .map(|i| row.get(i).unwrap_or("").to_string())
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

async fn create_category_with_rooms(
    client: &tokio_postgres::Client,
    n_rooms: usize,
) -> (Ulid, Vec<Ulid>) {
    let category_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO categories (id, base_price, discount_percent) VALUES ('{category_id}', 200, 15)"
        ))
        .await
        .unwrap();

    let mut rooms: Vec<Ulid> = (0..n_rooms).map(|_| Ulid::new()).collect();
    rooms.sort_unstable();
    for room_id in &rooms {
        client
            .batch_execute(&format!(
                "INSERT INTO rooms (id, category_id) VALUES ('{room_id}', '{category_id}')"
            ))
            .await
            .unwrap();
    }
    (category_id, rooms)
}

fn db_message(err: tokio_postgres::Error) -> String {
    err.as_db_error()
        .map(|e| e.message().to_string())
        .unwrap_or_else(|| err.to_string())
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn availability_lists_free_rooms_lowest_first() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "seaside").await;

    let (category_id, rooms) = create_category_with_rooms(&client, 2).await;

    let result = client
        .simple_query(&format!(
            "SELECT * FROM availability WHERE category_id = '{category_id}' \
             AND check_in = '2026-03-01' AND check_out = '2026-03-04'"
        ))
        .await
        .unwrap();
    let rows = data_rows(result);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], rooms[0].to_string());
    assert_eq!(rows[1][0], rooms[1].to_string());
    assert_eq!(rows[0][1], "2026-03-01");
    assert_eq!(rows[0][2], "2026-03-04");
}

#[tokio::test]
async fn hold_then_finalize_card() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "seaside").await;

    let (category_id, rooms) = create_category_with_rooms(&client, 1).await;

    let hold_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO holds (id, category_id, guest, check_in, check_out, adults, children) \
             VALUES ('{hold_id}', '{category_id}', 'Ada Lovelace', '2026-03-01', '2026-03-04', 2, 0)"
        ))
        .await
        .unwrap();

    // The quote: 200/night with 15% off over 3 nights
    let rows = data_rows(client.simple_query("SELECT * FROM reservations").await.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], hold_id.to_string());
    assert_eq!(rows[0][2], rooms[0].to_string());
    assert_eq!(rows[0][7], "170"); // price_per_night
    assert_eq!(rows[0][8], "510"); // subtotal
    assert_eq!(rows[0][9], "77"); // tax
    assert_eq!(rows[0][10], "587"); // total
    assert_eq!(rows[0][11], "pending");

    // The held room no longer shows as available
    let avail = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE category_id = '{category_id}' \
                 AND check_in = '2026-03-01' AND check_out = '2026-03-04'"
            ))
            .await
            .unwrap(),
    );
    assert!(avail.is_empty());

    let booking_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, hold_id, guest, room_id, check_in, check_out, adults, children, method, declared_total) \
             VALUES ('{booking_id}', '{hold_id}', 'Ada Lovelace', '{r}', '2026-03-01', '2026-03-04', 2, 0, 'card', 587)",
            r = rooms[0]
        ))
        .await
        .unwrap();

    let rows = data_rows(client.simple_query("SELECT * FROM bookings").await.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], booking_id.to_string());
    assert_eq!(rows[0][7], "587"); // total
    assert_eq!(rows[0][8], "confirmed");
    assert_eq!(rows[0][9], "card");
    assert_eq!(rows[0][10], "completed");

    // The hold is confirmed, not pending
    let rows = data_rows(client.simple_query("SELECT * FROM reservations").await.unwrap());
    assert_eq!(rows[0][11], "confirmed");
}

#[tokio::test]
async fn cash_booking_is_confirmed_unpaid() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "seaside").await;

    let (_, rooms) = create_category_with_rooms(&client, 1).await;

    let booking_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, hold_id, guest, room_id, check_in, check_out, adults, children, method, declared_total) \
             VALUES ('{booking_id}', NULL, 'Grace Hopper', '{r}', '2026-03-01', '2026-03-04', 1, 0, 'cash', 587)",
            r = rooms[0]
        ))
        .await
        .unwrap();

    let rows = data_rows(client.simple_query("SELECT * FROM bookings").await.unwrap());
    assert_eq!(rows[0][8], "confirmed_unpaid");
    assert_eq!(rows[0][10], "pending");

    // Settling confirms the booking and completes the payment
    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'confirmed' WHERE id = '{booking_id}'"
        ))
        .await
        .unwrap();
    let rows = data_rows(client.simple_query("SELECT * FROM bookings").await.unwrap());
    assert_eq!(rows[0][8], "confirmed");
    assert_eq!(rows[0][10], "completed");
}

#[tokio::test]
async fn price_mismatch_is_rejected() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "seaside").await;

    let (_, rooms) = create_category_with_rooms(&client, 1).await;

    let booking_id = Ulid::new();
    let err = client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, hold_id, guest, room_id, check_in, check_out, adults, children, method, declared_total) \
             VALUES ('{booking_id}', NULL, 'Ada', '{r}', '2026-03-01', '2026-03-04', 2, 0, 'card', 500)",
            r = rooms[0]
        ))
        .await
        .unwrap_err();
    let msg = db_message(err);
    assert!(msg.contains("price mismatch"), "got: {msg}");
    assert!(msg.contains("587"), "got: {msg}");

    let rows = data_rows(client.simple_query("SELECT * FROM bookings").await.unwrap());
    assert!(rows.is_empty());
}

#[tokio::test]
async fn double_booking_is_rejected() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "seaside").await;

    let (_, rooms) = create_category_with_rooms(&client, 1).await;
    let r = rooms[0];

    let first = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, hold_id, guest, room_id, check_in, check_out, adults, children, method, declared_total) \
             VALUES ('{first}', NULL, 'Ada', '{r}', '2026-03-01', '2026-03-04', 2, 0, 'card', 587)"
        ))
        .await
        .unwrap();

    let second = Ulid::new();
    let err = client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, hold_id, guest, room_id, check_in, check_out, adults, children, method, declared_total) \
             VALUES ('{second}', NULL, 'Grace', '{r}', '2026-03-03', '2026-03-06', 2, 0, 'card', 587)"
        ))
        .await
        .unwrap_err();
    assert!(db_message(err).contains("no longer available"));

    // Back-to-back on the boundary day is fine
    let third = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, hold_id, guest, room_id, check_in, check_out, adults, children, method, declared_total) \
             VALUES ('{third}', NULL, 'Grace', '{r}', '2026-03-04', '2026-03-07', 2, 0, 'card', 587)"
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn booking_lifecycle_over_the_wire() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "seaside").await;

    let (_, rooms) = create_category_with_rooms(&client, 1).await;

    let booking_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, hold_id, guest, room_id, check_in, check_out, adults, children, method, declared_total) \
             VALUES ('{booking_id}', NULL, 'Ada', '{r}', '2026-03-01', '2026-03-04', 2, 0, 'card', 587)",
            r = rooms[0]
        ))
        .await
        .unwrap();

    // Checking out before checking in is rejected
    let err = client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'checked_out' WHERE id = '{booking_id}'"
        ))
        .await
        .unwrap_err();
    assert!(db_message(err).contains("invalid booking transition"));

    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'checked_in' WHERE id = '{booking_id}'"
        ))
        .await
        .unwrap();
    let rows = data_rows(client.simple_query("SELECT * FROM rooms").await.unwrap());
    assert_eq!(rows[0][2], "occupied");

    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'checked_out' WHERE id = '{booking_id}'"
        ))
        .await
        .unwrap();
    let rows = data_rows(client.simple_query("SELECT * FROM rooms").await.unwrap());
    assert_eq!(rows[0][2], "dirty");

    // Housekeeping puts the room back in service
    client
        .batch_execute(&format!(
            "UPDATE rooms SET status = 'available' WHERE id = '{r}'",
            r = rooms[0]
        ))
        .await
        .unwrap();
    let rows = data_rows(client.simple_query("SELECT * FROM rooms").await.unwrap());
    assert_eq!(rows[0][2], "available");
}

#[tokio::test]
async fn cancelled_hold_frees_the_room() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "seaside").await;

    let (category_id, _) = create_category_with_rooms(&client, 1).await;

    let hold_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO holds (id, category_id, guest, check_in, check_out, adults, children) \
             VALUES ('{hold_id}', '{category_id}', 'Ada', '2026-03-01', '2026-03-04', 2, 0)"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!("DELETE FROM holds WHERE id = '{hold_id}'"))
        .await
        .unwrap();

    let avail = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE category_id = '{category_id}' \
                 AND check_in = '2026-03-01' AND check_out = '2026-03-04'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(avail.len(), 1);

    let rows = data_rows(client.simple_query("SELECT * FROM reservations").await.unwrap());
    assert_eq!(rows[0][11], "cancelled");
}

#[tokio::test]
async fn pool_slot_capacity_over_the_wire() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "seaside").await;

    let slot_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO pool_slots (id, date, start_time, max_people) \
             VALUES ('{slot_id}', '2026-07-01', 32400000, 2)"
        ))
        .await
        .unwrap();

    let first = Ulid::new();
    let second = Ulid::new();
    for (id, guest) in [(first, "Ada"), (second, "Grace")] {
        client
            .batch_execute(&format!(
                "INSERT INTO pool_reservations (id, slot_id, guest) VALUES ('{id}', '{slot_id}', '{guest}')"
            ))
            .await
            .unwrap();
    }

    let overflow = Ulid::new();
    let err = client
        .batch_execute(&format!(
            "INSERT INTO pool_reservations (id, slot_id, guest) VALUES ('{overflow}', '{slot_id}', 'Bob')"
        ))
        .await
        .unwrap_err();
    assert!(db_message(err).contains("pool slot full"));

    let rows = data_rows(client.simple_query("SELECT * FROM pool_slots").await.unwrap());
    assert_eq!(rows[0][3], "2"); // max_people
    assert_eq!(rows[0][4], "2"); // reserved

    // Cancelling frees a spot for the next guest
    client
        .batch_execute(&format!("DELETE FROM pool_reservations WHERE id = '{first}'"))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO pool_reservations (id, slot_id, guest) VALUES ('{overflow}', '{slot_id}', 'Bob')"
        ))
        .await
        .unwrap();

    // Completing keeps the spot occupied
    client
        .batch_execute(&format!(
            "UPDATE pool_reservations SET status = 'completed' WHERE id = '{second}'"
        ))
        .await
        .unwrap();
    let rows = data_rows(client.simple_query("SELECT * FROM pool_slots").await.unwrap());
    assert_eq!(rows[0][4], "2");
}

#[tokio::test]
async fn properties_are_isolated() {
    let (addr, _pm) = start_test_server().await;
    let seaside = connect(addr, "seaside").await;
    let alpine = connect(addr, "alpine").await;

    let (category_id, _) = create_category_with_rooms(&seaside, 1).await;

    let rows = data_rows(seaside.simple_query("SELECT * FROM rooms").await.unwrap());
    assert_eq!(rows.len(), 1);
    let rows = data_rows(alpine.simple_query("SELECT * FROM rooms").await.unwrap());
    assert!(rows.is_empty());

    // The category does not exist in the other property
    let err = alpine
        .simple_query(&format!(
            "SELECT * FROM availability WHERE category_id = '{category_id}' \
             AND check_in = '2026-03-01' AND check_out = '2026-03-04'"
        ))
        .await
        .unwrap_err();
    assert!(db_message(err).contains("not found"));
}

#[tokio::test]
async fn syntax_errors_are_reported() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "seaside").await;

    let err = client
        .batch_execute("INSERT INTO wardrobes (id) VALUES ('x')")
        .await
        .unwrap_err();
    let code = err.as_db_error().map(|e| e.code().code().to_string());
    assert_eq!(code.as_deref(), Some("42601"));

    let err = client
        .batch_execute(&format!(
            "UPDATE rooms SET status = 'sparkling' WHERE id = '{}'",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(
        err.as_db_error().map(|e| e.code().code().to_string()).as_deref(),
        Some("42601")
    );
}

#[tokio::test]
async fn domain_errors_use_p0001() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "seaside").await;

    // Room references a category that was never created
    let err = client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, category_id) VALUES ('{}', '{}')",
            Ulid::new(),
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(
        err.as_db_error().map(|e| e.code().code().to_string()).as_deref(),
        Some("P0001")
    );
}

#[tokio::test]
async fn reversed_date_range_is_rejected() {
    let (addr, _pm) = start_test_server().await;
    let client = connect(addr, "backwards").await;
    let (category_id, _rooms) = create_category_with_rooms(&client, 1).await;

    let err = client
        .simple_query(&format!(
            "SELECT * FROM availability WHERE category_id = '{category_id}' \
             AND check_in = '2026-03-05' AND check_out = '2026-03-01'"
        ))
        .await
        .unwrap_err();
    assert!(db_message(err).contains("invalid date range"));

    // Zero-night hold gets the same rejection
    let err = client
        .batch_execute(&format!(
            "INSERT INTO holds (id, category_id, guest, check_in, check_out, adults, children) \
             VALUES ('{}', '{category_id}', 'Ada', '2026-03-05', '2026-03-05', 2, 0)",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert!(db_message(err).contains("invalid date range"));

    // The connection survives the bad input
    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE category_id = '{category_id}' \
                 AND check_in = '2026-03-01' AND check_out = '2026-03-05'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (addr, _pm) = start_test_server().await;

    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("locked")
        .user("innkeep")
        .password("not-the-password");

    let err = config
        .connect(NoTls)
        .await
        .err()
        .expect("connection should fail");
    assert_eq!(err.code(), Some(&SqlState::INVALID_PASSWORD));
}
