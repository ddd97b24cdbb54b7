use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use roomkeep::engine::Engine;
use roomkeep::notify::NotificationDispatcher;
use roomkeep::payment::{PaymentGateway, PaymentNotification};
use roomkeep::wire;

const MERCHANT_ID: &str = "1211149";
const MERCHANT_SECRET: &str = "s3cret";

// ── Test infrastructure ──────────────────────────────────────

fn gateway() -> PaymentGateway {
    PaymentGateway::new(MERCHANT_ID, MERCHANT_SECRET, "LKR")
}

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("roomkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(
        Engine::new(
            dir.join("roomkeep.wal"),
            Arc::new(NotificationDispatcher::logging()),
            gateway(),
        )
        .unwrap(),
    );

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "roomkeep".to_string()).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("roomkeep")
        .user("admin")
        .password("roomkeep");
    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn select(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// SQLSTATE of a failed statement.
async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.batch_execute(sql).await.unwrap_err();
    err.as_db_error()
        .map(|db| db.code().code().to_string())
        .unwrap_or_else(|| panic!("expected a database error, got {err}"))
}

async fn create_room(client: &Client, rate: &str) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!("INSERT INTO rooms VALUES ('{id}', 'Room {id}', {rate})"))
        .await
        .unwrap();
    id
}

fn reservation_sql(id: Ulid, room: Ulid, check_in: &str, check_out: &str) -> String {
    format!(
        "INSERT INTO reservations VALUES ('{id}', '{room}', '{check_in}', '{check_out}', 2, 'Ann Perera', 'ann@example.com')"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn room_crud_over_wire() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let room = create_room(&client, "5000").await;
    let rows = select(&client, "SELECT * FROM rooms").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(room.to_string().as_str()));
    assert_eq!(rows[0].get("rate"), Some("5000.00"));
    assert_eq!(rows[0].get("status"), Some("available"));

    client
        .batch_execute(&format!(
            "INSERT INTO room_changes VALUES ('{room}', 'Garden Suite', '6500.50', 'maintenance')"
        ))
        .await
        .unwrap();
    let rows = select(&client, "SELECT * FROM rooms").await;
    assert_eq!(rows[0].get("name"), Some("Garden Suite"));
    assert_eq!(rows[0].get("rate"), Some("6500.50"));
    assert_eq!(rows[0].get("status"), Some("maintenance"));

    client
        .batch_execute(&format!("DELETE FROM rooms WHERE id = '{room}'"))
        .await
        .unwrap();
    assert!(select(&client, "SELECT * FROM rooms").await.is_empty());
}

#[tokio::test]
async fn booking_flow_over_wire() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = create_room(&client, "5000").await;

    let first = Ulid::new();
    client
        .batch_execute(&reservation_sql(first, room, "2031-03-10", "2031-03-13"))
        .await
        .unwrap();

    let rows = select(&client, &format!("SELECT * FROM reservations WHERE room_id = '{room}'")).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("nights"), Some("3"));
    assert_eq!(rows[0].get("total_amount"), Some("15000.00"));
    assert_eq!(rows[0].get("status"), Some("pending"));
    assert_eq!(rows[0].get("guest_name"), Some("Ann Perera"));

    // overlapping stay is refused with an exclusion violation
    let code = sqlstate(&client, &reservation_sql(Ulid::new(), room, "2031-03-12", "2031-03-15")).await;
    assert_eq!(code, "23P01");

    // back-to-back stay is fine
    client
        .batch_execute(&reservation_sql(Ulid::new(), room, "2031-03-13", "2031-03-14"))
        .await
        .unwrap();

    let dates = select(&client, &format!("SELECT * FROM unavailable_dates WHERE room_id = '{room}'")).await;
    let dates: Vec<&str> = dates.iter().filter_map(|r| r.get("date")).collect();
    assert_eq!(dates, ["2031-03-10", "2031-03-11", "2031-03-12", "2031-03-13"]);

    let preview = select(
        &client,
        &format!(
            "SELECT * FROM availability WHERE room_id = '{room}' AND check_in = '2031-03-11' AND check_out = '2031-03-12'"
        ),
    )
    .await;
    assert_eq!(preview[0].get("available"), Some("f"));
    assert_eq!(preview[0].get("conflicting_reservation"), Some(first.to_string().as_str()));

    client
        .batch_execute(&format!("INSERT INTO status_changes VALUES ('{first}', 'confirmed')"))
        .await
        .unwrap();
    let confirmed = select(&client, "SELECT * FROM reservations WHERE status = 'confirmed'").await;
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].get("id"), Some(first.to_string().as_str()));

    let checkout = select(
        &client,
        &format!("SELECT * FROM payment_checkout WHERE reservation_id = '{first}'"),
    )
    .await;
    assert_eq!(checkout[0].get("merchant_id"), Some(MERCHANT_ID));
    assert_eq!(checkout[0].get("amount"), Some("15000.00"));
    assert_eq!(checkout[0].get("hash").map(str::len), Some(32));

    client
        .batch_execute(&format!("DELETE FROM reservations WHERE id = '{first}'"))
        .await
        .unwrap();
    let rows = select(&client, &format!("SELECT * FROM reservations WHERE room_id = '{room}'")).await;
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn payment_notification_over_wire() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = create_room(&client, "5000").await;
    let reservation = Ulid::new();
    client
        .batch_execute(&reservation_sql(reservation, room, "2031-05-01", "2031-05-03"))
        .await
        .unwrap();

    let mut notification = PaymentNotification {
        merchant_id: MERCHANT_ID.into(),
        order_id: reservation.to_string(),
        amount: "10000.00".into(),
        currency: "LKR".into(),
        status_code: "2".into(),
        signature: String::new(),
        payment_id: Some("320025071278".into()),
    };
    let insert = |n: &PaymentNotification| {
        format!(
            "INSERT INTO payment_notifications VALUES ('{}', '{}', '{}', '{}', '{}', '{}', '{}')",
            n.merchant_id,
            n.order_id,
            n.amount,
            n.currency,
            n.status_code,
            n.signature,
            n.payment_id.as_deref().unwrap_or_default()
        )
    };

    notification.signature = "0".repeat(32);
    assert_eq!(sqlstate(&client, &insert(&notification)).await, "28000");
    let rows = select(&client, "SELECT * FROM reservations").await;
    assert_eq!(rows[0].get("payment_status"), Some("pending"));

    notification.signature = gateway().expected_signature(&notification).to_lowercase();
    client.batch_execute(&insert(&notification)).await.unwrap();
    let rows = select(&client, "SELECT * FROM reservations").await;
    assert_eq!(rows[0].get("payment_status"), Some("paid"));
    assert_eq!(rows[0].get("status"), Some("confirmed"));
    assert_eq!(rows[0].get("amount_paid"), Some("10000.00"));
    assert_eq!(rows[0].get("payment_reference"), Some("320025071278"));
}

#[tokio::test]
async fn error_codes() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = create_room(&client, "5000").await;

    assert_eq!(sqlstate(&client, "SELEC * FROM rooms").await, "42601");
    assert_eq!(sqlstate(&client, "SELECT * FROM vehicles").await, "42601");
    assert_eq!(
        sqlstate(&client, &format!("INSERT INTO status_changes VALUES ('{}', 'confirmed')", Ulid::new())).await,
        "02000"
    );
    // check-out before check-in
    assert_eq!(
        sqlstate(&client, &reservation_sql(Ulid::new(), room, "2031-03-13", "2031-03-10")).await,
        "22023"
    );
    assert_eq!(
        sqlstate(&client, &reservation_sql(Ulid::new(), room, "2031-02-30", "2031-03-10")).await,
        "22023"
    );
}

#[tokio::test]
async fn room_status_reconciles_now() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let busy = create_room(&client, "5000").await;
    let idle = create_room(&client, "5000").await;

    let today = chrono::Local::now().date_naive();
    let yesterday = today.pred_opt().unwrap();
    let tomorrow = today.succ_opt().unwrap();
    client
        .batch_execute(&reservation_sql(
            Ulid::new(),
            busy,
            &yesterday.to_string(),
            &tomorrow.to_string(),
        ))
        .await
        .unwrap();

    let rows = select(&client, &format!("SELECT * FROM room_status WHERE room_id = '{busy}'")).await;
    assert_eq!(rows[0].get("status"), Some("occupied"));

    let rows = select(&client, "SELECT * FROM room_status").await;
    assert_eq!(rows.len(), 2);
    let idle_row = rows
        .iter()
        .find(|r| r.get("room_id") == Some(idle.to_string().as_str()))
        .unwrap();
    assert_eq!(idle_row.get("status"), Some("available"));
}

#[tokio::test]
async fn extended_protocol_parameters() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let room = Ulid::new().to_string();
    let inserted = client
        .execute("INSERT INTO rooms VALUES ($1, $2, $3)", &[&room, &"O'Brien Suite", &"7200"])
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let rows = select(&client, "SELECT * FROM rooms").await;
    assert_eq!(rows[0].get("name"), Some("O'Brien Suite"));
    assert_eq!(rows[0].get("rate"), Some("7200.00"));

    // a bound value that looks like a placeholder is stored as written
    let second = Ulid::new().to_string();
    client
        .execute("INSERT INTO rooms VALUES ($1, $2, $3)", &[&second, &"Suite $1", &"100"])
        .await
        .unwrap();
    let rows = select(&client, "SELECT * FROM rooms").await;
    let named = rows
        .iter()
        .find(|r| r.get("id") == Some(second.as_str()))
        .unwrap();
    assert_eq!(named.get("name"), Some("Suite $1"));
}

#[tokio::test]
async fn wrong_password_is_refused() {
    let addr = start_test_server().await;
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .user("admin")
        .password("guess");
    assert!(config.connect(NoTls).await.is_err());
}
