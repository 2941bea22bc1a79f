use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use slotbook::engine::Engine;
use slotbook::notify::{Notification, NotificationKind, NotifyHub};
use slotbook::server;

// ── Test infrastructure ──────────────────────────────────────

const PASSWORD: &str = "slotbook";

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("slotbook.wal"), Arc::new(NotifyHub::new())).unwrap());

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            tokio::spawn(async move {
                let _ = server::process_connection(socket, engine, Arc::from(PASSWORD)).await;
            });
        }
    });

    (addr, engine)
}

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
        }
    }

    async fn admin(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        let resp = client.call(json!({"op": "auth", "password": PASSWORD})).await;
        assert_eq!(resp["ok"], true);
        client
    }

    async fn call(&mut self, request: Value) -> Value {
        self.framed.send(request.to_string()).await.unwrap();
        let line = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("response timed out")
            .expect("connection closed")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Call and unwrap the `data` of a successful response.
    async fn ok(&mut self, request: Value) -> Value {
        let resp = self.call(request).await;
        assert_eq!(resp["ok"], true, "unexpected failure: {resp}");
        resp["data"].clone()
    }

    async fn err_code(&mut self, request: Value) -> String {
        let resp = self.call(request).await;
        assert_eq!(resp["ok"], false, "unexpected success: {resp}");
        resp["error"]["code"].as_str().unwrap().to_string()
    }
}

/// Wait for a notification with timeout.
async fn recv_notification(
    rx: &mut tokio::sync::broadcast::Receiver<Notification>,
    timeout: Duration,
) -> Option<Notification> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().and_then(|r| r.ok())
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn ping() {
    let (addr, _) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    assert_eq!(client.ok(json!({"op": "ping"})).await, json!("pong"));
}

#[tokio::test]
async fn guest_books_through_link_then_cancels() {
    let (addr, engine) = start_test_server().await;
    let mut notifications = engine.notify.subscribe();
    let mut admin = Client::admin(addr).await;

    let slot = admin
        .ok(json!({
            "op": "create_slot",
            "name": "Office hours",
            "start": "2100-01-01T09:00:00Z",
            "end": "2100-01-01T10:00:00Z",
        }))
        .await;
    let slot_id = slot["id"].as_str().unwrap().to_string();
    let link = admin
        .ok(json!({
            "op": "create_link",
            "slot_ids": [slot_id],
            "expires_at": "2100-01-01T00:00:00Z",
        }))
        .await;
    let token = link["token"].as_str().unwrap().to_string();

    let mut guest = Client::connect(addr).await;
    let offered = guest.ok(json!({"op": "available", "token": token})).await;
    assert_eq!(offered.as_array().unwrap().len(), 1);
    assert_eq!(offered[0]["busy"], json!([]));

    let booked = guest
        .ok(json!({
            "op": "book",
            "link_token": token,
            "slot_id": slot_id,
            "start": "2100-01-01T09:00:00Z",
            "end": "2100-01-01T09:30:00Z",
            "name": "Ada",
            "email": "ada@example.com",
        }))
        .await;
    let share_id = booked["share_id"].as_str().unwrap().to_string();
    assert_eq!(booked["canceled_at"], Value::Null);

    let n = recv_notification(&mut notifications, Duration::from_secs(2)).await.unwrap();
    assert_eq!(n.kind, NotificationKind::Created);
    assert_eq!(n.appointment.share_id, share_id);

    let clash = guest
        .err_code(json!({
            "op": "book",
            "link_token": token,
            "slot_id": slot_id,
            "start": "2100-01-01T09:15:00Z",
            "end": "2100-01-01T09:45:00Z",
            "name": "Grace",
        }))
        .await;
    assert_eq!(clash, "overlap");

    let offered = guest.ok(json!({"op": "available", "token": token})).await;
    assert_eq!(offered[0]["busy"].as_array().unwrap().len(), 1);

    let fetched = guest.ok(json!({"op": "get_booking", "share_id": share_id})).await;
    assert_eq!(fetched["id"], booked["id"]);

    let canceled = guest.ok(json!({"op": "cancel_booking", "share_id": share_id})).await;
    assert_eq!(canceled["canceled_by"], "guest");
    let again = guest.err_code(json!({"op": "cancel_booking", "share_id": share_id})).await;
    assert_eq!(again, "already_canceled");

    let n = recv_notification(&mut notifications, Duration::from_secs(2)).await.unwrap();
    assert_eq!(n.kind, NotificationKind::Canceled);

    let offered = guest.ok(json!({"op": "available", "token": token})).await;
    assert_eq!(offered[0]["busy"], json!([]));
}

#[tokio::test]
async fn guest_cannot_reach_admin_ops() {
    let (addr, _) = start_test_server().await;
    let mut guest = Client::connect(addr).await;
    for op in ["list_slots", "list_links"] {
        assert_eq!(guest.err_code(json!({"op": op})).await, "unauthorized");
    }
    let code = guest
        .err_code(json!({"op": "delete_appointment", "id": Ulid::new().to_string()}))
        .await;
    assert_eq!(code, "unauthorized");
}

#[tokio::test]
async fn link_scope_enforced_over_the_wire() {
    let (addr, _) = start_test_server().await;
    let mut admin = Client::admin(addr).await;

    let a = admin
        .ok(json!({"op": "create_slot", "start": "4102477200000", "end": "4102480800000"}))
        .await;
    let b = admin
        .ok(json!({"op": "create_slot", "start": "4102480800000", "end": "4102484400000"}))
        .await;
    let link = admin
        .ok(json!({"op": "create_link", "slot_ids": [a["id"]], "expires_at": "4102444800000"}))
        .await;

    let mut guest = Client::connect(addr).await;
    let code = guest
        .err_code(json!({
            "op": "book",
            "link_token": link["token"],
            "slot_id": b["id"],
            "start": "4102480800000",
            "end": "4102481000000",
            "name": "Eve",
        }))
        .await;
    assert_eq!(code, "slot_not_allowed_for_link");

    let code = guest
        .err_code(json!({"op": "available", "token": "not-a-token"}))
        .await;
    assert_eq!(code, "link_invalid_or_expired");
}

#[tokio::test]
async fn admin_lifecycle_over_the_wire() {
    let (addr, _) = start_test_server().await;
    let mut admin = Client::admin(addr).await;

    let slot = admin
        .ok(json!({"op": "create_slot", "start": "4102477200000", "end": "4102480800000"}))
        .await;
    let link = admin
        .ok(json!({"op": "create_link", "expires_at": "4102444800000"}))
        .await;
    let appt = admin
        .ok(json!({
            "op": "book",
            "link_token": link["token"],
            "slot_id": slot["id"],
            "start": "4102477200000",
            "end": "4102479000000",
            "name": "Linus",
        }))
        .await;

    let code = admin
        .err_code(json!({"op": "delete_appointment", "id": appt["id"]}))
        .await;
    assert_eq!(code, "delete_only_past_or_canceled");

    let canceled = admin
        .ok(json!({"op": "cancel_appointment", "id": appt["id"]}))
        .await;
    assert_eq!(canceled["canceled_by"], "admin");
    admin
        .ok(json!({"op": "delete_appointment", "id": appt["id"]}))
        .await;

    let listed = admin
        .ok(json!({"op": "list_appointments", "slot_id": slot["id"]}))
        .await;
    assert_eq!(listed, json!([]));

    let preview = admin
        .ok(json!({"op": "slot_preview", "slot_id": slot["id"]}))
        .await;
    assert_eq!(preview["fully_occupied"], false);

    admin
        .ok(json!({"op": "set_slot_active", "slot_id": slot["id"], "active": false}))
        .await;
    let available = admin.ok(json!({"op": "availability"})).await;
    assert_eq!(available, json!([]));

    admin.ok(json!({"op": "delete_slot", "slot_id": slot["id"]})).await;
    assert_eq!(admin.ok(json!({"op": "list_slots"})).await, json!([]));
}

#[tokio::test]
async fn bad_lines_keep_connection_alive() {
    let (addr, _) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    client.framed.send("{oops".to_string()).await.unwrap();
    let line = client.framed.next().await.unwrap().unwrap();
    let resp: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(resp["error"]["code"], "bad_request");

    assert_eq!(client.ok(json!({"op": "ping"})).await, json!("pong"));
}
