use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{BookingRequest, CancelRequest, Engine, EngineError};
use crate::limits::MAX_REQUEST_LINE;
use crate::model::{parse_instant, Ms};
use crate::observability;

/// One line of the control protocol, tagged by `op`.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Auth {
        password: String,
    },
    // Public
    Available {
        token: String,
    },
    Book(BookingRequest),
    GetBooking {
        share_id: String,
    },
    CancelBooking {
        share_id: String,
    },
    // Admin
    CreateSlot {
        #[serde(default)]
        id: Option<Ulid>,
        #[serde(default)]
        name: Option<String>,
        start: String,
        end: String,
    },
    SetSlotActive {
        slot_id: Ulid,
        active: bool,
    },
    RenameSlot {
        slot_id: Ulid,
        #[serde(default)]
        name: Option<String>,
    },
    DeleteSlot {
        slot_id: Ulid,
    },
    ListSlots,
    ListAppointments {
        slot_id: Ulid,
    },
    Availability {
        #[serde(default)]
        slot_ids: Option<Vec<Ulid>>,
    },
    SlotPreview {
        slot_id: Ulid,
    },
    CreateLink {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        slot_ids: Vec<Ulid>,
        expires_at: String,
    },
    DeleteLink {
        token: String,
    },
    ListLinks,
    CancelAppointment {
        id: Ulid,
    },
    DeleteAppointment {
        id: Ulid,
    },
}

impl Request {
    fn requires_admin(&self) -> bool {
        !matches!(
            self,
            Request::Ping
                | Request::Auth { .. }
                | Request::Available { .. }
                | Request::Book(_)
                | Request::GetBooking { .. }
                | Request::CancelBooking { .. }
        )
    }
}

#[derive(Debug)]
pub enum ProtocolError {
    BadRequest(String),
    Unauthorized,
    Engine(EngineError),
    Internal(String),
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::BadRequest(_) => "bad_request",
            ProtocolError::Unauthorized => "unauthorized",
            ProtocolError::Engine(e) => e.code(),
            ProtocolError::Internal(_) => "internal",
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            ProtocolError::Unauthorized => write!(f, "admin authentication required"),
            ProtocolError::Engine(e) => write!(f, "{e}"),
            ProtocolError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<EngineError> for ProtocolError {
    fn from(e: EngineError) -> Self {
        ProtocolError::Engine(e)
    }
}

fn data<T: Serialize>(value: T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(|e| ProtocolError::Internal(e.to_string()))
}

fn instant(text: &str) -> Result<Ms, ProtocolError> {
    parse_instant(text).ok_or_else(|| ProtocolError::BadRequest(format!("unparseable instant: {text}")))
}

/// Encode a handler outcome as one response line.
pub fn encode_response(result: Result<Value, ProtocolError>) -> String {
    match result {
        Ok(data) => json!({ "ok": true, "data": data }).to_string(),
        Err(e) => json!({
            "ok": false,
            "error": { "code": e.code(), "message": e.to_string() },
        })
        .to_string(),
    }
}

/// Per-connection state.
pub struct Session {
    engine: Arc<Engine>,
    admin_password: Arc<str>,
    admin: bool,
}

impl Session {
    pub fn new(engine: Arc<Engine>, admin_password: Arc<str>) -> Self {
        Self {
            engine,
            admin_password,
            admin: false,
        }
    }

    /// Parse and execute one request line, returning the response line.
    pub async fn handle_line(&mut self, line: &str) -> String {
        let req: Request = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => return encode_response(Err(ProtocolError::BadRequest(e.to_string()))),
        };

        let op = observability::request_label(&req);
        debug!("request op={op}");
        let started = Instant::now();
        let result = self.execute(req).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
            .record(started.elapsed().as_secs_f64());
        if let Err(ProtocolError::Engine(e)) = &result
            && e.is_fault()
        {
            warn!("{op} failed: {e}");
        }
        encode_response(result)
    }

    async fn execute(&mut self, req: Request) -> Result<Value, ProtocolError> {
        if req.requires_admin() && !self.admin {
            return Err(ProtocolError::Unauthorized);
        }
        let engine = &self.engine;
        match req {
            Request::Ping => Ok(json!("pong")),
            Request::Auth { password } => {
                if password.as_str() != &*self.admin_password {
                    metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                    warn!("admin authentication failed");
                    return Err(ProtocolError::Unauthorized);
                }
                self.admin = true;
                Ok(json!({ "admin": true }))
            }
            Request::Available { token } => data(engine.available_for_link(&token).await?),
            Request::Book(request) => data(engine.create_appointment(request).await?),
            Request::GetBooking { share_id } => data(engine.find_by_share_id(&share_id).await?),
            Request::CancelBooking { share_id } => {
                data(engine.cancel_appointment(CancelRequest::Guest(share_id)).await?)
            }
            Request::CreateSlot { id, name, start, end } => {
                let (start, end) = (instant(&start)?, instant(&end)?);
                let id = id.unwrap_or_else(Ulid::new);
                data(engine.create_slot(id, name, start, end).await?)
            }
            Request::SetSlotActive { slot_id, active } => {
                data(engine.set_slot_active(slot_id, active).await?)
            }
            Request::RenameSlot { slot_id, name } => data(engine.rename_slot(slot_id, name).await?),
            Request::DeleteSlot { slot_id } => {
                engine.delete_slot(slot_id).await?;
                Ok(json!({ "deleted": slot_id }))
            }
            Request::ListSlots => data(engine.list_slots().await),
            Request::ListAppointments { slot_id } => data(engine.list_appointments(slot_id).await?),
            Request::Availability { slot_ids } => {
                data(engine.list_available(slot_ids.as_deref()).await)
            }
            Request::SlotPreview { slot_id } => data(engine.slot_preview(slot_id).await?),
            Request::CreateLink {
                name,
                slot_ids,
                expires_at,
            } => {
                let expires_at = instant(&expires_at)?;
                data(engine.create_link(name, slot_ids, expires_at).await?)
            }
            Request::DeleteLink { token } => {
                engine.delete_link(&token).await?;
                Ok(json!({ "deleted": token }))
            }
            Request::ListLinks => data(engine.list_links()),
            Request::CancelAppointment { id } => {
                data(engine.cancel_appointment(CancelRequest::Admin(id)).await?)
            }
            Request::DeleteAppointment { id } => data(engine.delete_appointment(id).await?),
        }
    }
}

/// Serve one client: a JSON request per line in, a JSON response per line out.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    admin_password: Arc<str>,
) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE));
    let mut session = Session::new(engine, admin_password);

    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let reply = encode_response(Err(ProtocolError::BadRequest("request line too long".into())));
                framed.send(reply).await?;
                continue;
            }
            Err(e) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = session.handle_line(&line).await;
        framed.send(reply).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyHub;

    fn session(name: &str) -> Session {
        let dir = std::env::temp_dir().join("slotbook_test_server");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        let engine = Arc::new(Engine::new(path, Arc::new(NotifyHub::new())).unwrap());
        Session::new(engine, Arc::from("secret"))
    }

    async fn call(session: &mut Session, line: &str) -> Value {
        serde_json::from_str(&session.handle_line(line).await).unwrap()
    }

    #[test]
    fn parses_tagged_requests() {
        let req: Request = serde_json::from_str(
            r#"{"op":"book","link_token":"t","slot_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","start":"0","end":"1","name":"A"}"#,
        )
        .unwrap();
        assert!(matches!(req, Request::Book(ref b) if b.email.is_none()));
        assert_eq!(observability::request_label(&req), "book");

        let req: Request = serde_json::from_str(r#"{"op":"availability"}"#).unwrap();
        assert!(matches!(req, Request::Availability { slot_ids: None }));
        assert!(serde_json::from_str::<Request>(r#"{"op":"drop_tables"}"#).is_err());
    }

    #[tokio::test]
    async fn malformed_line_is_bad_request() {
        let mut s = session("malformed.wal");
        let resp = call(&mut s, "not json").await;
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn admin_ops_need_auth() {
        let mut s = session("admin_gate.wal");
        let resp = call(&mut s, r#"{"op":"list_slots"}"#).await;
        assert_eq!(resp["error"]["code"], "unauthorized");

        let resp = call(&mut s, r#"{"op":"auth","password":"wrong"}"#).await;
        assert_eq!(resp["error"]["code"], "unauthorized");

        let resp = call(&mut s, r#"{"op":"auth","password":"secret"}"#).await;
        assert_eq!(resp["ok"], true);
        let resp = call(&mut s, r#"{"op":"list_slots"}"#).await;
        assert_eq!(resp["data"], json!([]));
    }

    #[tokio::test]
    async fn engine_errors_carry_their_code() {
        let mut s = session("engine_codes.wal");
        let resp = call(&mut s, r#"{"op":"available","token":"missing"}"#).await;
        assert_eq!(resp["error"]["code"], "link_invalid_or_expired");

        call(&mut s, r#"{"op":"auth","password":"secret"}"#).await;
        let resp = call(
            &mut s,
            r#"{"op":"create_slot","start":"2100-01-01T10:00:00Z","end":"2100-01-01T09:00:00Z"}"#,
        )
        .await;
        assert_eq!(resp["error"]["code"], "invalid_interval");

        let resp = call(&mut s, r#"{"op":"create_slot","start":"soon","end":"later"}"#).await;
        assert_eq!(resp["error"]["code"], "bad_request");
    }
}
