//! One client connection: handshake, then three concurrent activities
//! (liveness supervision, inbound frames, outbound delivery) that are torn
//! down together when any of them ends the session.

use std::sync::{Arc, Mutex};

use axum::extract::ws::{CloseFrame, Message, close_code};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, trace, warn};

use roam_types::api::UserIdentity;
use roam_types::events::{CloseCode, Frame, GatewayEvent, OpCode, ReadyPayload};
use roam_types::models::{Snowflake, User};

use crate::{Gateway, blocking};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatOutcome, TickOutcome};
use crate::registry::EventReceiver;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Violation(CloseCode),
    /// Queue dropped by the registry: replaced by a newer session, or shutdown.
    Replaced,
    /// Socket closed or errored.
    Disconnected,
    Internal,
}

/// Serialized writer shared by every activity of a session.
struct Outbox<S> {
    sink: tokio::sync::Mutex<S>,
}

impl<S> Outbox<S>
where
    S: Sink<Message> + Unpin,
{
    fn new(sink: S) -> Self {
        Self {
            sink: tokio::sync::Mutex::new(sink),
        }
    }

    /// Returns false once the socket is gone.
    async fn send(&self, frame: &Frame) -> bool {
        let text = frame.to_json();
        self.sink.lock().await.send(Message::Text(text.into())).await.is_ok()
    }

    async fn close(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(Some(frame))).await;
        let _ = sink.close().await;
    }

    async fn violation(&self, code: CloseCode) {
        self.close(code.code(), code.reason()).await;
    }
}

/// Serve one connection until it closes.
pub async fn handle_connection<S, R, E>(sink: S, mut stream: R, gateway: Gateway)
where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    let outbox = Arc::new(Outbox::new(sink));

    let hello = Frame::hello(gateway.config.heartbeat_interval.as_millis() as u64);
    if !outbox.send(&hello).await {
        return;
    }

    // Step 1: IDENTIFY
    let token = match identify(&mut stream, &gateway).await {
        Ok(token) => token,
        Err(None) => return,
        Err(Some(code)) => {
            warn!("Handshake rejected with {}", code.code());
            outbox.violation(code).await;
            return;
        }
    };

    let Some(identity) = gateway.resolver.resolve(&token).await else {
        warn!("Handshake rejected: token did not resolve");
        outbox.violation(CloseCode::InvalidToken).await;
        return;
    };

    let user_id = identity.id;
    let (user, board_ids) = match load_profile(&gateway, identity).await {
        Ok(profile) => profile,
        Err(e) => {
            error!("Failed to load profile for {}: {}", user_id, e);
            outbox.close(close_code::ERROR, "Internal error").await;
            return;
        }
    };

    // Step 2: register, then READY
    let (conn_id, events) = gateway.registry.register(user.id).await;
    let monitor = Arc::new(Mutex::new(HeartbeatMonitor::new(
        gateway.config.heartbeat,
        Instant::now(),
    )));

    if !outbox.send(&Frame::ready(&ReadyPayload::new(user.clone(), board_ids.iter().copied()))).await {
        gateway.registry.unregister(user.id, conn_id).await;
        return;
    }
    info!("{}#{} ({}) ready on connection {}", user.username, user.discriminator, user.id, conn_id);

    // Full state for each board goes through the regular queue.
    for board_id in board_ids {
        match blocking(&gateway.db, move |db| db.board_snapshot(board_id)).await {
            Ok(Some(snapshot)) => {
                gateway
                    .registry
                    .send_to_user(user.id, GatewayEvent::BoardCreate(snapshot))
                    .await;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not load board {} for {}: {}", board_id, user.id, e),
        }
    }

    // Step 3: run the three activities until one ends the session
    let mut supervise_task = tokio::spawn(supervise(
        monitor.clone(),
        gateway.config.supervise_every,
        user.id,
    ));
    let mut read_task = tokio::spawn(read_frames(stream, outbox.clone(), monitor, user.id));
    let mut deliver_task = tokio::spawn(deliver(events, outbox.clone(), user.id));

    let finished = tokio::select! {
        r = &mut supervise_task => r,
        r = &mut read_task => r,
        r = &mut deliver_task => r,
    };
    let end = finished.unwrap_or(SessionEnd::Internal);

    // Unregister before anything else so no publish targets a closing socket.
    gateway.registry.unregister(user.id, conn_id).await;
    supervise_task.abort();
    read_task.abort();
    deliver_task.abort();

    match end {
        SessionEnd::Violation(code) => {
            warn!("{} ({}) closed with {}: {}", user.username, user.id, code.code(), code.reason());
            outbox.violation(code).await;
        }
        SessionEnd::Replaced => {
            outbox.close(close_code::NORMAL, "Session replaced").await;
        }
        SessionEnd::Internal => {
            outbox.close(close_code::ERROR, "Internal error").await;
        }
        SessionEnd::Disconnected => {}
    }

    info!("{} ({}) disconnected from gateway ({:?})", user.username, user.id, end);
}

async fn load_profile(gateway: &Gateway, identity: UserIdentity) -> anyhow::Result<(User, Vec<Snowflake>)> {
    blocking(&gateway.db, move |db| {
        let user = db.ensure_user(identity.id, &identity.username, &identity.discriminator)?;
        let boards = db.boards_of_user(identity.id)?;
        Ok((user, boards))
    })
    .await
}

/// Wait for the IDENTIFY frame and extract its token.
/// `Err(None)` means the client went away.
async fn identify<R, E>(stream: &mut R, gateway: &Gateway) -> Result<String, Option<CloseCode>>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let first = tokio::time::timeout(gateway.config.identify_timeout, async {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(_) => return Some(Err(CloseCode::DecodeError)),
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    })
    .await;

    match first {
        Err(_) => Err(Some(CloseCode::NotAuthenticated)),
        Ok(None) => Err(None),
        Ok(Some(Err(code))) => Err(Some(code)),
        Ok(Some(Ok(text))) => parse_identify(&text).map_err(Some),
    }
}

/// Validate an IDENTIFY frame in handshake order: parseable, then op,
/// then token. Anything but an integer op 2 is not an identify attempt.
fn parse_identify(text: &str) -> Result<String, CloseCode> {
    let value: Value = serde_json::from_str(text).map_err(|_| CloseCode::DecodeError)?;
    let op = value.get("op").and_then(Value::as_u64);
    if op != Some(OpCode::Identify as u64) {
        return Err(CloseCode::NotAuthenticated);
    }
    value
        .get("d")
        .and_then(|d| d.get("token"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(CloseCode::InvalidIdentify)
}

/// Liveness supervision: one check per tick.
async fn supervise(
    monitor: Arc<Mutex<HeartbeatMonitor>>,
    every: std::time::Duration,
    user_id: Snowflake,
) -> SessionEnd {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let outcome = monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .on_tick(Instant::now());
        match outcome {
            TickOutcome::Alive => {}
            TickOutcome::Late(strikes) => {
                trace!("User {} heartbeat overdue ({} strikes)", user_id, strikes);
            }
            TickOutcome::Close(code) => return SessionEnd::Violation(code),
        }
    }
}

/// Inbound frames once Ready.
async fn read_frames<R, E, S>(
    mut stream: R,
    outbox: Arc<Outbox<S>>,
    monitor: Arc<Mutex<HeartbeatMonitor>>,
    user_id: Snowflake,
) -> SessionEnd
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    S: Sink<Message> + Unpin,
{
    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(_) => return SessionEnd::Violation(CloseCode::DecodeError),
            Message::Close(_) => return SessionEnd::Disconnected,
            _ => continue,
        };

        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
            return SessionEnd::Violation(CloseCode::DecodeError);
        };
        let op = frame
            .get("op")
            .and_then(Value::as_u64)
            .and_then(|op| u8::try_from(op).ok())
            .and_then(OpCode::from_u8);

        match op {
            Some(OpCode::Heartbeat) => {
                let outcome = monitor
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .on_heartbeat(Instant::now());
                let reply = match outcome {
                    HeartbeatOutcome::Ack => {
                        trace!("User {} heartbeat acknowledged", user_id);
                        Frame::heartbeat_ack()
                    }
                    HeartbeatOutcome::SlowDown => Frame::slow_down(),
                    HeartbeatOutcome::Close(code) => return SessionEnd::Violation(code),
                };
                if !outbox.send(&reply).await {
                    return SessionEnd::Disconnected;
                }
            }
            Some(OpCode::Identify) => return SessionEnd::Violation(CloseCode::AlreadyAuthenticated),
            _ => trace!("User {} sent unhandled frame ({} bytes)", user_id, text.len()),
        }
    }

    SessionEnd::Disconnected
}

/// Outbound delivery: drain the queue in arrival order, rendering each
/// event for this session's user.
async fn deliver<S>(mut events: EventReceiver, outbox: Arc<Outbox<S>>, user_id: Snowflake) -> SessionEnd
where
    S: Sink<Message> + Unpin,
{
    while let Some(event) = events.recv().await {
        if !outbox.send(&event.render(user_id)).await {
            return SessionEnd::Disconnected;
        }
    }
    SessionEnd::Replaced
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identify_order() {
        assert_eq!(parse_identify("not json"), Err(CloseCode::DecodeError));
        assert_eq!(parse_identify(r#"{"d":{"token":"x"}}"#), Err(CloseCode::NotAuthenticated));
        assert_eq!(parse_identify(r#"{"op":"2","d":{"token":"x"}}"#), Err(CloseCode::NotAuthenticated));
        assert_eq!(parse_identify(r#"{"op":2.5,"d":{"token":"x"}}"#), Err(CloseCode::NotAuthenticated));
        assert_eq!(parse_identify(r#"{"op":1}"#), Err(CloseCode::NotAuthenticated));
        assert_eq!(parse_identify(r#"{"op":2}"#), Err(CloseCode::InvalidIdentify));
        assert_eq!(parse_identify(r#"{"op":2,"d":{}}"#), Err(CloseCode::InvalidIdentify));
        assert_eq!(parse_identify(r#"{"op":2,"d":{"token":"abc"}}"#), Ok("abc".to_string()));
    }
}
