//! WebSocket upgrade handler and per-connection event loop.
//!
//! A connection moves through `Authorizing → Joined → Closing`. Teardown
//! runs exactly once per admitted connection, whatever ended it.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_common::{Envelope, RoomId, UserId};
use tokio::sync::watch;
use tokio::time;

use crate::error::RelayError;
use crate::AppState;

use super::events::ClientFrame;
use super::session::{ConnectionHandle, ConnectionInbox, Disconnect, CLOSE_POLICY_VIOLATION};

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Close reasons are limited to 123 bytes by RFC 6455.
const MAX_CLOSE_REASON: usize = 123;

/// Peers that stopped reading get this long to take a close frame.
const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/{room_id}/{user_id}", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path((room_id, user_id)): Path<(RoomId, UserId)>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, room_id, user_id))
}

async fn handle_connection(socket: WebSocket, state: AppState, room_id: RoomId, user_id: UserId) {
    let (mut ws_tx, ws_rx) = socket.split();

    // Authorizing: nothing is registered until the directory says yes.
    if let Err(err) = authorize(&state, room_id, user_id).await {
        tracing::info!(%err, room_id, user_id, "join denied");
        let reason = match err {
            RelayError::AuthorizationDenied(reason) => reason,
            other => other.to_string(),
        };
        send_close(&mut ws_tx, CLOSE_POLICY_VIOLATION, &reason).await;
        return;
    }

    // Joined.
    let (handle, inbox) = ConnectionHandle::new(room_id, user_id, state.config.outbound_queue_capacity);
    let handle = Arc::new(handle);
    join(&state, handle.clone()).await;

    tracing::info!(
        connection_id = %handle.id,
        room_id,
        user_id,
        "participant joined"
    );

    state.directory.notify_joined(user_id, room_id).await;

    // The roster goes straight to the socket so it precedes anything already
    // queued by the bus listener.
    let mut others = state.registry.active_users(room_id);
    others.remove(&user_id);
    let roster = Envelope::ExistingUsers {
        ids: others.into_iter().collect(),
    };
    let roster_sent = match send_envelope(&mut ws_tx, &handle, &roster).await {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(%err, room_id, user_id, "failed to send roster");
            false
        }
    };

    publish(&state, room_id, &Envelope::UserJoined { user_id }).await;

    if roster_sent {
        run_connection(&state, &handle, inbox, ws_tx, ws_rx).await;
    }

    // Closing.
    leave(&state, &handle).await;
}

async fn authorize(state: &AppState, room_id: RoomId, user_id: UserId) -> Result<(), RelayError> {
    let decision = state.directory.validate_join(user_id, room_id).await;
    if decision.allowed {
        Ok(())
    } else {
        Err(RelayError::AuthorizationDenied(decision.reason))
    }
}

/// Register the connection and make sure this process hears the room topic.
async fn join(state: &AppState, handle: Arc<ConnectionHandle>) {
    let room_id = handle.room_id;
    let _gate = state.bridge.lock_room(room_id).await;
    state.registry.register(handle);
    state.bridge.subscribe(room_id).await;
}

/// Tear a connection down. Safe to call more than once: only the call that
/// actually removes the registry entry reports the departure.
async fn leave(state: &AppState, handle: &ConnectionHandle) {
    let removed = {
        let _gate = state.bridge.lock_room(handle.room_id).await;
        let removed = state.registry.unregister(&handle.id);
        if removed.is_some() && state.registry.local_count(handle.room_id) == 0 {
            state.bridge.unsubscribe(handle.room_id).await;
        }
        removed
    };

    let Some((room_id, user_id)) = removed else {
        return;
    };

    state.directory.notify_left(user_id, room_id).await;
    publish(state, room_id, &Envelope::UserLeft { user_id }).await;

    tracing::info!(connection_id = %handle.id, room_id, user_id, "participant left");
}

/// Main connection loop: relay client frames to the bus, write queued
/// broadcasts to the socket, and honour disconnect requests.
async fn run_connection(
    state: &AppState,
    handle: &ConnectionHandle,
    inbox: ConnectionInbox,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
) {
    let ConnectionInbox {
        mut outbound,
        mut disconnect,
    } = inbox;

    loop {
        tokio::select! {
            // Client sends us a frame.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_frame(state, handle, text.as_str()).await,
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(connection_id = %handle.id, "ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %handle.id, "ws read error");
                        break;
                    }
                }
            }

            // Broadcast queued by the registry. A client that stops reading
            // stalls this write, so it must still yield to a disconnect.
            Some(payload) = outbound.recv() => {
                let written = tokio::select! {
                    sent = ws_tx.send(Message::Text(payload)) => Some(sent.is_ok()),
                    Ok(()) = disconnect.changed() => None,
                };
                match written {
                    Some(true) => {}
                    Some(false) => {
                        tracing::debug!(connection_id = %handle.id, "ws write failed");
                        break;
                    }
                    None => {
                        close_as_requested(&mut ws_tx, handle, &mut disconnect).await;
                        break;
                    }
                }
            }

            // Kick, overflow or shutdown.
            Ok(()) = disconnect.changed() => {
                close_as_requested(&mut ws_tx, handle, &mut disconnect).await;
                break;
            }
        }
    }
}

async fn close_as_requested(
    ws_tx: &mut WsSink,
    handle: &ConnectionHandle,
    disconnect: &mut watch::Receiver<Option<Disconnect>>,
) {
    let request = disconnect.borrow_and_update().clone();
    if let Some(request) = request {
        tracing::info!(
            connection_id = %handle.id,
            code = request.code,
            reason = %request.reason,
            "closing connection"
        );
        send_close(ws_tx, request.code, &request.reason).await;
    }
}

async fn handle_frame(state: &AppState, handle: &ConnectionHandle, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::debug!(%err, connection_id = %handle.id, "dropping malformed client frame");
            return;
        }
    };

    let Some(envelope) = frame.into_envelope(handle.user_id) else {
        tracing::debug!(connection_id = %handle.id, "ignoring unsupported frame type");
        return;
    };

    publish(state, handle.room_id, &envelope).await;

    if let Envelope::Chat { content, .. } = envelope {
        state
            .directory
            .persist_message(handle.user_id, handle.room_id, content);
    }
}

/// Publish on the room topic; failures are logged and otherwise ignored.
async fn publish(state: &AppState, room_id: RoomId, envelope: &Envelope) {
    if let Err(err) = state.bridge.publish(room_id, envelope).await {
        tracing::warn!(
            %err,
            room_id,
            user_id = ?envelope.user_id(),
            kind = envelope.kind(),
            "publish failed"
        );
    }
}

async fn send_envelope(
    ws_tx: &mut WsSink,
    handle: &ConnectionHandle,
    envelope: &Envelope,
) -> Result<(), RelayError> {
    let json = serde_json::to_string(envelope)?;
    ws_tx
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| RelayError::PeerDelivery {
            connection_id: handle.id.clone(),
            overflow: false,
        })
}

/// Send a WebSocket close frame with a code and reason. Gives up quietly if
/// the peer does not take it in time.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: close_reason(reason).into(),
    }));
    match time::timeout(CLOSE_WRITE_TIMEOUT, ws_tx.send(close_msg)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::debug!(?err, code, "failed to send close frame"),
        Err(_) => tracing::debug!(code, "peer did not accept close frame in time"),
    }
}

/// `reason` cut to fit a close frame, on a char boundary.
fn close_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::config::Config;
    use crate::directory::memory::MemoryDirectory;

    #[test]
    fn short_close_reason_is_kept() {
        assert_eq!(close_reason("Banned: spam"), "Banned: spam");
        assert_eq!(close_reason(""), "");
    }

    #[test]
    fn long_close_reason_is_cut_to_limit() {
        let reason = "x".repeat(200);
        assert_eq!(close_reason(&reason).len(), MAX_CLOSE_REASON);
    }

    #[test]
    fn close_reason_is_cut_on_char_boundary() {
        // 'é' is two bytes, so byte 123 falls inside a char.
        let reason = "é".repeat(100);
        let cut = close_reason(&reason);
        assert_eq!(cut.len(), 122);
        assert!(reason.starts_with(cut));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn join_racing_last_leave_keeps_room_subscribed() {
        let bus = Arc::new(MemoryBus::new());
        let state = AppState::new(
            Config::default(),
            bus.clone(),
            Arc::new(MemoryDirectory::new()),
        );
        state.bridge.start();
        time::timeout(Duration::from_secs(2), async {
            while !state.bridge.is_connected().await {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("bus listener never connected");

        for round in 0..200 {
            let (first, _first_inbox) = ConnectionHandle::new(7, 1, 4);
            let first = Arc::new(first);
            join(&state, first.clone()).await;

            let (second, _second_inbox) = ConnectionHandle::new(7, 2, 4);
            let second = Arc::new(second);

            let leaving = tokio::spawn({
                let state = state.clone();
                async move { leave(&state, &first).await }
            });
            let joining = tokio::spawn({
                let state = state.clone();
                let second = second.clone();
                async move { join(&state, second).await }
            });
            leaving.await.unwrap();
            joining.await.unwrap();

            assert_eq!(state.registry.local_count(7), 1, "round {round}");
            assert!(state.bridge.is_subscribed(7), "round {round}");
            assert_eq!(bus.subscriber_count("room:7"), 1, "round {round}");

            leave(&state, &second).await;
            assert_eq!(state.registry.local_count(7), 0, "round {round}");
            assert!(!state.bridge.is_subscribed(7), "round {round}");
            assert_eq!(bus.subscriber_count("room:7"), 0, "round {round}");
        }

        state.bridge.shutdown().await;
    }
}
