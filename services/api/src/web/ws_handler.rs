//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! Each subscribed topic runs as its own forwarding task with a cancellation
//! token; unsubscribing or disconnecting cancels it.

use crate::web::{
    protocol::{ClientMessage, ServerMessage, Topic},
    rest::MANAGERS,
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{BoxStream, SplitSink, StreamExt},
    SinkExt,
};
use sapt_core::{SessionContext, Subscription};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Snapshots of one topic, already serialized for the wire.
type SnapshotStream = BoxStream<'static, Result<serde_json::Value, String>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, session))
}

/// Sends on an already locked sink, so callers can make a check and the send
/// atomic with respect to other senders.
async fn send_locked(sink: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {:?}", e);
            return false;
        }
    };
    sink.send(Message::Text(json.into())).await.is_ok()
}

async fn send_message(sender: &WsSender, message: &ServerMessage) -> bool {
    send_locked(&mut *sender.lock().await, message).await
}

fn erase<T>(subscription: Subscription<T>) -> SnapshotStream
where
    T: Serialize + Send + 'static,
{
    subscription
        .map(|snapshot| {
            let records = snapshot.map_err(|e| e.to_string())?;
            serde_json::to_value(records).map_err(|e| e.to_string())
        })
        .boxed()
}

/// Opens the live query behind `topic` as the session's caller.
async fn open_topic(app_state: &AppState, session: &SessionContext, topic: &Topic) -> Result<SnapshotStream, String> {
    let identity = session.require_signed_in().map_err(|e| e.to_string())?;
    let data = &app_state.data;

    let opened = match topic {
        Topic::MyTasks => data
            .subscribe_to_user_tasks(&session.caller(), &identity.uid)
            .await
            .map(erase),
        Topic::MyNotifications => data
            .subscribe_to_user_notifications(&session.caller(), &identity.uid)
            .await
            .map(erase),
        Topic::AllTasks => {
            let caller = session.authorize(&MANAGERS).map_err(|e| e.to_string())?;
            data.subscribe_to_all_tasks(&caller).await.map(erase)
        }
        Topic::Attendance { start, end } => {
            let caller = session.authorize(&MANAGERS).map_err(|e| e.to_string())?;
            if start > end {
                return Err("start must not be after end".to_string());
            }
            data.subscribe_to_all_attendance(&caller, *start, *end).await.map(erase)
        }
    };
    opened.map_err(|e| e.to_string())
}

/// Forwards snapshots of one topic until cancelled, the client goes away, or
/// the live query fails. Cancellation is checked under the sender lock, so
/// nothing of this topic is sent once the connection loop has cancelled it.
fn spawn_forwarder(topic: Topic, mut snapshots: SnapshotStream, sender: WsSender, token: CancellationToken) {
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = snapshots.next() => next,
            };
            let (message, last) = match next {
                Some(Ok(records)) => (
                    ServerMessage::Snapshot {
                        topic: topic.clone(),
                        records,
                    },
                    false,
                ),
                Some(Err(message)) => {
                    warn!(topic = ?topic, "Live query ended: {}", message);
                    (
                        ServerMessage::SubscriptionEnded {
                            topic: topic.clone(),
                            message,
                        },
                        true,
                    )
                }
                None => break,
            };

            let mut sink = sender.lock().await;
            if token.is_cancelled() || !send_locked(&mut sink, &message).await || last {
                break;
            }
        }
        token.cancel();
        debug!(topic = ?topic, "Subscription forwarder finished");
    });
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, session: SessionContext) {
    let uid = session.current_user().map(|identity| identity.uid).unwrap_or_default();
    info!("New WebSocket connection established for user: {}", uid);

    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));
    let mut subscriptions: HashMap<Topic, CancellationToken> = HashMap::new();

    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("WebSocket receive error: {:?}", e);
                break;
            }
        };

        let reply = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(ClientMessage::Subscribe { topic }) => {
                if subscriptions.get(&topic).is_some_and(|token| !token.is_cancelled()) {
                    ServerMessage::Error {
                        message: format!("Already subscribed to {:?}", topic),
                    }
                } else {
                    match open_topic(&app_state, &session, &topic).await {
                        Ok(snapshots) => {
                            let token = CancellationToken::new();
                            subscriptions.insert(topic.clone(), token.clone());
                            // Acknowledge before the first snapshot can be sent.
                            let ack = ServerMessage::Subscribed { topic: topic.clone() };
                            if !send_message(&ws_sender, &ack).await {
                                token.cancel();
                                break;
                            }
                            info!(uid = %uid, topic = ?topic, "Subscribed");
                            spawn_forwarder(topic, snapshots, ws_sender.clone(), token);
                            continue;
                        }
                        Err(message) => {
                            warn!(uid = %uid, topic = ?topic, "Subscription refused: {}", message);
                            ServerMessage::SubscriptionEnded { topic, message }
                        }
                    }
                }
            }
            Ok(ClientMessage::Unsubscribe { topic }) => {
                // Cancel and acknowledge under the sender lock so no snapshot
                // of this topic can follow the acknowledgement.
                let mut sink = ws_sender.lock().await;
                if let Some(token) = subscriptions.remove(&topic) {
                    token.cancel();
                }
                info!(uid = %uid, topic = ?topic, "Unsubscribed");
                if !send_locked(&mut sink, &ServerMessage::Unsubscribed { topic }).await {
                    break;
                }
                continue;
            }
            Err(e) => ServerMessage::Error {
                message: format!("Unrecognized message: {}", e),
            },
        };

        if !send_message(&ws_sender, &reply).await {
            break;
        }
    }

    for token in subscriptions.values() {
        token.cancel();
    }
    info!("WebSocket connection closed for user: {}", uid);
}
