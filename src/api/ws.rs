// =============================================================================
// WebSocket Handler — topic-based event fan-out
// =============================================================================
//
// Instead of re-sending the whole state on a timer, each connection
// subscribes to the broadcaster's `default` topic (always) and
// `strategy-updates` on demand via a `subscribe-updates` /
// `unsubscribe-updates` client message.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::broadcaster::Topic;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientMessage {
    SubscribeUpdates,
    UnsubscribeUpdates,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("websocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();

    let mut default_rx = state.broadcaster.subscribe(Topic::Default);
    let mut reco_rx = state.broadcaster.subscribe(Topic::Recommendations);
    let mut strategy_rx: Option<tokio::sync::broadcast::Receiver<crate::broadcaster::BroadcastEvent>> = None;

    loop {
        tokio::select! {
            event = default_rx.recv() => {
                if !forward_event(&mut sender, event).await {
                    break;
                }
            }
            event = reco_rx.recv() => {
                if !forward_event(&mut sender, event).await {
                    break;
                }
            }
            event = recv_optional(&mut strategy_rx) => {
                if !forward_event(&mut sender, event).await {
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::SubscribeUpdates) => {
                                debug!("client subscribed to strategy-updates");
                                strategy_rx = Some(state.broadcaster.subscribe(Topic::StrategyUpdates));
                            }
                            Ok(ClientMessage::UnsubscribeUpdates) => {
                                debug!("client unsubscribed from strategy-updates");
                                strategy_rx = None;
                            }
                            Err(e) => debug!(error = %e, "ignoring unrecognised websocket text message"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("websocket connection closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket receive error — disconnecting");
                        break;
                    }
                }
            }
        }
    }
}

/// Awaits the next event on `rx` if present, otherwise never resolves — lets
/// the `tokio::select!` arm above stay inert while unsubscribed.
async fn recv_optional(
    rx: &mut Option<tokio::sync::broadcast::Receiver<crate::broadcaster::BroadcastEvent>>,
) -> Result<crate::broadcaster::BroadcastEvent, tokio::sync::broadcast::error::RecvError> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}

async fn forward_event<S>(sender: &mut S, event: Result<crate::broadcaster::BroadcastEvent, tokio::sync::broadcast::error::RecvError>) -> bool
where
    S: futures_util::Sink<Message> + Unpin,
{
    use futures_util::SinkExt;
    match event {
        Ok(ev) => match serde_json::to_string(&ev) {
            Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast event");
                true
            }
        },
        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
            debug!(skipped, "websocket subscriber lagged, dropping skipped events");
            true
        }
        Err(tokio::sync::broadcast::error::RecvError::Closed) => false,
    }
}
