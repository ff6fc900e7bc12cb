//! `/ws` — the single dashboard WebSocket endpoint. Drives
//! [`ConnectionState`] against a live [`EventBus`] subscription; the
//! fanout policy itself lives in `services::ws_fanout` so it stays
//! testable without a socket.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;

use crate::http::state::AppState;
use crate::services::event_bus::Delivery;
use crate::services::ws_fanout::{to_server_message, ClientMessage, ConnectionState};

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut conn = ConnectionState::new();
    let mut subscription = state.ctx.subscribe_events();
    let expected_token = state.ctx.config.auth.shared_secret.clone();

    let mut ping_interval = tokio::time::interval(Duration::from_secs(state.ctx.config.ws.ping_interval_secs));
    let mut silence = tokio::time::interval(Duration::from_secs(state.ctx.config.ws.idle_timeout_secs));
    silence.tick().await;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                let ping = serde_json::to_string(&crate::services::ws_fanout::ping_message()).unwrap_or_default();
                if socket.send(Message::Text(ping.into())).await.is_err() {
                    break;
                }
            }
            _ = silence.tick() => {
                tracing::debug!("ws connection silent past timeout, closing");
                break;
            }
            delivery = subscription.recv() => {
                match delivery {
                    Some(Delivery::Event(event)) => {
                        if !conn.should_forward(&event) {
                            continue;
                        }
                        let message = to_server_message(&event);
                        let json = serde_json::to_string(&message).unwrap_or_default();
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Delivery::Lagged(n)) => {
                        tracing::warn!(dropped = n, "ws connection lagged behind the event bus");
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        silence.reset();
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_message) => {
                                if let Some(reply) = conn.apply(&client_message, &expected_token) {
                                    let json = serde_json::to_string(&reply).unwrap_or_default();
                                    if socket.send(Message::Text(json.into())).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => tracing::debug!(error = %e, "ignoring unparseable ws client message"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        silence.reset();
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => silence.reset(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
