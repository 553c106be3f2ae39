use std::collections::VecDeque;
use std::sync::Arc;

use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use tb_auth::Credentials;
use tb_core::config::MAX_PAYLOAD_BYTES;
use tb_protocol::frames::{now_rfc3339, AuthPayload, ClientFrame, ServerFrame};

use crate::app::AppState;
use crate::session::{Session, SessionState};
use crate::turn::{run_turn, TurnOutcome};

/// Axum handler — upgrades HTTP to WebSocket at `GET /ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_connection(socket, state))
}

/// Per-connection task, one per session for its entire lifetime (§4.5).
///
/// Drives the `open_unauth` → `open_auth` → `processing` → `closed` state
/// machine: inbound frames and a single in-flight turn future are raced in
/// one `tokio::select!` loop so that at most one turn ever runs per session
/// (§5 "at most one in-flight LLM/tool round per session").
async fn handle_connection(socket: WebSocket, app: Arc<AppState>) {
    let session = Arc::new(Session::new(app.http.clone(), &app.config));
    let session_id = session.id.as_str().to_string();
    app.sessions.insert(session.clone());
    info!(session_id = %session_id, "session opened");

    let (mut tx, mut rx) = socket.split();

    let established = ServerFrame::ConnectionEstablished {
        session_id: session_id.clone(),
        timestamp: now_rfc3339(),
    };
    if tx.send(Message::Text(established.to_json().into())).await.is_err() {
        app.sessions.remove(&session_id);
        return;
    }

    let (turn_tx, mut turn_rx) = mpsc::channel::<TurnOutcome>(1);
    let mut turn_in_flight = false;
    let mut queued_chat: VecDeque<String> = VecDeque::new();

    loop {
        tokio::select! {
            biased;

            _ = session.cancel.cancelled() => {
                break;
            }

            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_PAYLOAD_BYTES {
                            warn!(session_id = %session_id, size = text.len(), "payload too large, dropping");
                            continue;
                        }
                        session.touch().await;
                        let frame: ClientFrame = match serde_json::from_str(&text) {
                            Ok(f) => f,
                            Err(e) => {
                                warn!(session_id = %session_id, error = %e, "malformed frame");
                                let _ = tx.send(Message::Text(ServerFrame::error("malformed frame").to_json().into())).await;
                                continue;
                            }
                        };

                        if !handle_client_frame(
                            frame,
                            &app,
                            &session,
                            &mut tx,
                            &turn_tx,
                            &mut turn_in_flight,
                            &mut queued_chat,
                        ).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }

            Some(outcome) = turn_rx.recv(), if turn_in_flight => {
                turn_in_flight = false;
                *session.state.lock().await = SessionState::OpenAuth;

                if matches!(outcome, TurnOutcome::Final(_)) {
                    let typing_off = ServerFrame::Typing { typing: false };
                    if tx.send(Message::Text(typing_off.to_json().into())).await.is_err() {
                        break;
                    }
                }

                let frame = outcome_to_frame(outcome);
                if tx.send(Message::Text(frame.to_json().into())).await.is_err() {
                    break;
                }

                if let Some(next_message) = queued_chat.pop_front() {
                    spawn_turn(&app, &session, next_message, turn_tx.clone());
                    turn_in_flight = true;
                    *session.state.lock().await = SessionState::Processing;
                }
            }
        }
    }

    app.sessions.remove(&session_id);
    info!(session_id = %session_id, "session closed");
}

/// Handles one inbound `ClientFrame`. Returns `false` when the connection
/// should close (a `logout`-then-keepalive design would return `true`; only
/// protocol-level termination returns `false`).
async fn handle_client_frame(
    frame: ClientFrame,
    app: &Arc<AppState>,
    session: &Arc<Session>,
    tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    turn_tx: &mpsc::Sender<TurnOutcome>,
    turn_in_flight: &mut bool,
    queued_chat: &mut VecDeque<String>,
) -> bool {
    match frame {
        ClientFrame::Ping => {
            let _ = tx.send(Message::Text(ServerFrame::Pong.to_json().into())).await;
            true
        }

        ClientFrame::Auth { credentials } => {
            let auth_type = credentials.auth_type().to_string();
            let result = session.credentials.set(to_credentials(credentials)).await;
            let frame = match result {
                Ok(()) => {
                    *session.state.lock().await = SessionState::OpenAuth;
                    ServerFrame::AuthConfigured {
                        auth_type,
                        timestamp: now_rfc3339(),
                    }
                }
                Err(e) => ServerFrame::auth_failed(e.to_string()),
            };
            let _ = tx.send(Message::Text(frame.to_json().into())).await;
            true
        }

        ClientFrame::Logout => {
            session.credentials.clear().await;
            *session.state.lock().await = SessionState::OpenUnauth;
            let frame = ServerFrame::LogoutSuccess {
                message: "logged out".to_string(),
            };
            let _ = tx.send(Message::Text(frame.to_json().into())).await;
            true
        }

        ClientFrame::Chat { message } => {
            if app.config.session.require_auth && !session.credentials.has_credentials().await {
                let frame = ServerFrame::error("authentication is required before chatting");
                let _ = tx.send(Message::Text(frame.to_json().into())).await;
                return true;
            }

            if *turn_in_flight {
                use tb_core::types::BusyPolicy;
                match app.config.session.busy_policy {
                    BusyPolicy::Reject => {
                        let frame = ServerFrame::error("a turn is already in progress for this session");
                        let _ = tx.send(Message::Text(frame.to_json().into())).await;
                    }
                    BusyPolicy::Queue => {
                        if queued_chat.len() >= app.config.session.busy_queue_depth {
                            let frame = ServerFrame::error("busy queue is full");
                            let _ = tx.send(Message::Text(frame.to_json().into())).await;
                        } else {
                            queued_chat.push_back(message);
                        }
                    }
                }
                return true;
            }

            let _ = tx.send(Message::Text(ServerFrame::Typing { typing: true }.to_json().into())).await;
            spawn_turn(app, session, message, turn_tx.clone());
            *turn_in_flight = true;
            *session.state.lock().await = SessionState::Processing;
            true
        }
    }
}

fn spawn_turn(app: &Arc<AppState>, session: &Arc<Session>, message: String, reply_to: mpsc::Sender<TurnOutcome>) {
    let app = app.clone();
    let session = session.clone();
    let cancel = session.cancel.clone();
    tokio::spawn(async move {
        let outcome = tokio::select! {
            outcome = run_turn(app, session, message) => outcome,
            _ = cancel.cancelled() => TurnOutcome::Fatal("session closed".to_string()),
        };
        let _ = reply_to.send(outcome).await;
    });
}

fn outcome_to_frame(outcome: TurnOutcome) -> ServerFrame {
    match outcome {
        TurnOutcome::Final(text) => ServerFrame::AiResponse {
            message: text,
            tool_calls: None,
            tool_results: None,
            timestamp: now_rfc3339(),
        },
        TurnOutcome::Fatal(text) => ServerFrame::error(text),
    }
}

fn to_credentials(payload: AuthPayload) -> Credentials {
    match payload {
        AuthPayload::BearerToken { token } => Credentials::BearerToken { token },
        AuthPayload::BasicAuth { username, password } => Credentials::BasicAuth {
            user: username,
            pass: password,
        },
        AuthPayload::ApiKey { value, header_name } => Credentials::ApiKey { value, header_name },
        AuthPayload::Oauth2ClientCredentials {
            client_id,
            client_secret,
            token_url,
            scope,
        } => Credentials::new_oauth2(client_id, client_secret, token_url, scope),
        AuthPayload::Custom { headers } => Credentials::Custom { headers },
    }
}
