//! Per-client websocket session: authenticate, admit, load, relay, close.
//!
//! Rejections follow the accept-then-close pattern: the socket is accepted,
//! a JSON error frame is written, and the connection closes with a defined
//! code (4001 unauthenticated, 4003 access denied, 4029 rate limited) so
//! client libraries surface the reason to application code.

use super::protocol::{close_code, room_id_for_page, ServerFrame};
use super::room::{ConnHandle, Outbound};
use crate::api;
use crate::app::App;
use crate::authz::{self, Action};
use crate::rate_limit;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use models::ErrorCode;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub async fn ws_pages(
    State(app): State<Arc<App>>,
    Path(page_external_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: axum::http::HeaderMap,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    // Authentication is carried by the upgrade request (bearer token or
    // session cookie); failures surface through the socket, not as HTTP.
    let user = api::authenticate_request(&app, &headers).await;
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string());

    ws.on_upgrade(move |socket| serve_connection(app, socket, page_external_id, user, ip))
}

async fn reject(mut socket: WebSocket, code: ErrorCode, close: u16, message: &str) {
    let frame = ServerFrame::Error {
        code,
        message: message.to_string(),
    };
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = socket.send(Message::Text(json)).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close,
            reason: std::borrow::Cow::Owned(message.to_string()),
        })))
        .await;
}

async fn serve_connection(
    app: Arc<App>,
    mut socket: WebSocket,
    page_external_id: String,
    user: Option<relay_sql::users::User>,
    ip: String,
) {
    // Rate limiting runs before anything else touches the database: keyed
    // by user for authenticated clients, by IP for anonymous attempts.
    let rate_key = match &user {
        Some(user) => rate_limit::ws_user_key(user.id),
        None => rate_limit::ws_ip_key(&ip),
    };
    let decision = app
        .rate_limiter
        .check_and_increment(
            &rate_key,
            app.settings.ws_rate_limit,
            app.settings.ws_rate_window_secs,
        )
        .await;
    if !decision.allowed {
        tracing::info!(key = %rate_key, count = decision.count, "connection rate limited");
        return reject(
            socket,
            ErrorCode::RateLimited,
            close_code::RATE_LIMITED,
            "Too many connection attempts. Please wait and try again.",
        )
        .await;
    }

    let Some(user) = user else {
        return reject(
            socket,
            ErrorCode::NotAuthenticated,
            close_code::NOT_AUTHENTICATED,
            "Authentication required.",
        )
        .await;
    };

    let page = match page_external_id
        .parse()
        .ok()
        .map(|id| relay_sql::pages::fetch_by_external_id(id, &app.pool))
    {
        Some(fetch) => match fetch.await {
            Ok(Some(page)) if !page.is_deleted => page,
            Ok(_) => {
                return reject(
                    socket,
                    ErrorCode::AccessDenied,
                    close_code::ACCESS_DENIED,
                    "You do not have access to this page.",
                )
                .await;
            }
            Err(err) => {
                tracing::error!(?err, page = %page_external_id, "page lookup failed");
                return reject(
                    socket,
                    ErrorCode::AccessDenied,
                    close_code::ACCESS_DENIED,
                    "You do not have access to this page.",
                )
                .await;
            }
        },
        None => {
            return reject(
                socket,
                ErrorCode::AccessDenied,
                close_code::ACCESS_DENIED,
                "You do not have access to this page.",
            )
            .await;
        }
    };

    let snapshot = authz::snapshot_for_page_within(
        app.settings.admission_timeout,
        user.id,
        &page,
        &app.pool,
    )
    .await;
    if !authz::can(user.id, Action::ReadPage, &snapshot) {
        return reject(
            socket,
            ErrorCode::AccessDenied,
            close_code::ACCESS_DENIED,
            "You do not have access to this page.",
        )
        .await;
    }
    // Viewers are admitted read-only; their inbound updates are dropped by
    // the room without acknowledgement.
    let read_only = !authz::can(user.id, Action::WritePage, &snapshot);

    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let room_id = room_id_for_page(page.external_id);
    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel();

    let joined = app
        .rooms
        .join(
            &room_id,
            ConnHandle {
                id: conn_id,
                user_id: user.id,
                read_only,
                tx: out_tx,
            },
        )
        .await;
    if let Err(err) = joined {
        tracing::error!(?err, room = %room_id, "failed to join room");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    tracing::info!(room = %room_id, user = user.id, conn_id, read_only, "connection joined");

    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Binary(bytes))) => {
                    // The room task is the serialisation point; it applies,
                    // persists, and fans out (and drops read-only senders).
                    app.rooms.update(&room_id, conn_id, bytes);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => (), // text frames and pings are not part of the protocol
                Some(Err(err)) => {
                    tracing::debug!(?err, room = %room_id, conn_id, "socket error");
                    break;
                }
            },
            outbound = out_rx.recv() => {
                let Some(outbound) = outbound else { break };
                match outbound {
                    Outbound::Binary(bytes) => {
                        if socket.send(Message::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Frame(frame) => {
                        if let Ok(json) = serde_json::to_string(&frame) {
                            if socket.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        // Access revocation re-runs the admission check on
                        // the live connection and closes it when it fails.
                        if let ServerFrame::AccessRevoked { user_id } = frame {
                            if user_id == user.id
                                && !readmit(&app, user.id, &page).await
                            {
                                tracing::info!(
                                    room = %room_id, user = user.id,
                                    "access revoked; closing connection"
                                );
                                let error = ServerFrame::Error {
                                    code: ErrorCode::AccessDenied,
                                    message: "Access revoked.".to_string(),
                                };
                                if let Ok(json) = serde_json::to_string(&error) {
                                    let _ = socket.send(Message::Text(json)).await;
                                }
                                let _ = socket
                                    .send(Message::Close(Some(CloseFrame {
                                        code: close_code::ACCESS_DENIED,
                                        reason: std::borrow::Cow::Borrowed(
                                            "Access revoked.",
                                        ),
                                    })))
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    app.rooms.leave(&room_id, conn_id);
    tracing::info!(room = %room_id, user = user.id, conn_id, "connection left");
}

async fn readmit(app: &App, user_id: i64, page: &relay_sql::pages::Page) -> bool {
    let snapshot =
        authz::snapshot_for_page_within(app.settings.admission_timeout, user_id, page, &app.pool)
            .await;
    authz::can(user_id, Action::ReadPage, &snapshot)
}
