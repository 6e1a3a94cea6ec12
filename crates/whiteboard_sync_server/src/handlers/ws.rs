use crate::auth::{Claims, TokenError, TokenVerifier};
use crate::locks::{LockHolder, ShapeLockManager};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::SessionRegistry;
use crate::sync::{BoardRegistry, ClientConnection};
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use whiteboard_core::{
    BoardError, CollaboratorRole, CollaboratorStore, DeltaEngine, DeltaInput, DocumentRepository,
    Result,
};

/// Query parameters for the WebSocket handshake
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Access token
    pub token: Option<String>,
    /// Refresh token, tried when the access token is expired
    pub refresh: Option<String>,
}

/// Shared state for the realtime gateway
#[derive(Clone)]
pub struct GatewayState {
    pub verifier: Arc<dyn TokenVerifier>,
    pub registry: Arc<SessionRegistry>,
    pub locks: Arc<ShapeLockManager>,
    pub engine: Arc<DeltaEngine>,
    pub documents: Arc<dyn DocumentRepository>,
    pub collaborators: Arc<dyn CollaboratorStore>,
    pub boards: Arc<BoardRegistry>,
}

/// The authenticated identity behind one connection. Passed explicitly
/// into every handler; nothing is smuggled on the socket object.
#[derive(Debug, Clone)]
pub struct Session {
    pub client_id: String,
    pub user_id: String,
    pub username: String,
}

/// Verify the handshake tokens: access token first, refresh token only
/// when the access token is merely expired.
fn authenticate(
    verifier: &dyn TokenVerifier,
    token: Option<&str>,
    refresh: Option<&str>,
) -> std::result::Result<Claims, TokenError> {
    let token = token.ok_or_else(|| TokenError::Invalid("missing token".into()))?;
    match verifier.verify(token) {
        Err(TokenError::Expired) => match refresh {
            Some(refresh) => verifier.verify(refresh),
            None => Err(TokenError::Expired),
        },
        other => other,
    }
}

/// WebSocket upgrade handler. Authentication failure is the one case
/// that terminates the connection outright, before any session state is
/// created.
pub async fn ws_handler(
    State(state): State<GatewayState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let claims = match authenticate(
        state.verifier.as_ref(),
        query.token.as_deref(),
        query.refresh.as_deref(),
    ) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(error = %e, "WebSocket connection rejected");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let session = Session {
        client_id: Uuid::new_v4().to_string(),
        user_id: claims.sub,
        username: claims.name,
    };
    info!(client_id = %session.client_id, user_id = %session.user_id, "WebSocket upgrade");

    ws.on_upgrade(move |socket| handle_socket(socket, state, session))
        .into_response()
}

enum Event {
    Frame(Option<std::result::Result<Message, axum::Error>>),
    Broadcast(Option<ServerMessage>),
}

async fn recv_active(active: &mut Option<ClientConnection>) -> Option<ServerMessage> {
    match active {
        Some(conn) => conn.recv_broadcast().await,
        None => std::future::pending().await,
    }
}

/// Drive one established connection until it disconnects.
async fn handle_socket(socket: WebSocket, state: GatewayState, session: Session) {
    if let Err(e) = state
        .registry
        .register_client(&session.client_id, &session.user_id, &session.username)
        .await
    {
        error!(client_id = %session.client_id, error = %e, "Failed to register client");
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut active: Option<ClientConnection> = None;
    info!(client_id = %session.client_id, user_id = %session.user_id, "Client connected");

    loop {
        let event = tokio::select! {
            frame = ws_rx.next() => Event::Frame(frame),
            msg = recv_active(&mut active) => Event::Broadcast(msg),
        };

        match event {
            Event::Frame(Some(Ok(Message::Text(text)))) => {
                let ack = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(msg) => dispatch(&state, &session, &mut active, msg, &mut ws_tx).await,
                    Err(e) => ServerMessage::ack_error(format!("malformed payload: {e}")),
                };
                if send(&mut ws_tx, &ack).await.is_err() {
                    break;
                }
            }
            Event::Frame(Some(Ok(Message::Ping(data)))) => {
                if ws_tx.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Event::Frame(Some(Ok(Message::Close(_)))) => {
                debug!(client_id = %session.client_id, "Client requested close");
                break;
            }
            Event::Frame(Some(Ok(_))) => {}
            Event::Frame(Some(Err(e))) => {
                error!(client_id = %session.client_id, error = %e, "WebSocket error");
                break;
            }
            Event::Frame(None) => break,
            Event::Broadcast(Some(msg)) => {
                if send(&mut ws_tx, &msg).await.is_err() {
                    break;
                }
            }
            // Room channel closed; membership is stale.
            Event::Broadcast(None) => active = None,
        }
    }

    // Disconnect runs the full leave sequence before the session record
    // is dropped: abandoned locks must not outlive their holder.
    if let Some(conn) = active.take() {
        run_leave(&state, &session, conn).await;
    }
    if let Err(e) = state
        .registry
        .unregister_client(&session.client_id, &session.user_id)
        .await
    {
        warn!(client_id = %session.client_id, error = %e, "Failed to unregister client");
    }
    info!(client_id = %session.client_id, user_id = %session.user_id, "Client disconnected");
}

/// Route one client message; the returned ack goes back to the caller.
/// Handler errors are acks, never connection teardown.
async fn dispatch(
    state: &GatewayState,
    session: &Session,
    active: &mut Option<ClientConnection>,
    msg: ClientMessage,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) -> ServerMessage {
    let result = match msg {
        ClientMessage::JoinBoard { board_id } => {
            handle_join(state, session, active, &board_id, ws_tx).await
        }
        ClientMessage::LeaveBoard => {
            if let Some(conn) = active.take() {
                run_leave(state, session, conn).await;
            }
            Ok(())
        }
        ClientMessage::BoardUpdate(input) => {
            handle_board_update(state, session, active.as_ref(), input).await
        }
        ClientMessage::SelectShape { shape_id } | ClientMessage::LockShape { shape_id } => {
            handle_lock(state, session, active.as_ref(), &shape_id).await
        }
        ClientMessage::UnlockShape { shape_id } => {
            handle_unlock(state, session, active.as_ref(), &shape_id).await
        }
        ClientMessage::ActiveUsers => {
            handle_active_users(state, session, active.as_ref(), ws_tx).await
        }
        ClientMessage::MouseMove { x, y } => handle_mouse_move(session, active.as_ref(), x, y),
        ClientMessage::BoardChange { payload } => {
            handle_board_change(session, active.as_ref(), payload)
        }
        ClientMessage::Undo => handle_history(state, session, active.as_ref(), ws_tx, History::Undo).await,
        ClientMessage::Redo => handle_history(state, session, active.as_ref(), ws_tx, History::Redo).await,
        ClientMessage::CreateSnapshot => handle_snapshot(state, session, active.as_ref()).await,
        ClientMessage::ResetBoard => handle_reset(state, session, active.as_ref(), ws_tx).await,
    };

    match result {
        Ok(()) => ServerMessage::ack_success(),
        // Request-level failures are expected traffic; store and
        // serialization faults are not.
        Err(e) if e.is_recoverable() => {
            warn!(client_id = %session.client_id, error = %e, "Handler error");
            ServerMessage::ack_error(e.to_string())
        }
        Err(e) => {
            error!(client_id = %session.client_id, error = %e, "Handler failed");
            ServerMessage::ack_error(e.to_string())
        }
    }
}

async fn send(ws_tx: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> Result<()> {
    let json = serde_json::to_string(msg)?;
    ws_tx
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| BoardError::Store(format!("websocket send failed: {e}")))
}

fn require_board(active: Option<&ClientConnection>) -> Result<&ClientConnection> {
    active.ok_or_else(|| BoardError::BadRequest("not in any board".into()))
}

/// Owner always; otherwise collaborator role `edit` is required.
async fn authorize_edit(state: &GatewayState, board_id: &str, user_id: &str) -> Result<()> {
    let doc = state
        .documents
        .get(board_id)
        .await?
        .ok_or_else(|| BoardError::NotFound(board_id.to_string()))?;
    if doc.owner_id == user_id {
        return Ok(());
    }
    match state.collaborators.role(board_id, user_id).await? {
        Some(CollaboratorRole::Edit) => Ok(()),
        _ => Err(BoardError::Unauthorized(
            "you don't have permission to edit".into(),
        )),
    }
}

async fn authorize_owner(state: &GatewayState, board_id: &str, user_id: &str) -> Result<()> {
    let doc = state
        .documents
        .get(board_id)
        .await?
        .ok_or_else(|| BoardError::NotFound(board_id.to_string()))?;
    if doc.owner_id == user_id {
        Ok(())
    } else {
        Err(BoardError::Unauthorized("board owner only".into()))
    }
}

/// Leave sequence: forced unlock, registry leave, `userLeft` to the rest
/// of the board, then release the room slot.
async fn run_leave(state: &GatewayState, session: &Session, conn: ClientConnection) {
    let board_id = conn.board_id().to_string();
    if let Err(e) = state.locks.forced_unlock(&board_id, &session.user_id).await {
        warn!(board_id, error = %e, "Forced unlock failed on leave");
    }
    if let Err(e) = state
        .registry
        .leave_board(&session.client_id, &session.user_id)
        .await
    {
        warn!(board_id, error = %e, "Registry leave failed");
    }
    conn.room().broadcast(
        &session.client_id,
        ServerMessage::UserLeft {
            client_id: session.client_id.clone(),
            user_id: session.user_id.clone(),
            username: session.username.clone(),
        },
    );
    drop(conn);
    state.boards.maybe_remove_room(&board_id).await;
}

async fn handle_join(
    state: &GatewayState,
    session: &Session,
    active: &mut Option<ClientConnection>,
    board_id: &str,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) -> Result<()> {
    // One board per client: switching boards is leave-then-join.
    if let Some(conn) = active.take() {
        run_leave(state, session, conn).await;
    }

    let document = state
        .registry
        .join_board(&session.client_id, board_id, &session.user_id)
        .await?;
    let room = state.boards.get_or_create_room(board_id).await;
    let conn = ClientConnection::new(session.client_id.clone(), room.clone());

    // Initial state goes to the joining client only.
    let shapes = DeltaEngine::current_state(&document);
    send(ws_tx, &ServerMessage::BoardState { shapes }).await?;
    let locks = state.locks.locked_shapes(board_id).await?;
    send(ws_tx, &ServerMessage::CurrentlyLockedShapes { locks }).await?;

    room.broadcast(
        &session.client_id,
        ServerMessage::UserJoined {
            client_id: session.client_id.clone(),
            user_id: session.user_id.clone(),
            username: session.username.clone(),
            timestamp: Utc::now(),
        },
    );
    *active = Some(conn);
    Ok(())
}

async fn handle_board_update(
    state: &GatewayState,
    session: &Session,
    active: Option<&ClientConnection>,
    input: DeltaInput,
) -> Result<()> {
    let conn = require_board(active)?;
    let board_id = conn.board_id();
    authorize_edit(state, board_id, &session.user_id).await?;

    // Broadcast under the guard: full-state frames must leave in sequence
    // order, or a slower handler would overwrite a newer state with an
    // older one on every receiver.
    let _guard = conn.room().lock_document().await;
    let shapes = state
        .engine
        .append_delta(board_id, input, &session.user_id)
        .await?;
    conn.room()
        .broadcast(&session.client_id, ServerMessage::BoardUpdate { shapes });
    Ok(())
}

async fn handle_lock(
    state: &GatewayState,
    session: &Session,
    active: Option<&ClientConnection>,
    shape_id: &str,
) -> Result<()> {
    let conn = require_board(active)?;
    let holder = LockHolder {
        uid: session.user_id.clone(),
        username: session.username.clone(),
    };

    let acquired = state
        .locks
        .lock_shape(conn.board_id(), shape_id, &holder)
        .await?;
    if !acquired {
        return Err(BoardError::Conflict(format!(
            "shape '{shape_id}' is locked by another user"
        )));
    }

    conn.room().broadcast(
        &session.client_id,
        ServerMessage::LockedNewShape {
            shape_id: shape_id.to_string(),
            lock_user: holder,
        },
    );
    Ok(())
}

async fn handle_unlock(
    state: &GatewayState,
    session: &Session,
    active: Option<&ClientConnection>,
    shape_id: &str,
) -> Result<()> {
    let conn = require_board(active)?;
    state.locks.unlock_shape(conn.board_id(), shape_id).await?;
    conn.room().broadcast(
        &session.client_id,
        ServerMessage::UnlockShape {
            shape_id: shape_id.to_string(),
        },
    );
    Ok(())
}

async fn handle_active_users(
    state: &GatewayState,
    session: &Session,
    active: Option<&ClientConnection>,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) -> Result<()> {
    let conn = require_board(active)?;
    let users = state.registry.active_users(conn.board_id()).await?;

    // Broadcasts exclude the sender, so the requester gets a direct copy.
    send(ws_tx, &ServerMessage::ActiveUsers { users: users.clone() }).await?;
    conn.room()
        .broadcast(&session.client_id, ServerMessage::ActiveUsers { users });
    Ok(())
}

fn handle_mouse_move(
    session: &Session,
    active: Option<&ClientConnection>,
    x: f64,
    y: f64,
) -> Result<()> {
    let conn = require_board(active)?;
    conn.room().broadcast(
        &session.client_id,
        ServerMessage::MouseMove {
            x,
            y,
            client_id: session.client_id.clone(),
            user_id: session.user_id.clone(),
        },
    );
    Ok(())
}

fn handle_board_change(
    session: &Session,
    active: Option<&ClientConnection>,
    payload: serde_json::Value,
) -> Result<()> {
    let conn = require_board(active)?;
    conn.room()
        .broadcast(&session.client_id, ServerMessage::UpdatedBoard { payload });
    Ok(())
}

enum History {
    Undo,
    Redo,
}

async fn handle_history(
    state: &GatewayState,
    session: &Session,
    active: Option<&ClientConnection>,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    direction: History,
) -> Result<()> {
    let conn = require_board(active)?;
    let board_id = conn.board_id();
    authorize_edit(state, board_id, &session.user_id).await?;

    // Broadcast under the guard so state frames stay in sequence order.
    let shapes = {
        let _guard = conn.room().lock_document().await;
        match direction {
            History::Undo => state.engine.undo(board_id).await?,
            History::Redo => state.engine.redo(board_id).await?,
        };
        let shapes = state.engine.board_state(board_id).await?;
        conn.room().broadcast(
            &session.client_id,
            ServerMessage::BoardUpdate {
                shapes: shapes.clone(),
            },
        );
        shapes
    };

    // The caller needs the rewound state too; broadcasts skip the sender.
    send(ws_tx, &ServerMessage::BoardState { shapes }).await?;
    Ok(())
}

async fn handle_snapshot(
    state: &GatewayState,
    session: &Session,
    active: Option<&ClientConnection>,
) -> Result<()> {
    let conn = require_board(active)?;
    let board_id = conn.board_id();
    authorize_edit(state, board_id, &session.user_id).await?;

    let _guard = conn.room().lock_document().await;
    state.engine.create_snapshot(board_id).await?;
    Ok(())
}

async fn handle_reset(
    state: &GatewayState,
    session: &Session,
    active: Option<&ClientConnection>,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) -> Result<()> {
    let conn = require_board(active)?;
    let board_id = conn.board_id();
    authorize_owner(state, board_id, &session.user_id).await?;

    // Broadcast under the guard so state frames stay in sequence order.
    let shapes = {
        let _guard = conn.room().lock_document().await;
        state.engine.reset_board(board_id).await?;
        let shapes = state.engine.board_state(board_id).await?;
        conn.room().broadcast(
            &session.client_id,
            ServerMessage::BoardUpdate {
                shapes: shapes.clone(),
            },
        );
        shapes
    };

    send(ws_tx, &ServerMessage::BoardState { shapes }).await?;
    Ok(())
}
