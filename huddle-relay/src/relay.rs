//! Relay server core: shared state, WebSocket handler, and delivery.
//!
//! Each WebSocket connection gets a reader task that feeds inbound frames to
//! [`RelayState::handle_text`] one at a time, and a writer task that drains
//! the connection's [`Outbox`]. All registry access goes through a single
//! lock held only for the synchronous routing decision; channel sends happen
//! after it is released.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use huddle_proto::codec::{self, DEFAULT_MAX_FRAME_SIZE};
use huddle_proto::id::{ConnectionId, RoomId};
use huddle_proto::signal::{ClientEvent, ServerEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::registry::{Outbound, Outbox, Registry};
use crate::router::{self, Dispatch, RoutingPolicy};

/// Shared relay server state: the registry lock and routing settings.
pub struct RelayState {
    registry: Mutex<Registry>,
    policy: RoutingPolicy,
    max_frame_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay state with the default routing policy and frame limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RoutingPolicy::default(), DEFAULT_MAX_FRAME_SIZE, Registry::new())
    }

    /// Creates a relay state with a custom policy, frame limit, and registry.
    #[must_use]
    pub fn with_config(policy: RoutingPolicy, max_frame_size: usize, registry: Registry) -> Self {
        Self {
            registry: Mutex::new(registry),
            policy,
            max_frame_size,
        }
    }

    /// Registers a new connection and queues its `welcome` frame.
    ///
    /// The welcome is pushed while the registry is locked so it is always
    /// the first item in the outbox.
    pub fn attach(&self, outbox: Outbox) -> ConnectionId {
        let mut registry = self.registry.lock();
        let id = registry.register(outbox.clone());
        let _ = outbox.send(Outbound::Event(ServerEvent::Welcome {
            connection_id: id.clone(),
        }));
        drop(registry);
        tracing::info!(conn_id = %id, "connection attached");
        id
    }

    /// Decodes one text frame from `conn` and routes it.
    ///
    /// Oversized or malformed frames are logged and dropped; the sender gets
    /// no reply.
    pub fn handle_text(&self, conn: &ConnectionId, text: &str) {
        match codec::decode_client(text, self.max_frame_size) {
            Ok(event) => self.handle_event(conn, event),
            Err(e) => {
                tracing::warn!(conn_id = %conn, error = %e, "dropping inbound frame");
            }
        }
    }

    /// Routes a decoded event from `conn` and delivers the result.
    pub fn handle_event(&self, conn: &ConnectionId, event: ClientEvent) {
        let name = event.name();
        let target = event.target().cloned();
        let planned = {
            let mut registry = self.registry.lock();
            router::dispatch(&mut registry, conn, event, &self.policy)
                .map(|dispatch| (registry.resolve(&dispatch.scope), dispatch))
        };

        let Some((recipients, dispatch)) = planned else {
            tracing::debug!(
                conn_id = %conn,
                event = name,
                target = ?target,
                "event reached nobody"
            );
            return;
        };

        tracing::debug!(
            conn_id = %conn,
            event = name,
            recipients = recipients.len(),
            "routing event"
        );
        deliver(recipients, &dispatch);
    }

    /// Removes `conn` and tells the remaining sessions it left.
    ///
    /// Returns `false` if the connection was already gone, in which case
    /// nothing is broadcast.
    pub fn disconnect(&self, conn: &ConnectionId) -> bool {
        let planned = {
            let mut registry = self.registry.lock();
            registry.remove(conn).map(|removed| {
                let dispatch = router::departure(&removed, &self.policy);
                let recipients = dispatch
                    .as_ref()
                    .map(|d| registry.resolve(&d.scope))
                    .unwrap_or_default();
                (removed, recipients, dispatch)
            })
        };

        let Some((removed, recipients, dispatch)) = planned else {
            return false;
        };

        tracing::info!(
            conn_id = %conn,
            room_id = ?removed.room,
            notified = recipients.len(),
            "connection removed"
        );
        if let Some(dispatch) = dispatch {
            deliver(recipients, &dispatch);
        }
        true
    }

    /// Snapshot of the members of `room`.
    #[must_use]
    pub fn members_of(&self, room: &RoomId) -> HashSet<ConnectionId> {
        self.registry.lock().members_of(room)
    }

    /// Room `conn` has joined, if any.
    #[must_use]
    pub fn room_of(&self, conn: &ConnectionId) -> Option<RoomId> {
        self.registry.lock().room_of(conn).cloned()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.lock().connection_count()
    }

    /// Number of entries in the room table.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.registry.lock().room_count()
    }

    /// Ask every connected session's writer to send a close frame.
    ///
    /// Used for graceful shutdown; each connection then runs its normal
    /// disconnect path.
    pub fn close_all_connections(&self) {
        let outboxes = self.registry.lock().outboxes();
        tracing::info!(count = outboxes.len(), "closing all connections");
        for outbox in outboxes {
            let _ = outbox.send(Outbound::Close);
        }
    }
}

/// Pushes `dispatch.event` to every recipient. Closed outboxes are skipped.
fn deliver(recipients: Vec<(ConnectionId, Outbox)>, dispatch: &Dispatch) {
    for (id, outbox) in recipients {
        if outbox.send(Outbound::Event(dispatch.event.clone())).is_err() {
            tracing::debug!(conn_id = %id, "recipient outbox closed, dropping");
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Attach to the registry and queue the `welcome` frame.
/// 2. Spawn a writer task draining the outbox into the socket.
/// 3. Read frames sequentially, routing each through the relay state.
/// 4. When either side stops, remove the connection and broadcast its
///    departure.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let conn_id = state.attach(tx);

    let writer_conn_id = conn_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let frame = match outbound {
                Outbound::Event(event) => match codec::encode_server(&event) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::error!(
                            conn_id = %writer_conn_id,
                            error = %e,
                            "failed to encode outbound event"
                        );
                        continue;
                    }
                },
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if ws_sender.send(frame).await.is_err() {
                tracing::warn!(conn_id = %writer_conn_id, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_conn_id = conn_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    reader_state.handle_text(&reader_conn_id, text.as_str());
                }
                Message::Binary(data) => {
                    tracing::warn!(
                        conn_id = %reader_conn_id,
                        len = data.len(),
                        "ignoring binary frame"
                    );
                }
                Message::Close(_) => {
                    tracing::info!(conn_id = %reader_conn_id, "received close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.disconnect(&conn_id);
    tracing::info!(conn_id = %conn_id, "connection closed");
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
