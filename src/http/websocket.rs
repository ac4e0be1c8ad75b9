//! WebSocket upgrade routing.
//!
//! # Responsibilities
//! - Hold the path-keyed handler registry (frozen before listening)
//! - Resolve an upgrade path to its handler list
//! - Complete the handshake and pump frames between the socket and handlers
//!
//! # Data Flow
//! ```text
//! Client ──frames──→ session ──broadcast──→ handler 1..n
//! Client ←─frames─── session ←───mpsc────── handler 1..n
//! ```
//!
//! # Design Decisions
//! - Lookup precedence: full path (leading slash), then first segment,
//!   then path without its leading slash; first match wins
//! - Every handler under the matched key runs, in registration order
//! - Unmatched paths get a bare 404 before the handshake
//! - The session owns the socket; handlers only see channels

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequestParts,
    },
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{future::BoxFuture, FutureExt, SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

use crate::http::request::{request_host, ListenerScheme};
use crate::http::response::reject_upgrade;
use crate::observability::metrics;

/// Per-session channel capacity.
const CHANNEL_CAPACITY: usize = 64;

/// A registered connection handler.
pub type WsHandler = Arc<dyn Fn(WsConnection) -> BoxFuture<'static, ()> + Send + Sync>;

/// What a handler gets for one accepted connection.
#[derive(Debug)]
pub struct WsConnection {
    /// `ip:port:sec-websocket-key`
    pub peer_id: String,
    /// `scheme://host[:port]/path?query`
    pub session_id: String,
    /// Registry key the path matched.
    pub route: String,
    /// Request path as received.
    pub path: String,
    /// Text and binary frames from the client.
    pub incoming: broadcast::Receiver<Message>,
    /// Frames to send to the client.
    pub outgoing: mpsc::Sender<Message>,
}

/// Collects handlers during startup.
#[derive(Default)]
pub struct WsRegistryBuilder {
    routes: HashMap<String, Vec<WsHandler>>,
}

impl WsRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler under `path_key`. Several handlers may share a key.
    pub fn register<F, Fut>(&mut self, path_key: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(WsConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let path_key = path_key.into();
        tracing::debug!(key = %path_key, "WebSocket handler registered");
        let handler: WsHandler = Arc::new(move |conn| handler(conn).boxed());
        self.routes.entry(path_key).or_default().push(handler);
        self
    }

    /// Freeze the registry.
    pub fn build(self) -> WsRegistry {
        WsRegistry {
            routes: self
                .routes
                .into_iter()
                .map(|(key, handlers)| (key, handlers.into()))
                .collect(),
        }
    }
}

/// Immutable path → handlers table.
#[derive(Default)]
pub struct WsRegistry {
    routes: HashMap<String, Arc<[WsHandler]>>,
}

impl std::fmt::Debug for WsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

impl WsRegistry {
    /// Find the handler list for a request path.
    pub fn resolve(&self, path: &str) -> Option<(&str, &Arc<[WsHandler]>)> {
        let trimmed = path.trim_start_matches('/');
        let full = format!("/{trimmed}");
        let segment = trimmed.split('/').next().unwrap_or_default();

        let found = [full.as_str(), segment, trimmed]
            .into_iter()
            .filter(|key| !key.is_empty())
            .find_map(|key| self.routes.get_key_value(key))
            .map(|(key, handlers)| (key.as_str(), handlers));
        found
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Route an upgrade request to the local handlers.
pub async fn upgrade(
    registry: Arc<WsRegistry>,
    scheme: ListenerScheme,
    peer: SocketAddr,
    request: Request<Body>,
) -> Response {
    let ws_key = request
        .headers()
        .get("sec-websocket-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    let peer_id = format!("{}:{}:{}", peer.ip(), peer.port(), ws_key);
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let session_id = format!(
        "{}://{}{}",
        scheme.ws_str(),
        request_host(&request).unwrap_or_default(),
        path_and_query
    );
    let path = request.uri().path().to_string();

    let Some((route, handlers)) = registry.resolve(&path) else {
        tracing::warn!(peer_id = %peer_id, session_id = %session_id, path = %path, "No WebSocket handler for path");
        return reject_upgrade(StatusCode::NOT_FOUND);
    };
    let route = route.to_string();
    let handlers = Arc::clone(handlers);

    let (mut parts, _body) = request.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!(peer_id = %peer_id, error = %rejection, "Invalid WebSocket handshake");
            return rejection.into_response();
        }
    };

    metrics::record_ws_session(&route);
    let session = Session {
        peer_id,
        session_id,
        route,
        path,
        handlers,
    };
    let failed_peer = session.peer_id.clone();
    ws.on_failed_upgrade(move |e| {
        tracing::warn!(peer_id = %failed_peer, error = %e, "WebSocket upgrade failed");
    })
    .on_upgrade(move |socket| session.run(socket))
}

struct Session {
    peer_id: String,
    session_id: String,
    route: String,
    path: String,
    handlers: Arc<[WsHandler]>,
}

impl Session {
    async fn run(self, socket: WebSocket) {
        tracing::info!(peer_id = %self.peer_id, session_id = %self.session_id, route = %self.route, "WebSocket open");

        let (mut sink, mut stream) = socket.split();
        let (inbound_tx, _) = broadcast::channel::<Message>(CHANNEL_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);

        for handler in self.handlers.iter() {
            let conn = WsConnection {
                peer_id: self.peer_id.clone(),
                session_id: self.session_id.clone(),
                route: self.route.clone(),
                path: self.path.clone(),
                incoming: inbound_tx.subscribe(),
                outgoing: outbound_tx.clone(),
            };
            tokio::spawn(handler(conn));
        }
        drop(outbound_tx);

        let mut handlers_open = true;
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| f.code);
                        tracing::info!(peer_id = %self.peer_id, session_id = %self.session_id, code = ?code, "WebSocket close");
                        break;
                    }
                    Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                        let binary = matches!(message, Message::Binary(_));
                        tracing::debug!(peer_id = %self.peer_id, binary, "WebSocket message");
                        // No receivers simply means every handler already returned.
                        let _ = inbound_tx.send(message);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(peer_id = %self.peer_id, session_id = %self.session_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        tracing::info!(peer_id = %self.peer_id, session_id = %self.session_id, "WebSocket close");
                        break;
                    }
                },
                outbound = outbound_rx.recv(), if handlers_open => match outbound {
                    Some(message) => {
                        if let Err(e) = sink.send(message).await {
                            tracing::warn!(peer_id = %self.peer_id, error = %e, "WebSocket error");
                            break;
                        }
                    }
                    None => handlers_open = false,
                },
            }
        }

        let _ = sink.close().await;
    }
}
