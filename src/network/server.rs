//! WebSocket Game Server
//!
//! Async WebSocket server for player connections.
//! Handles authentication and routes requests to the [`GameService`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::config::ServerConfig;
use crate::error::{GameError, GameResult};
use crate::network::auth::{validate_token, AuthConfig};
use crate::network::protocol::{
    peek_id, AuthResult, ClientMessage, ErrorCode, Request, Response, ServerMessage,
};
use crate::service::GameService;

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// User bound by `auth`.
    user_id: Option<String>,
    /// Connection time.
    connected_at: Instant,
}

/// Per-connection authentication state.
#[derive(Debug, Clone, Default)]
pub struct Connection {
    /// User id from a validated token.
    bound_user: Option<String>,
    /// Whether requests must carry an authenticated user.
    auth_required: bool,
}

impl Connection {
    /// Fresh connection; auth is required when a verifier is configured.
    pub fn new(auth: &AuthConfig) -> Self {
        Self { bound_user: None, auth_required: auth.is_configured() }
    }

    /// User bound to this connection, if any.
    pub fn bound_user(&self) -> Option<&str> {
        self.bound_user.as_deref()
    }

    /// Check that a request may act for `claimed_user_id`.
    pub fn authorize(&self, claimed_user_id: &str) -> GameResult<()> {
        match &self.bound_user {
            Some(bound) if bound != claimed_user_id => {
                Err(crate::game::validator::ValidationError::Unauthorized.into())
            }
            Some(_) => Ok(()),
            None if self.auth_required => Err(GameError::NotAuthenticated),
            None => Ok(()),
        }
    }
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Game operations.
    service: Arc<GameService>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, service: Arc<GameService>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            service,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run the server.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if !self.reserve_slot(addr).await {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(Self::reject_overloaded(stream, addr));
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Claim a client slot before the handshake so concurrent accepts
    /// cannot exceed the limit.
    async fn reserve_slot(&self, addr: SocketAddr) -> bool {
        let mut clients = self.clients.write().await;
        if clients.len() >= self.config.max_connections {
            return false;
        }
        clients.insert(addr, ConnectedClient { user_id: None, connected_at: Instant::now() });
        true
    }

    async fn reject_overloaded(stream: TcpStream, addr: SocketAddr) {
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };
        let busy = Response::error(0, 503, ErrorCode::ServerOverloaded, "Server is full");
        if let Ok(text) = busy.to_json() {
            let _ = ws.send(Message::Text(text)).await;
        }
        let _ = ws.close(None).await;
        debug!("Turned away {}", addr);
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let service = self.service.clone();
        let auth = self.config.auth.clone();
        let idle_timeout = self.config.idle_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match timeout(idle_timeout, accept_async(stream)).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    clients.write().await.remove(&addr);
                    return;
                }
                Err(_) => {
                    debug!("Handshake from {} timed out", addr);
                    clients.write().await.remove(&addr);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<Response>(64);

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(response) = msg_rx.recv().await {
                    let text = match response.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize response: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let mut connection = Connection::new(&auth);

            loop {
                tokio::select! {
                    msg = timeout(idle_timeout, ws_receiver.next()) => {
                        let frame = match msg {
                            Err(_) => {
                                debug!("Client {} idle for {:?}, closing", addr, idle_timeout);
                                break;
                            }
                            Ok(frame) => frame,
                        };

                        let raw = match frame {
                            Some(Ok(Message::Text(text))) => text.into_bytes(),
                            Some(Ok(Message::Binary(data))) => data,
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Protocol pings are answered by tungstenite
                            Some(Ok(_)) => continue,
                        };

                        let before = connection.bound_user().map(str::to_string);
                        let response = handle_frame(&service, &auth, &mut connection, &raw).await;

                        if connection.bound_user() != before.as_deref() {
                            if let Some(client) = clients.write().await.get_mut(&addr) {
                                client.user_id = connection.bound_user().map(str::to_string);
                            }
                        }

                        if msg_tx.send(response).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            drop(msg_tx);
            let _ = sender_task.await;

            if let Some(client) = clients.write().await.remove(&addr) {
                info!(
                    user_id = client.user_id.as_deref().unwrap_or("-"),
                    connected_for = ?client.connected_at.elapsed(),
                    "Client {} cleaned up",
                    addr
                );
            }
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Parse one frame, run it, and build the response envelope.
pub async fn handle_frame(
    service: &GameService,
    auth: &AuthConfig,
    connection: &mut Connection,
    raw: &[u8],
) -> Response {
    let request = match Request::from_bytes(raw) {
        Ok(request) => request,
        Err(e) => {
            debug!("Invalid message: {}", e);
            return Response::error(
                peek_id(raw),
                400,
                ErrorCode::InvalidInput,
                "Invalid message format",
            );
        }
    };

    let id = request.id;
    match dispatch(service, auth, connection, request.message).await {
        Ok(message) => Response::ok(id, message),
        Err(e) => {
            e.log("request");
            Response::error(id, e.status(), e.code(), e.to_string())
        }
    }
}

/// Route a request to the service.
pub async fn dispatch(
    service: &GameService,
    auth: &AuthConfig,
    connection: &mut Connection,
    message: ClientMessage,
) -> GameResult<ServerMessage> {
    match message {
        ClientMessage::Auth(req) => {
            let player = validate_token(&req.token, auth, service.now_ms() / 1000)?;
            debug!(
                user_id = %player.user_id,
                expires_at = ?player.expires_at,
                "connection authenticated"
            );
            connection.bound_user = Some(player.user_id.clone());
            Ok(ServerMessage::AuthResult(AuthResult { user_id: player.user_id }))
        }
        ClientMessage::StartRun(req) => {
            connection.authorize(&req.user_id)?;
            service.start_run(req).await.map(ServerMessage::RunStarted)
        }
        ClientMessage::Guess(req) => {
            connection.authorize(&req.user_id)?;
            service.submit_guess(req).await.map(ServerMessage::GuessResult)
        }
        ClientMessage::Resume(req) => {
            connection.authorize(&req.user_id)?;
            service.resume_run(req).await.map(ServerMessage::Resumed)
        }
        ClientMessage::InitiateShare(req) => {
            connection.authorize(&req.user_id)?;
            service.initiate_share(req).await.map(ServerMessage::ShareInitiated)
        }
        ClientMessage::SubmitScore(req) => {
            connection.authorize(&req.user_id)?;
            service.submit_score(req).await.map(ServerMessage::ScoreSubmitted)
        }
        ClientMessage::CheckOvertakes(query) => {
            connection.authorize(&query.user_id)?;
            service.check_overtakes(query).await.map(ServerMessage::Overtakes)
        }
        ClientMessage::Leaderboard(query) => {
            service.get_leaderboard(query).await.map(ServerMessage::Leaderboard)
        }
        ClientMessage::Ping { timestamp } => Ok(ServerMessage::Pong {
            timestamp,
            server_time: service.now_ms(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::core::clock::ManualClock;
    use crate::game::catalog::Catalog;
    use crate::store::MemoryStore;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::{json, Value};

    const T0: u64 = 1_792_022_400_000;
    const SECRET: &str = "test-secret";

    fn service() -> Arc<GameService> {
        let clock = Arc::new(ManualClock::new(T0));
        Arc::new(GameService::new(
            Arc::new(Catalog::sample().unwrap()),
            Arc::new(MemoryStore::with_clock(clock.clone())),
            clock,
            GameConfig::default(),
        ))
    }

    fn hs256_auth() -> AuthConfig {
        AuthConfig::with_secret(SECRET)
    }

    fn token_for(sub: &str) -> String {
        token_expiring(sub, T0 / 1000 + 3600)
    }

    fn token_expiring(sub: &str, exp: u64) -> String {
        let claims = json!({"sub": sub, "exp": exp, "iat": 0});
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    async fn call(
        service: &GameService,
        auth: &AuthConfig,
        conn: &mut Connection,
        frame: Value,
    ) -> Value {
        let raw = serde_json::to_vec(&frame).unwrap();
        let response = handle_frame(service, auth, conn, &raw).await;
        serde_json::from_str(&response.to_json().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_ping_echoes_id() {
        let service = service();
        let auth = AuthConfig::default();
        let mut conn = Connection::new(&auth);

        let reply = call(
            &service,
            &auth,
            &mut conn,
            json!({"id": 5, "type": "ping", "timestamp": 9}),
        )
        .await;
        assert_eq!(reply["id"], 5);
        assert_eq!(reply["type"], "pong");
        assert_eq!(reply["timestamp"], 9);
        assert_eq!(reply["serverTime"], T0);
        assert!(reply.get("server_time").is_none());
    }

    #[tokio::test]
    async fn test_malformed_frame() {
        let service = service();
        let auth = AuthConfig::default();
        let mut conn = Connection::new(&auth);

        let response = handle_frame(&service, &auth, &mut conn, br#"{"id":3,"type":"warp"}"#).await;
        assert!(!response.success);
        assert_eq!(response.id, 3);
        assert_eq!(response.status, 400);
    }

    #[tokio::test]
    async fn test_start_and_guess_over_envelope() {
        let service = service();
        let auth = AuthConfig::default();
        let mut conn = Connection::new(&auth);

        let started = call(
            &service,
            &auth,
            &mut conn,
            json!({"id": 1, "type": "start_run", "userId": "alice"}),
        )
        .await;
        assert_eq!(started["success"], true);
        assert_eq!(started["type"], "run_started");

        let tampered = call(&service, &auth, &mut conn, json!({
            "id": 2,
            "type": "guess",
            "runId": started["runId"],
            "userId": "alice",
            "guess": "cap",
            "currentItemId": started["currentItem"]["id"],
            "nextItemId": "nope",
        }))
        .await;
        assert_eq!(tampered["success"], false);
        assert_eq!(tampered["status"], 409);
        assert_eq!(tampered["type"], "error");
        assert_eq!(tampered["code"], "token_mismatch");
    }

    #[tokio::test]
    async fn test_auth_binds_user() {
        let service = service();
        let auth = hs256_auth();
        let mut conn = Connection::new(&auth);

        let early =
            call(&service, &auth, &mut conn, json!({"type": "start_run", "userId": "alice"})).await;
        assert_eq!(early["code"], "not_authenticated");
        assert_eq!(early["status"], 401);

        let bad =
            call(&service, &auth, &mut conn, json!({"type": "auth", "token": "garbage"})).await;
        assert_eq!(bad["success"], false);

        let ok = call(
            &service,
            &auth,
            &mut conn,
            json!({"type": "auth", "token": token_for("alice")}),
        )
        .await;
        assert_eq!(ok["type"], "auth_result");
        assert_eq!(ok["userId"], "alice");
        assert_eq!(conn.bound_user(), Some("alice"));

        let spoofed =
            call(&service, &auth, &mut conn, json!({"type": "start_run", "userId": "bob"})).await;
        assert_eq!(spoofed["status"], 403);
        assert_eq!(spoofed["code"], "unauthorized");

        let mine =
            call(&service, &auth, &mut conn, json!({"type": "start_run", "userId": "alice"})).await;
        assert_eq!(mine["success"], true);
    }

    #[tokio::test]
    async fn test_token_expiry_uses_service_clock() {
        let service = service();
        let auth = hs256_auth();
        let mut conn = Connection::new(&auth);

        // Valid by host time for years, but expired an hour ago on the game clock
        let stale = token_expiring("alice", T0 / 1000 - 3600);
        let reply = call(&service, &auth, &mut conn, json!({"type": "auth", "token": stale})).await;
        assert_eq!(reply["code"], "token_expired");
        assert_eq!(reply["status"], 401);
        assert_eq!(conn.bound_user(), None);
    }

    #[tokio::test]
    async fn test_leaderboard_is_public() {
        let service = service();
        let auth = hs256_auth();
        let mut conn = Connection::new(&auth);

        let page = call(
            &service,
            &auth,
            &mut conn,
            json!({"type": "leaderboard", "board": "weekly"}),
        )
        .await;
        assert_eq!(page["success"], true);
        assert_eq!(page["board"], "rolling");
        assert_eq!(page["entries"], json!([]));
    }

    #[tokio::test]
    async fn test_server_round_trip() {
        use tokio_tungstenite::connect_async;

        let config = ServerConfig::default();
        let server = Arc::new(GameServer::new(config, service()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws.send(Message::Binary(br#"{"id":11,"type":"ping","timestamp":1}"#.to_vec()))
            .await
            .unwrap();

        let reply = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break Response::from_json(&text).unwrap(),
                _ => continue,
            }
        };
        assert_eq!(reply.id, 11);
        assert!(matches!(reply.message, ServerMessage::Pong { timestamp: 1, .. }));
        assert_eq!(server.connection_count().await, 1);

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_slot_reserved_before_handshake() {
        use std::time::Duration;
        use tokio_tungstenite::connect_async;

        let config = ServerConfig { max_connections: 1, ..ServerConfig::default() };
        let server = Arc::new(GameServer::new(config, service()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });

        // A client that never finishes its handshake still holds the slot
        let stalled = TcpStream::connect(addr).await.unwrap();
        while server.connection_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let busy = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break Response::from_json(&text).unwrap(),
                _ => continue,
            }
        };
        assert_eq!(busy.status, 503);
        assert!(matches!(busy.message, ServerMessage::Error(_)));
        assert_eq!(server.connection_count().await, 1);

        // A failed handshake frees the slot
        drop(stalled);
        while server.connection_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn test_unauthenticated_connection_without_auth() {
        let conn = Connection::new(&AuthConfig::default());
        assert!(conn.authorize("anyone").is_ok());
    }
}
