//! Server execution logic.

use std::{future::Future, sync::Arc};

use axum::{Router, routing::get};
use majlis_shared::time::Clock;
use tokio::{net::TcpListener, sync::mpsc};
use tower_http::trace::TraceLayer;

use crate::{
    config::CoordinatorConfig,
    infrastructure::message_pusher::WebSocketMessagePusher,
    usecase::{
        EventDispatcher, EvictionReceiver, MembershipCoordinator, PresenceSweeper, RoomNotifier,
        SignalingRelay,
    },
};

use super::{
    handler::{get_room_stats, get_rooms, get_stats, health_check, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// Presence and signaling server
///
/// Wires the coordinator, transport and background sweeper together and serves
/// the WebSocket / HTTP endpoints.
///
/// # Example
///
/// ```ignore
/// let config = CoordinatorConfig::new(RoomId::new("general".to_string())?);
/// let server = Server::new(config, Arc::new(SystemClock));
/// server.run("127.0.0.1".to_string(), 8080).await?;
/// ```
pub struct Server {
    state: Arc<AppState>,
    message_pusher: Arc<WebSocketMessagePusher>,
    sweeper: Arc<PresenceSweeper>,
    evictions: EvictionReceiver,
}

impl Server {
    /// Create a new Server instance
    ///
    /// # Arguments
    ///
    /// * `config` - Coordinator and sweeper settings
    /// * `clock` - Time source for activity tracking
    pub fn new(config: CoordinatorConfig, clock: Arc<dyn Clock>) -> Self {
        // Initialize dependencies in order:
        // 1. Coordinator (registry + room table)
        // 2. MessagePusher
        // 3. Notifier (with the eviction queue)
        // 4. UseCases
        // 5. AppState

        // 1. Create the coordinator (in-memory presence state)
        let coordinator = Arc::new(MembershipCoordinator::new(config, clock));

        // 2. Create MessagePusher (WebSocket implementation)
        let message_pusher = Arc::new(WebSocketMessagePusher::new());

        // 3. Create Notifier
        let (eviction_tx, evictions) = mpsc::unbounded_channel();
        let notifier = Arc::new(RoomNotifier::new(
            coordinator.clone(),
            message_pusher.clone(),
            eviction_tx,
        ));

        // 4. Create UseCases
        let relay = Arc::new(SignalingRelay::new(coordinator.clone(), notifier.clone()));
        let dispatcher = Arc::new(EventDispatcher::new(
            coordinator.clone(),
            relay,
            notifier.clone(),
            message_pusher.clone(),
        ));
        let sweeper = Arc::new(PresenceSweeper::new(
            coordinator.clone(),
            notifier,
            message_pusher.clone(),
        ));

        // 5. Create AppState
        let state = Arc::new(AppState {
            coordinator,
            dispatcher,
            message_pusher: message_pusher.clone(),
        });

        Self {
            state,
            message_pusher,
            sweeper,
            evictions,
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        Router::new()
            // WebSocket エンドポイント
            .route("/ws", get(websocket_handler))
            // HTTP エンドポイント
            .route("/api/health", get(health_check))
            .route("/api/stats", get(get_stats))
            .route("/api/rooms", get(get_rooms))
            .route("/api/rooms/{room_id}", get(get_room_stats))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// Starts the presence sweeper, and on shutdown closes every open
    /// connection and drops all presence state.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let coordinator = self.state.coordinator.clone();
        let token = coordinator.shutdown_token();
        let sweeper = self.sweeper.clone().spawn(self.evictions);

        tracing::info!("Presence server listening on {}", listener.local_addr()?);

        // シャットダウン時はトークンをキャンセルし、開いている WebSocket の処理ループも終了させる
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                token.cancel();
            })
            .await;

        coordinator.shutdown();
        self.message_pusher.close_all().await;
        if let Err(e) = sweeper.await {
            tracing::warn!("Presence sweeper task failed: {}", e);
        }

        tracing::info!("Server shutdown complete");
        result
    }

    /// Run the presence server
    ///
    /// # Arguments
    ///
    /// * `host` - The host address to bind to (e.g., "127.0.0.1")
    /// * `port` - The port number to bind to (e.g., 8080)
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address or
    /// if there's an error during server execution.
    pub async fn run(self, host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        // Bind the server to the host and port
        let bind_addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&bind_addr).await?;

        tracing::info!("Connect to: ws://{}/ws", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        // Set up graceful shutdown signal handler
        self.serve(listener, shutdown_signal()).await?;

        Ok(())
    }
}
