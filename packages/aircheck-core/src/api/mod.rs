//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to services.
//! It provides the router construction and server startup functionality.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::artwork::ArtworkService;
use crate::config::{BusConfig, SnapshotConfig};
use crate::dj::DjPipeline;
use crate::engine::EngineControl;
use crate::events::BroadcastEventBridge;
use crate::ingest::Ingestor;
use crate::providers::ProviderRegistry;
use crate::snapshot::MetadataCache;
use crate::store::Store;

pub mod http;
pub mod response;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Engine adapter; the only mutation path to the audio engine.
    pub engine: Arc<dyn EngineControl>,
    /// Durable storage.
    pub store: Store,
    /// Now/next snapshot owner.
    pub cache: Arc<MetadataCache>,
    /// DJ pipeline (for the debug surface).
    pub pipeline: Arc<DjPipeline>,
    /// Event ingest entry point.
    pub ingestor: Arc<Ingestor>,
    /// Provider tiers (for the debug surface).
    pub registry: Arc<ProviderRegistry>,
    /// Event bridge WebSocket handlers subscribe to.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Cover art lookups.
    pub artwork: Arc<ArtworkService>,
    /// Event-bus and WebSocket tuning.
    pub bus_config: BusConfig,
    /// Snapshot limits (caps the `?limit=` of `/api/next`).
    pub snapshot_config: SnapshotConfig,
    /// Process start, for the health endpoint's uptime.
    pub started_at: Instant,
}

/// Builder for constructing an [`AppState`].
#[derive(Default)]
pub struct AppStateBuilder {
    engine: Option<Arc<dyn EngineControl>>,
    store: Option<Store>,
    cache: Option<Arc<MetadataCache>>,
    pipeline: Option<Arc<DjPipeline>>,
    ingestor: Option<Arc<Ingestor>>,
    registry: Option<Arc<ProviderRegistry>>,
    event_bridge: Option<Arc<BroadcastEventBridge>>,
    ws_manager: Option<Arc<WsConnectionManager>>,
    artwork: Option<Arc<ArtworkService>>,
    bus_config: Option<BusConfig>,
    snapshot_config: Option<SnapshotConfig>,
}

impl AppStateBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates all shared service fields from a `BootstrappedServices`
    /// container, leaving only config sections to set individually.
    pub fn from_services(mut self, services: &crate::bootstrap::BootstrappedServices) -> Self {
        self.engine = Some(Arc::clone(&services.engine));
        self.store = Some(services.store.clone());
        self.cache = Some(Arc::clone(&services.cache));
        self.pipeline = Some(Arc::clone(&services.pipeline));
        self.ingestor = Some(Arc::clone(&services.ingestor));
        self.registry = Some(Arc::clone(&services.registry));
        self.event_bridge = Some(Arc::clone(&services.event_bridge));
        self.ws_manager = Some(Arc::clone(&services.ws_manager));
        self.artwork = Some(Arc::clone(&services.artwork));
        self
    }

    /// Sets the engine adapter.
    pub fn engine(mut self, engine: Arc<dyn EngineControl>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Sets the store.
    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the metadata cache.
    pub fn cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the DJ pipeline.
    pub fn pipeline(mut self, pipeline: Arc<DjPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Sets the ingest service.
    pub fn ingestor(mut self, ingestor: Arc<Ingestor>) -> Self {
        self.ingestor = Some(ingestor);
        self
    }

    /// Sets the provider registry.
    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the event bridge.
    pub fn event_bridge(mut self, bridge: Arc<BroadcastEventBridge>) -> Self {
        self.event_bridge = Some(bridge);
        self
    }

    /// Sets the WebSocket connection manager.
    pub fn ws_manager(mut self, manager: Arc<WsConnectionManager>) -> Self {
        self.ws_manager = Some(manager);
        self
    }

    /// Sets the artwork service.
    pub fn artwork(mut self, artwork: Arc<ArtworkService>) -> Self {
        self.artwork = Some(artwork);
        self
    }

    /// Sets the bus configuration.
    pub fn bus_config(mut self, config: BusConfig) -> Self {
        self.bus_config = Some(config);
        self
    }

    /// Sets the snapshot configuration.
    pub fn snapshot_config(mut self, config: SnapshotConfig) -> Self {
        self.snapshot_config = Some(config);
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            engine: self.engine.expect("engine is required"),
            store: self.store.expect("store is required"),
            cache: self.cache.expect("cache is required"),
            pipeline: self.pipeline.expect("pipeline is required"),
            ingestor: self.ingestor.expect("ingestor is required"),
            registry: self.registry.expect("registry is required"),
            event_bridge: self.event_bridge.expect("event_bridge is required"),
            ws_manager: self.ws_manager.expect("ws_manager is required"),
            artwork: self.artwork.expect("artwork is required"),
            bus_config: self.bus_config.unwrap_or_default(),
            snapshot_config: self.snapshot_config.unwrap_or_default(),
            started_at: Instant::now(),
        }
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Starts the HTTP server on the given port. Runs until the listener fails
/// or the task is aborted.
pub async fn start_server(state: AppState, port: u16) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(listener, app).await?;
    Ok(())
}
