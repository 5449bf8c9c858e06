//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::api::WsConnectionManager;
use crate::artwork::ArtworkService;
use crate::config::Config;
use crate::dj::{ArmRequest, DjPipeline};
use crate::engine::{EngineAdapter, EngineControl};
use crate::error::{AircheckError, AircheckResult};
use crate::events::{BroadcastEventBridge, EventEmitter, RadioEvent};
use crate::ingest::Ingestor;
use crate::providers::ProviderRegistry;
use crate::scheduler::Scheduler;
use crate::snapshot::{ChangeBackstop, MetadataCache};
use crate::store::Store;

/// Depth of the scheduler fire channel.
const FIRE_CHANNEL_DEPTH: usize = 64;

/// How often the housekeeping task runs.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(600);

/// Default timeout for the shared HTTP client (providers override per call).
const HTTP_CLIENT_TIMEOUT_SECS: u64 = 60;

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap.
/// It's consumed by `AppState` to build the final application state.
impl std::fmt::Debug for BootstrappedServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrappedServices").finish_non_exhaustive()
    }
}

pub struct BootstrappedServices {
    /// Engine adapter; the only mutation path to the audio engine.
    pub engine: Arc<dyn EngineControl>,
    /// Durable storage.
    pub store: Store,
    /// Now/next snapshot owner.
    pub cache: Arc<MetadataCache>,
    /// DJ pipeline.
    pub pipeline: Arc<DjPipeline>,
    /// Event ingest entry point.
    pub ingestor: Arc<Ingestor>,
    /// Provider tiers.
    pub registry: Arc<ProviderRegistry>,
    /// Deferred-work timers.
    pub scheduler: Arc<Scheduler<ArmRequest>>,
    /// Broadcast channel sender for real-time events.
    pub broadcast_tx: broadcast::Sender<RadioEvent>,
    /// Event bridge for emitting events to WebSocket consumers.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Cover art lookups.
    pub artwork: Arc<ArtworkService>,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    /// Receiving end of the scheduler fire channel; taken once when the
    /// background tasks start.
    fire_rx: Mutex<Option<mpsc::Receiver<(String, ArmRequest)>>>,
    /// Config sections the background tasks need.
    config: Config,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Spawns the long-lived background tasks: the snapshot poller, the
    /// scheduler tick loop, the DJ trigger pump, and housekeeping.
    ///
    /// Call once; a second call is a no-op.
    pub fn start_background_tasks(&self) {
        let Some(fire_rx) = self.fire_rx.lock().take() else {
            log::warn!("[Bootstrap] Background tasks already started");
            return;
        };

        tokio::spawn(Arc::clone(&self.cache).run(self.cancel_token.child_token()));
        tokio::spawn(Arc::clone(&self.scheduler).run(self.cancel_token.child_token()));
        tokio::spawn(Arc::clone(&self.pipeline).run(fire_rx));
        tokio::spawn(housekeeping(
            self.store.clone(),
            self.config.clone(),
            self.cancel_token.child_token(),
        ));

        log::info!("[Bootstrap] Background tasks started");
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Signal cancellation to all background tasks; in-flight provider
        // calls are abandoned, and cancelled jobs mark their artifacts.
        self.cancel_token.cancel();

        let closed = self.ws_manager.close_all();
        if closed > 0 {
            log::info!("[Bootstrap] Closed {} WebSocket connection(s)", closed);
        }

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for providers and the engine's HTTP
/// ingestion path. A shared client enables connection pooling.
fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS))
        .build()
        .expect("Failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together. The wiring order matters - services are created in
/// dependency order:
///
/// 1. Shared infrastructure (HTTP client, broadcast channel, cancellation token)
/// 2. Store (opens the database, runs the startup sweeper)
/// 3. Engine adapter (spawns its connection worker)
/// 4. Metadata cache (depends on engine + store)
/// 5. Provider registry (configured tiers + terminal fallbacks)
/// 6. Scheduler, ingest, DJ pipeline (the event → intro chain)
///
/// # Errors
///
/// Returns an error when the configuration is invalid or the store cannot
/// be opened.
pub async fn bootstrap_services(config: &Config) -> AircheckResult<BootstrappedServices> {
    config
        .validate()
        .map_err(AircheckError::Configuration)?;

    let http_client = create_http_client();
    let (broadcast_tx, _) = broadcast::channel::<RadioEvent>(config.bus.channel_capacity);
    let event_bridge = Arc::new(BroadcastEventBridge::with_sender(broadcast_tx.clone()));
    let cancel_token = CancellationToken::new();

    let store = Store::open(&config.store)
        .await
        .map_err(|e| AircheckError::Storage(e.to_string()))?;

    // Crash recovery: artifacts stuck in `pending` can never become ready.
    match store.sweep_pending().await {
        Ok(0) => {}
        Ok(swept) => log::info!("[Bootstrap] Swept {} stale pending artifact(s)", swept),
        Err(e) => log::warn!("[Bootstrap] Startup sweep failed: {}", e),
    }

    let engine_impl = Arc::new(EngineAdapter::new(
        &config.engine,
        http_client.clone(),
        cancel_token.child_token(),
    ));
    let engine: Arc<dyn EngineControl> = engine_impl;

    let cache = Arc::new(MetadataCache::new(
        Arc::clone(&engine),
        store.clone(),
        config.snapshot.clone(),
    ));

    let registry = Arc::new(ProviderRegistry::from_config(config, http_client.clone()));

    let (scheduler, fire_rx) = Scheduler::new(FIRE_CHANNEL_DEPTH);

    let ingestor = Arc::new(Ingestor::new(
        store.clone(),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        Arc::clone(&scheduler),
        Arc::clone(&cache),
        config.dj.clone(),
    ));
    // The cache's change detection feeds ingest as a backstop; wired late
    // because ingest also reads the cache for next-track prediction.
    cache.set_backstop(Arc::clone(&ingestor) as Arc<dyn ChangeBackstop>);

    let pipeline = Arc::new(DjPipeline::new(
        store.clone(),
        Arc::clone(&engine),
        Arc::clone(&registry),
        Arc::clone(&cache),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        config.dj.clone(),
        config.text.clone(),
        config.store.tts_dir.clone(),
        cancel_token.child_token(),
    ));

    let ws_manager = Arc::new(WsConnectionManager::new());
    let artwork = Arc::new(ArtworkService::new(
        store.clone(),
        config.store.artwork_dir.clone(),
        config.store.artwork_cache_cap_bytes,
    ));

    Ok(BootstrappedServices {
        engine,
        store,
        cache,
        pipeline,
        ingestor,
        registry,
        scheduler,
        broadcast_tx,
        event_bridge,
        ws_manager,
        artwork,
        cancel_token,
        http_client,
        fire_rx: Mutex::new(Some(fire_rx)),
        config: config.clone(),
    })
}

/// Periodic low-priority maintenance: artifact GC, history retention, and
/// artwork cache eviction.
async fn housekeeping(store: Store, config: Config, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so startup stays quick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match store
            .collect_garbage(config.store.artifact_gc_age_secs * 1_000)
            .await
        {
            Ok(paths) if !paths.is_empty() => {
                log::info!("[Housekeeping] Collecting {} artifact file(s)", paths.len());
                for path in paths {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        log::debug!("[Housekeeping] Remove {} failed: {}", path, e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("[Housekeeping] Artifact GC failed: {}", e),
        }

        match store.prune_history(config.store.history_retention).await {
            Ok(0) => {}
            Ok(pruned) => log::info!("[Housekeeping] Pruned {} old play event(s)", pruned),
            Err(e) => log::warn!("[Housekeeping] History pruning failed: {}", e),
        }

        match store
            .evict_artwork_over(config.store.artwork_cache_cap_bytes)
            .await
        {
            Ok(paths) => {
                for path in paths {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        log::debug!("[Housekeeping] Evict {} failed: {}", path, e);
                    }
                }
            }
            Err(e) => log::warn!("[Housekeeping] Artwork eviction failed: {}", e),
        }
    }
    log::debug!("[Housekeeping] Stopped");
}
