//! Aircheck Core - coordination core for an AI-augmented web radio.
//!
//! The audio engine (an external process) mixes the music; this crate is the
//! control plane around it. It ingests real-time track events, keeps a
//! deduplicated play history, runs a proactive DJ-line pipeline (LLM text →
//! TTS audio → registration → engine enqueue) with tiered provider fallback,
//! and serves clients over HTTP and WebSocket.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`engine`]: The single owned connection to the audio engine
//! - [`store`]: Durable play history, TTS artifacts, artwork cache
//! - [`snapshot`]: The one poller of engine presentation state
//! - [`events`]: Event bus bridged to the WebSocket push channel
//! - [`dj`]: The per-track intro state machine
//! - [`providers`]: Tiered LLM and TTS fallback
//! - [`ingest`]: Normalization, dedup, commit-then-broadcast
//! - [`scheduler`]: Deferred-work timers
//! - [`api`]: HTTP/WebSocket surface
//! - [`bootstrap`]: The composition root
//!
//! # Abstraction seams
//!
//! Services depend on traits rather than concrete peers where a test needs
//! to stand in: [`engine::EngineControl`], [`events::EventEmitter`],
//! [`snapshot::ChangeBackstop`], [`providers::LineGenerator`], and
//! [`providers::SpeechSynthesizer`].

#![warn(clippy::all)]

pub mod api;
pub mod artwork;
pub mod bootstrap;
pub mod config;
pub mod dj;
pub mod engine;
pub mod error;
pub mod events;
pub mod ingest;
pub mod providers;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod utils;

// Re-export commonly used types at the crate root
pub use api::{start_server, AppState, AppStateBuilder, ServerError, WsConnectionManager};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use config::Config;
pub use error::{AircheckError, AircheckResult, ErrorCode};
pub use events::{BroadcastEventBridge, DjEvent, EventEmitter, HistoryEvent, RadioEvent, TrackEvent};
pub use utils::now_millis;

// Re-export the service types the server binary touches
pub use engine::{EngineAdapter, EngineControl};
pub use snapshot::{MetadataCache, NextEntry, NowSnapshot};
pub use store::Store;

/// Default cover image for clients, embedded at compile time.
///
/// Served by `/api/cover` when no artwork can be found for the requested
/// file or album, so clients always have pixels to render.
pub static DEFAULT_COVER: &[u8] = include_bytes!("../assets/default_cover.png");
