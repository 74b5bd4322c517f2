//! LaserGui - web front end for a laser-chess engine process
//!
//! This library exposes a long-running UCI-style engine subprocess to web
//! clients. Static board assets are served over GET; move computation is
//! brokered through an asynchronous submit/poll API over POST, with exactly
//! one command in flight to the engine at any instant.
//!
//! # High-Level API
//!
//! ```ignore
//! use lasergui::config::GuiConfig;
//! use lasergui::engine::EngineSession;
//! use lasergui::broker::RequestBroker;
//! use std::sync::Arc;
//!
//! let config = GuiConfig::default();
//! let session = Arc::new(EngineSession::spawn(&config.engine_command, config.session).await?);
//! let broker = RequestBroker::new(session, config.broker);
//! ```

pub mod assets;
pub mod broker;
pub mod config;
pub mod engine;
pub mod logging;
pub mod protocol;
pub mod server;

/// Version of the LaserGui library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
