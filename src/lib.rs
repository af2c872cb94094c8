//! Media directory server.
//!
//! Serves a configured set of named directories over HTTP: browsable HTML
//! listings with file-type icons, raw file transfer, and on-the-fly tar
//! downloads of whole subtrees with an exact, pre-computed Content-Length.

pub mod archive;
pub mod config;
pub mod error;
pub mod handlers;
pub mod listing;
pub mod routes;

use std::sync::Arc;

pub use config::Config;
pub use error::ServeError;

/// Application state shared across handlers.
///
/// The root registry inside [`Config`] is immutable after startup; handlers
/// only ever read it.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}
