//! Network and platform adapters for the lobby widget.
//!
//! `backend_api` talks HTTP to the lobby backend, `event_stream` keeps the
//! server-push channel alive, and `local` provides in-process chat and call
//! platforms for tests and the dev runner.

pub mod backend_api;
pub mod event_stream;
pub mod local;

pub use backend_api::VisitApiClient;
pub use event_stream::{HttpStreamConnector, RECONNECT_DELAY, VisitEventStream};
