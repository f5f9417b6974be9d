//! HTTP API handlers for declarant-ai
//!
//! REST endpoints for batches, sessions, export, settings and health, plus
//! an SSE stream of batch events.

pub mod batches;
pub mod export;
pub mod health;
pub mod sessions;
pub mod settings;
pub mod sse;

pub use batches::batch_routes;
pub use export::export_routes;
pub use health::health_routes;
pub use sessions::session_routes;
pub use settings::settings_routes;
pub use sse::event_stream;
