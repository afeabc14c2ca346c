//! HTTP surface.

pub mod routes;

pub use routes::{AppState, WebhookSettings, api_routes};
