//! Server for the BuildIt build coordinator.
//!
//! Exposes the WebSocket notification transport, the inbound callback the
//! workflow engine reports results to, and thin build and release routes.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;
