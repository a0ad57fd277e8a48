//! Push notification fan-out for the BuildIt build coordinator.
//!
//! The [`Notifier`] keeps the set of attached clients, broadcasts messages to
//! them, and evicts clients that fail or go quiet. Transport details live in
//! [`AttachedClient`](buildit_core::notification::AttachedClient)
//! implementations.

pub mod notifier;

pub use notifier::{CleanupHandle, DeliveryReport, Notifier};
