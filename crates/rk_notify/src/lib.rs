//! Delivery to the notification provider: one message (optionally with
//! one image) fanned out to every valid recipient, with per-recipient
//! failure isolation and dead-credential invalidation.

pub mod client;
pub mod fanout;

pub use client::{NotifyClient, ProviderFailure, StatusResponse};
pub use fanout::DeliveryFanout;

pub mod prelude {
    pub use super::{DeliveryFanout, NotifyClient, ProviderFailure};
    pub use rk_core::{RecipientToken, TokenStatus};
}
