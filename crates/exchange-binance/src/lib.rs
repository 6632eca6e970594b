//! USDT-margined perpetual futures venue client.
//!
//! Implements [`autotrader_core::VenueClient`] over the venue's signed REST
//! API. Requests are rate limited with a direct `governor` limiter and
//! signed with HMAC-SHA256; error payloads are mapped onto
//! [`autotrader_core::VenueError`].

pub mod client;
pub mod signing;
pub mod symbols;
pub mod types;
mod venue;

pub use client::{BinanceClient, BinanceClientConfig};
pub use signing::RequestSigner;
pub use symbols::{canonical_symbol, venue_symbol};
