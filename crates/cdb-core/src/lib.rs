//! Core domain + application logic for the ContentAPI Discord bridge.
//!
//! This crate is intentionally framework-agnostic. ContentAPI / Discord / the
//! markup service live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod decode;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod events;
pub mod link;
pub mod logging;
pub mod ports;
pub mod relay;
pub mod store;

pub use errors::{Error, Result};

/// Markup language tag the bridge writes ContentAPI messages in.
pub const BRIDGE_MARKUP: &str = "12y";
