//! Core domain + application logic for the once-view relay.
//!
//! This crate is intentionally transport-agnostic. The messaging client lives behind
//! ports (traits) implemented in adapter crates; everything here can be driven by fakes.

pub mod acquisition;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod filter;
pub mod locator;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod redelivery;
pub mod toggle;
pub mod utils;
pub mod wire;

pub use errors::{Error, Result};
