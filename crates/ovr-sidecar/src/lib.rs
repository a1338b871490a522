//! Messaging-client bridge adapter.
//!
//! The bridge is an external process that owns the messaging session (auth, pairing,
//! reconnects). We talk to it over newline-delimited JSON on its stdin/stdout and implement the
//! `ovr-core` ports on top of that.

pub mod bridge;
pub mod frames;

pub use bridge::SidecarBridge;
