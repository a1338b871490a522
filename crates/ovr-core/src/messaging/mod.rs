//! Transport-facing abstractions: the data the messaging client hands us, and the ports we
//! call back into.

pub mod port;
pub mod types;
