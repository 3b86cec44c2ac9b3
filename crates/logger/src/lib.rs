//! Shared tracing setup for Uppe binaries.

mod subscriber;

pub use subscriber::init_tracing;
