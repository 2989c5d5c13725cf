//! Shared helpers for unit tests
mod common;
mod fake_transport;

pub use common::*;
pub use fake_transport::*;
