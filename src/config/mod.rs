//! Settings and server list.
//!
//! [`LiveDocSettings`] tune the service and are assembled from defaults,
//! files and environment variables. [`LiveDocConfig`] lists the servers and is
//! supplied by a [`ConfigLoader`], which may replace it at runtime.

mod loader;
mod server;
mod settings;

pub use loader::*;
pub use server::*;
pub use settings::*;
