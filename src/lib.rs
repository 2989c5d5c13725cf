//! Live documents over STOMP.
//!
//! `livedoc` keeps client-side copies of documents served by STOMP brokers.
//! Each document destination delivers JSON Patch frames; the service applies
//! them to an empty object and hands every subscriber the latest
//! reconstruction. Identical requests share one subscription, connections
//! are pooled per server, and failures are retried with a forgiving budget.
//!
//! ```ignore
//! let service = LiveDocService::builder()
//!     .settings(LiveDocSettings::load(None)?)
//!     .connector(connector)
//!     .build()?;
//!
//! let mut report = service.get_stream("reports/daily", None, None, false)?.subscribe();
//! while let Some(document) = report.next().await {
//!     println!("{}", document?);
//! }
//! ```

pub mod cache;
mod call_center;
mod config;
mod constants;
mod errors;
mod service;
pub mod stream;
pub mod transport;
mod utils;

pub use call_center::*;
pub use config::*;
pub use errors::*;
pub use service::*;
pub use stream::SharedStream;
pub use stream::Subscription;
pub use stream::Teardown;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
