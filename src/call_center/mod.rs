//! Connection pool ("call center")
//!
//! One dialer per configured server, prefix routing of documents to servers,
//! per-server connection state and aggregate statistics.

mod call_center;
mod dialer;
mod feed;

pub use call_center::*;
pub use dialer::*;
pub use feed::*;
