//! Stream operators the document pipeline is assembled from

mod distribute;
mod retry_reset;
mod throttle;

pub use distribute::*;
pub use retry_reset::*;
pub use throttle::*;


use std::sync::Arc;

use futures::stream::BoxStream;

use crate::Result;

/// Restartable stream factory. Every call yields a fresh upstream.
pub type Source<T> = Arc<dyn Fn() -> BoxStream<'static, Result<T>> + Send + Sync>;

/// Wraps a closure as a [`Source`]
pub fn source_fn<T, F>(factory: F) -> Source<T>
where
    F: Fn() -> BoxStream<'static, Result<T>> + Send + Sync + 'static,
{
    Arc::new(factory)
}
