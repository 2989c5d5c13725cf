use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::Stream;
use futures::StreamExt;
use serde_json::Value;

use crate::Result;

static NEXT_STRATEGY_ID: AtomicU64 = AtomicU64::new(1);

type MergeFn = dyn Fn(&Value, Value) -> Value + Send + Sync;

/// Computes the value handed to callers from the previous output and the
/// newly reconstructed document.
///
/// Strategies compare by identity: clones are equal, two strategies built
/// from the same closure are not. Streams are cached per strategy identity.
#[derive(Clone)]
pub struct MergeStrategy {
    id: u64,
    merge: Arc<MergeFn>,
}

impl MergeStrategy {
    pub fn new<F>(merge: F) -> Self
    where
        F: Fn(&Value, Value) -> Value + Send + Sync + 'static,
    {
        Self {
            id: NEXT_STRATEGY_ID.fetch_add(1, Ordering::Relaxed),
            merge: Arc::new(merge),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn apply(
        &self,
        previous: &Value,
        current: Value,
    ) -> Value {
        (self.merge)(previous, current)
    }
}

impl PartialEq for MergeStrategy {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.id == other.id
    }
}

impl Eq for MergeStrategy {}

impl fmt::Debug for MergeStrategy {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("MergeStrategy").field("id", &self.id).finish()
    }
}

/// Folds documents through `strategy`. The first document passes through
/// unchanged and seeds the fold.
pub(crate) fn merged<S>(
    upstream: S,
    strategy: MergeStrategy,
) -> impl Stream<Item = Result<Value>> + Send + 'static
where
    S: Stream<Item = Result<Value>> + Send + 'static,
{
    let mut previous: Option<Value> = None;
    upstream.map(move |item| {
        item.map(|current| {
            let output = match previous.take() {
                Some(previous) => strategy.apply(&previous, current),
                None => current,
            };
            previous = Some(output.clone());
            output
        })
    })
}
