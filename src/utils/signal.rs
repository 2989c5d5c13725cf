use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

/// Edge-triggered, multi-listener notification.
///
/// Every [`Signal::notify`] bumps an internal tick; listeners either hold a
/// receiver and await `changed()`, or take a one-shot future with
/// [`Signal::next_tick`]. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct Signal {
    tick: Arc<watch::Sender<u64>>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    pub fn new() -> Self {
        let (tick, _) = watch::channel(0);
        Self { tick: Arc::new(tick) }
    }

    pub fn notify(&self) {
        self.tick.send_modify(|tick| *tick = tick.wrapping_add(1));
    }

    /// Receiver that observes every later notification
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tick.subscribe()
    }

    /// Resolves on the first notification after this call
    pub fn next_tick(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tick.subscribe();
        async move {
            // The sender lives as long as any clone of the signal
            let _ = rx.changed().await;
        }
    }
}
