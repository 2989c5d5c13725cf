use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::broadcast;

use super::CallCenter;
use super::CallCenterStats;
use super::DialerState;
use crate::constants::STATE_EVENT_CAPACITY;

/// Something observers of connection health must account for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCenterEvent {
    /// A dialer changed state. `seq` grows with every transition of the
    /// same dialer.
    Transition {
        dialer: u64,
        seq: u64,
        state: DialerState,
    },
    /// A document could not be routed
    ServerNotFound { count: usize },
}

/// Ordered fan-out of [`CallCenterEvent`]s.
///
/// Unlike a tick, every event reaches every receiver, so a dialer passing
/// through `Error` on its way to `Disconnected` is observed in both states.
#[derive(Debug, Clone)]
pub(crate) struct StateFeed {
    events: broadcast::Sender<CallCenterEvent>,
    seq: Arc<AtomicU64>,
}

impl Default for StateFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl StateFeed {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        Self {
            events,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn publish(
        &self,
        event: CallCenterEvent,
    ) {
        // No observer is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<CallCenterEvent> {
        self.events.subscribe()
    }
}

/// Dialer states of one call center, folded from a snapshot plus events.
///
/// Events older than the snapshot are recognized by their sequence number
/// and ignored, so a receiver subscribed before the snapshot was taken never
/// rolls a dialer back.
pub(crate) struct StateTally {
    call_center: Arc<CallCenter>,
    states: HashMap<u64, (DialerState, u64)>,
}

impl StateTally {
    pub(crate) fn snapshot(call_center: Arc<CallCenter>) -> Self {
        let states = call_center
            .dialers()
            .iter()
            .map(|dialer| {
                let (state, seq) = dialer.versioned_state();
                (dialer.id(), (state, seq))
            })
            .collect();
        Self { call_center, states }
    }

    pub(crate) fn call_center(&self) -> &Arc<CallCenter> {
        &self.call_center
    }

    /// Folds one event in. Returns whether anything observable changed.
    pub(crate) fn apply(
        &mut self,
        event: CallCenterEvent,
    ) -> bool {
        match event {
            CallCenterEvent::Transition { dialer, seq, state } => match self.states.get_mut(&dialer) {
                Some(entry) if seq > entry.1 => {
                    *entry = (state, seq);
                    true
                }
                _ => false,
            },
            CallCenterEvent::ServerNotFound { .. } => true,
        }
    }

    pub(crate) fn state_of(
        &self,
        dialer: u64,
    ) -> Option<DialerState> {
        self.states.get(&dialer).map(|(state, _)| *state)
    }

    pub(crate) fn statistics(&self) -> CallCenterStats {
        let mut stats = CallCenterStats {
            total: self.states.len(),
            server_not_found_error_count: self.call_center.server_not_found_error_count(),
            ..Default::default()
        };
        for (state, _) in self.states.values() {
            stats.count(*state);
        }
        stats
    }
}
