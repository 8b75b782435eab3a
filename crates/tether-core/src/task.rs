//! Transport event queue.
//!
//! Native transport callbacks fire on threads the host does not own. They only
//! push a [`TransportEvent`] through a [`TaskSender`]; the owning
//! [`TaskQueue`] is drained at the start of each tick on the thread that owns
//! all session state. Both ends are non-blocking and need no async runtime.

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};

/// Connectivity state reported by the transport for one peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// Link is down or was never established.
    Disconnected,
    /// Gathering local candidates.
    Gathering,
    /// Checking candidate pairs.
    Connecting,
    /// A working pair was found; datagrams can flow.
    Connected,
    /// Negotiation finished on the selected pair.
    Completed,
    /// Negotiation failed; the link is unusable.
    Failed,
}

impl LinkState {
    /// Whether datagrams can be sent in this state.
    pub fn is_up(self) -> bool {
        matches!(self, LinkState::Connected | LinkState::Completed)
    }

    /// Whether the link has gone away for good.
    pub fn is_down(self) -> bool {
        matches!(self, LinkState::Disconnected | LinkState::Failed)
    }
}

/// Event raised by a transport callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Link state changed.
    StateChanged {
        /// Remote peer identity.
        peer: String,
        /// New link state.
        state: LinkState,
    },
    /// One datagram arrived.
    Datagram {
        /// Remote peer identity.
        peer: String,
        /// Raw datagram bytes.
        data: Vec<u8>,
    },
}

/// Producer half, cloned into every transport callback.
#[derive(Debug, Clone)]
pub struct TaskSender {
    tx: mpsc::Sender<TransportEvent>,
}

impl TaskSender {
    /// Queue an event. Returns `false` if the queue is full or closed; the
    /// event is dropped in that case.
    pub fn push(&self, event: TransportEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(?event, "transport event queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("transport event queue closed");
                false
            }
        }
    }

    /// Queue a link state change.
    pub fn state_changed(&self, peer: impl Into<String>, state: LinkState) -> bool {
        self.push(TransportEvent::StateChanged {
            peer: peer.into(),
            state,
        })
    }

    /// Queue a received datagram.
    pub fn datagram(&self, peer: impl Into<String>, data: Vec<u8>) -> bool {
        self.push(TransportEvent::Datagram {
            peer: peer.into(),
            data,
        })
    }
}

/// Consumer half, owned by the tick thread.
#[derive(Debug)]
pub struct TaskQueue {
    tx: mpsc::Sender<TransportEvent>,
    rx: mpsc::Receiver<TransportEvent>,
    capacity: usize,
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` undrained events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx, capacity }
    }

    /// New producer handle.
    pub fn sender(&self) -> TaskSender {
        TaskSender {
            tx: self.tx.clone(),
        }
    }

    /// Take every queued event, oldest first.
    ///
    /// At most `capacity` events are taken per call, so producers pushing
    /// during the drain cannot keep the tick thread here forever.
    pub fn drain(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while events.len() < self.capacity {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }
}
