//! In-memory datagram link between two local registries.
//!
//! Each side's sink pushes straight into the other side's task queue, the same
//! way a native transport callback would. Loss is injected per sink so resend
//! behaviour can be exercised deterministically.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_core::transport::MAX_DATAGRAM_SIZE;
use tether_core::{DatagramSink, LinkState, TaskSender};
use tracing::trace;

/// Which datagrams a [`LoopbackSink`] silently drops.
#[derive(Debug, Clone, Default)]
pub enum LossModel {
    /// Deliver everything.
    #[default]
    Lossless,
    /// Drop the datagrams at these zero-based send positions.
    Drop(BTreeSet<u64>),
    /// Drop each datagram with probability `rate`, reproducibly from `seed`.
    Random {
        /// Drop probability in `0.0..=1.0`.
        rate: f64,
        /// RNG seed.
        seed: u64,
    },
}

/// Outbound half of one side of a [`LoopbackLink`].
#[derive(Debug)]
pub struct LoopbackSink {
    local: String,
    remote: TaskSender,
    open: Arc<AtomicBool>,
    loss: LossModel,
    rng: Option<StdRng>,
    sent: u64,
    dropped: u64,
}

impl LoopbackSink {
    /// Apply a loss model to this direction.
    pub fn with_loss(mut self, loss: LossModel) -> Self {
        self.rng = match &loss {
            LossModel::Random { seed, .. } => Some(StdRng::seed_from_u64(*seed)),
            _ => None,
        };
        self.loss = loss;
        self
    }

    /// Datagrams accepted so far, dropped ones included.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Datagrams dropped by the loss model.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn should_drop(&mut self, position: u64) -> bool {
        match &self.loss {
            LossModel::Lossless => false,
            LossModel::Drop(positions) => positions.contains(&position),
            LossModel::Random { rate, .. } => {
                let rate = rate.clamp(0.0, 1.0);
                self.rng.as_mut().is_some_and(|rng| rng.gen_bool(rate))
            }
        }
    }
}

impl DatagramSink for LoopbackSink {
    fn send_datagram(&mut self, datagram: &[u8]) -> bool {
        if !self.open.load(Ordering::Acquire) || datagram.len() > MAX_DATAGRAM_SIZE {
            return false;
        }

        let position = self.sent;
        self.sent += 1;
        if self.should_drop(position) {
            self.dropped += 1;
            trace!(from = %self.local, position, "loopback dropped datagram");
            return true;
        }

        self.remote.datagram(self.local.clone(), datagram.to_vec())
    }
}

/// Bidirectional in-memory link between peers `a` and `b`.
#[derive(Debug)]
pub struct LoopbackLink {
    open: Arc<AtomicBool>,
    a: String,
    a_tasks: TaskSender,
    b: String,
    b_tasks: TaskSender,
}

impl LoopbackLink {
    /// Link peer `a` (whose registry drains `a_tasks`) with peer `b`.
    pub fn new(a: &str, a_tasks: TaskSender, b: &str, b_tasks: TaskSender) -> Self {
        Self {
            open: Arc::new(AtomicBool::new(true)),
            a: a.to_owned(),
            a_tasks,
            b: b.to_owned(),
            b_tasks,
        }
    }

    /// Sinks for `a` (sending to `b`) and for `b` (sending to `a`).
    pub fn sinks(&self) -> (LoopbackSink, LoopbackSink) {
        let sink = |local: &str, remote: &TaskSender| LoopbackSink {
            local: local.to_owned(),
            remote: remote.clone(),
            open: Arc::clone(&self.open),
            loss: LossModel::Lossless,
            rng: None,
            sent: 0,
            dropped: 0,
        };
        (sink(&self.a, &self.b_tasks), sink(&self.b, &self.a_tasks))
    }

    /// Report `state` for this link to both sides.
    pub fn announce(&self, state: LinkState) {
        self.a_tasks.state_changed(self.b.clone(), state);
        self.b_tasks.state_changed(self.a.clone(), state);
    }

    /// Close the link; sinks refuse further datagrams and both sides see
    /// [`LinkState::Disconnected`].
    pub fn cut(&self) {
        self.open.store(false, Ordering::Release);
        self.announce(LinkState::Disconnected);
    }

    /// Whether the link still carries datagrams.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
