//! In-process signal queue.
//!
//! Intents are pushed by the operator API (or a strategy living in the
//! same process) and drained one per control cycle.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use bastion_domain::{Symbol, TradeIntent};

use crate::ports::SignalSource;

/// FIFO of pending intents per symbol.
#[derive(Debug, Default)]
pub struct QueuedSignals {
    queues: Mutex<HashMap<Symbol, VecDeque<TradeIntent>>>,
}

impl QueuedSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an intent for `symbol`
    pub async fn push(&self, symbol: Symbol, intent: TradeIntent) {
        let mut queues = self.queues.lock().await;
        queues.entry(symbol).or_default().push_back(intent);
    }

    /// Pending intents for `symbol`
    pub async fn pending(&self, symbol: &Symbol) -> usize {
        let queues = self.queues.lock().await;
        queues.get(symbol).map(VecDeque::len).unwrap_or(0)
    }
}

#[async_trait]
impl SignalSource for QueuedSignals {
    async fn next_intent(&self, symbol: &Symbol) -> Option<TradeIntent> {
        let mut queues = self.queues.lock().await;
        queues.get_mut(symbol).and_then(VecDeque::pop_front)
    }
}
