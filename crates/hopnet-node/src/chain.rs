//! Settlement chain access.
//!
//! Channels emit chain commands as data; the shell executes them here,
//! outside the state lock, and feeds the returned value back in as a
//! fresh unit of work.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use hopnet_core::{ChainCommandKind, ChainValue};

/// Chain backend interface. Implementations bridge the node to a
/// concrete settlement chain; errors come back as
/// [`ChainValue::Failed`] so the channel decides what to do with them.
#[async_trait]
pub trait ChainInterface: Send + Sync {
    async fn execute(&self, command: &ChainCommandKind) -> ChainValue;
}

/// Simulated chain for tests and local networks. Addresses are made
/// up, broadcasts always succeed and everything confirms instantly.
#[derive(Debug, Default)]
pub struct DummyChain {
    counter: AtomicU64,
}

impl DummyChain {
    pub fn new() -> Self {
        DummyChain { counter: AtomicU64::new(0) }
    }
}

#[async_trait]
impl ChainInterface for DummyChain {
    async fn execute(&self, command: &ChainCommandKind) -> ChainValue {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        match command {
            ChainCommandKind::NewAddress => {
                let address = format!("sim1qaddr{n:08}");
                info!(%address, "issued simulated address");
                ChainValue::Address { address }
            }
            ChainCommandKind::ImportKey { .. } => ChainValue::KeyImported,
            ChainCommandKind::BroadcastSettlement { address, amount } => {
                let tx_id = blake3::hash(format!("{address}:{amount}:{n}").as_bytes())
                    .to_hex()
                    .to_string();
                info!(%address, amount, %tx_id, "simulated settlement broadcast");
                ChainValue::Broadcast { tx_id }
            }
            ChainCommandKind::GetConfirmations { .. } => ChainValue::Confirmations { depth: 6 },
        }
    }
}
