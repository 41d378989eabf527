//! Commands a node issues to its settlement chain backend.
//!
//! Channels emit these as opaque requests; the node executes them
//! outside the state lock and feeds the returned value back in as a
//! fresh unit of work, addressed by link and channel index.

use serde::{Deserialize, Serialize};

use crate::types::{Amount, LinkId};

/// What the chain backend is asked to do.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainCommandKind {
    /// Create a fresh receiving address owned by this node.
    NewAddress,
    /// Import a private key so settlement outputs can be claimed.
    ImportKey { key: String },
    /// Broadcast a settlement transaction paying `amount` to `address`.
    BroadcastSettlement { address: String, amount: Amount },
    /// Query confirmation depth of an earlier broadcast.
    GetConfirmations { tx_id: String },
}

/// A chain command bundled with its return address.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChainCommand {
    pub return_link: LinkId,
    pub return_channel: usize,
    pub kind: ChainCommandKind,
}

/// What a chain command produced.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainValue {
    Address { address: String },
    KeyImported,
    Broadcast { tx_id: String },
    Confirmations { depth: u64 },
    /// The backend could not execute the command.
    Failed { reason: String },
}

/// The completed command routed back to the channel that asked.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChainReturn {
    pub link: LinkId,
    pub channel_index: usize,
    pub value: ChainValue,
}
