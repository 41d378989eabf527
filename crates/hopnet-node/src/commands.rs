//! Commands dispatched from API handles to the node event loop.

use tokio::sync::oneshot;

use hopnet_core::{Amount, ChannelKind, LinkId, MeetingPointId};

use crate::summary::NodeSummary;

/// A command sent from an API handle to a running node's event loop.
pub enum NodeCommand {
    /// Create a payment request; replies with its payment URL.
    Request {
        amount: Amount,
        receipt: String,
        reply: oneshot::Sender<Result<String, String>>,
    },
    /// Start paying the given payment URL.
    Pay {
        url: String,
        link: Option<LinkId>,
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// Approve or refuse the receipt of the payment in progress.
    ConfirmPayment {
        agreement: bool,
        reply: oneshot::Sender<Result<(), String>>,
    },
    MakeLink {
        local: LinkId,
        remote: LinkId,
        reply: oneshot::Sender<Result<(), String>>,
    },
    MakeMeetingPoint {
        name: MeetingPointId,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Deposit {
        link: LinkId,
        kind: ChannelKind,
        amount: Amount,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Withdraw {
        link: LinkId,
        channel_index: usize,
        reply: oneshot::Sender<Result<(), String>>,
    },
    CloseChannel {
        link: LinkId,
        channel_index: usize,
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// Snapshot of the node's state.
    Summary { reply: oneshot::Sender<NodeSummary> },
    /// Stop the event loop.
    Stop { reply: oneshot::Sender<()> },
}
