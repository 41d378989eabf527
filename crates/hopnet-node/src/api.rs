//! Caller-facing handle on a running node.
//!
//! Commands round-trip over the node's command channel; the payment
//! calls additionally rendezvous on the event hub, so `pay` returns
//! when the receipt is in and `confirm` when the payment settled.

use anyhow::{anyhow, bail, Result};
use tokio::sync::{mpsc, oneshot, watch};

use hopnet_core::{Amount, ChannelKind, LinkId, MeetingPointId, PayFinalState};

use crate::commands::NodeCommand;
use crate::summary::NodeSummary;

/// Cloneable handle driving a running [`Node`](crate::Node).
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<NodeCommand>,
    receipt: watch::Receiver<Option<(Amount, String)>>,
    finished: watch::Receiver<Option<PayFinalState>>,
}

impl NodeHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<NodeCommand>,
        receipt: watch::Receiver<Option<(Amount, String)>>,
        finished: watch::Receiver<Option<PayFinalState>>,
    ) -> Self {
        NodeHandle { commands, receipt, finished }
    }

    async fn round_trip(&self, cmd: NodeCommand, rx: oneshot::Receiver<Result<(), String>>) -> Result<()> {
        self.commands.send(cmd).await.map_err(|_| anyhow!("node is gone"))?;
        rx.await
            .map_err(|_| anyhow!("node dropped the command"))?
            .map_err(|e| anyhow!(e))
    }

    /// Creates a payment request and returns its payment URL.
    pub async fn request(&self, amount: Amount, receipt: impl Into<String>) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        let cmd = NodeCommand::Request { amount, receipt: receipt.into(), reply };
        self.commands.send(cmd).await.map_err(|_| anyhow!("node is gone"))?;
        rx.await
            .map_err(|_| anyhow!("node dropped the command"))?
            .map_err(|e| anyhow!(e))
    }

    /// Starts paying `url` and waits for the payee's receipt. The
    /// payment then hangs until `confirm` approves or refuses it.
    pub async fn pay(&self, url: impl Into<String>, link: Option<LinkId>) -> Result<(Amount, String)> {
        let (reply, rx) = oneshot::channel();
        let cmd = NodeCommand::Pay { url: url.into(), link, reply };
        self.round_trip(cmd, rx).await?;

        let mut receipt = self.receipt.clone();
        let mut finished = self.finished.clone();
        loop {
            if let Some((amount, text)) = receipt.borrow_and_update().clone() {
                return Ok((amount, text));
            }
            // A refused conversation or an early timeout finishes the
            // payment before any receipt shows up.
            if let Some(state) = *finished.borrow_and_update() {
                bail!("payment {state} before a receipt arrived");
            }
            tokio::select! {
                changed = receipt.changed() => changed.map_err(|_| anyhow!("node is gone"))?,
                changed = finished.changed() => changed.map_err(|_| anyhow!("node is gone"))?,
            }
        }
    }

    /// Approves or refuses the pending receipt, then waits for the
    /// payment to reach its final state.
    pub async fn confirm(&self, agreement: bool) -> Result<PayFinalState> {
        let (reply, rx) = oneshot::channel();
        let cmd = NodeCommand::ConfirmPayment { agreement, reply };
        self.round_trip(cmd, rx).await?;

        let mut finished = self.finished.clone();
        loop {
            if let Some(state) = *finished.borrow_and_update() {
                return Ok(state);
            }
            finished.changed().await.map_err(|_| anyhow!("node is gone"))?;
        }
    }

    pub async fn make_link(&self, local: LinkId, remote: LinkId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.round_trip(NodeCommand::MakeLink { local, remote, reply }, rx).await
    }

    pub async fn make_meeting_point(&self, name: MeetingPointId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.round_trip(NodeCommand::MakeMeetingPoint { name, reply }, rx).await
    }

    pub async fn deposit(&self, link: LinkId, kind: ChannelKind, amount: Amount) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.round_trip(NodeCommand::Deposit { link, kind, amount, reply }, rx).await
    }

    pub async fn withdraw(&self, link: LinkId, channel_index: usize) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.round_trip(NodeCommand::Withdraw { link, channel_index, reply }, rx).await
    }

    pub async fn close_channel(&self, link: LinkId, channel_index: usize) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.round_trip(NodeCommand::CloseChannel { link, channel_index, reply }, rx).await
    }

    pub async fn summary(&self) -> Result<NodeSummary> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::Summary { reply })
            .await
            .map_err(|_| anyhow!("node is gone"))?;
        rx.await.map_err(|_| anyhow!("node dropped the command"))
    }

    /// Stops the node's event loop.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::Stop { reply })
            .await
            .map_err(|_| anyhow!("node is gone"))?;
        rx.await.map_err(|_| anyhow!("node dropped the command"))
    }
}
