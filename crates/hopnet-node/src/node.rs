//! The async shell around the node state.
//!
//! One task owns the state and runs the event loop: API commands,
//! transport deliveries, chain returns and due timeouts all become
//! messages, each handled as one batch. After a batch commits the
//! snapshot is saved, and only then are its outward effects performed.
//! Chain commands run in spawned tasks so a slow backend never stalls
//! the loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};

use hopnet_core::{ApiRequest, ChainReturn, Message, NodeConfig, ReturnValue};
use hopnet_transport::{Transport, TransportEvent};

use crate::api::NodeHandle;
use crate::chain::ChainInterface;
use crate::commands::NodeCommand;
use crate::dispatcher::{run_batch, BatchOutcome};
use crate::error::NodeError;
use crate::events::EventHub;
use crate::state::NodeState;
use crate::store::NodeStore;
use crate::summary::NodeSummary;

/// Sleep horizon when the timeout queue is empty.
const IDLE_TICK_MS: u64 = 60_000;

/// What the protocol made of one triggering message: accepted with an
/// optional API return value, or rejected with the state untouched.
type Verdict = std::result::Result<Option<ReturnValue>, NodeError>;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub struct Node<T: Transport> {
    state: NodeState,
    cfg: NodeConfig,
    store: NodeStore,
    transport: T,
    chain: Arc<dyn ChainInterface>,
    hub: Arc<EventHub>,
    command_tx: mpsc::Sender<NodeCommand>,
    command_rx: mpsc::Receiver<NodeCommand>,
    chain_tx: mpsc::Sender<ChainReturn>,
    chain_rx: mpsc::Receiver<ChainReturn>,
}

impl<T: Transport> Node<T> {
    /// Opens the node over its store, resuming the saved snapshot if
    /// one exists.
    pub fn new(
        name: impl Into<String>,
        cfg: NodeConfig,
        store: NodeStore,
        transport: T,
        chain: Arc<dyn ChainInterface>,
    ) -> Result<Self> {
        let name = name.into();
        let state = match store.load_state()? {
            Some(state) => state,
            None => NodeState::new(name),
        };
        let (command_tx, command_rx) = mpsc::channel(64);
        let (chain_tx, chain_rx) = mpsc::channel(64);
        Ok(Node {
            state,
            cfg,
            store,
            transport,
            chain,
            hub: Arc::new(EventHub::new()),
            command_tx,
            command_rx,
            chain_tx,
            chain_rx,
        })
    }

    /// Handle for talking to this node once `run` is underway.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle::new(self.command_tx.clone(), self.hub.receipt(), self.hub.finished())
    }

    pub async fn run(mut self) -> Result<()> {
        info!(node = %self.state.name, "node running");
        loop {
            let sleep_ms = self
                .state
                .next_deadline()
                .map(|at| at.saturating_sub(now_ms()))
                .unwrap_or(IDLE_TICK_MS);
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd).await? {
                            break;
                        }
                    }
                    None => {
                        info!(node = %self.state.name, "all handles dropped, stopping");
                        break;
                    }
                },
                event = self.transport.recv() => match event {
                    Some(TransportEvent::Delivered { endpoint, packet }) => {
                        let msg = Message::Inbound { from: endpoint, packet };
                        if let Err(e) = self.process(msg).await? {
                            warn!(node = %self.state.name, error = %e, "peer message rejected");
                        }
                    }
                    Some(TransportEvent::Closed { endpoint }) => {
                        if let Err(e) = self.process(Message::ConnClosed(endpoint)).await? {
                            warn!(node = %self.state.name, error = %e, "close handling failed");
                        }
                    }
                    None => {
                        info!(node = %self.state.name, "transport shut down, stopping");
                        break;
                    }
                },
                ret = self.chain_rx.recv() => {
                    // The loop holds a sender too, so this channel
                    // cannot close while the node runs.
                    if let Some(ret) = ret {
                        if let Err(e) = self.process(Message::ChainReturn(ret)).await? {
                            warn!(node = %self.state.name, error = %e, "chain return rejected");
                        }
                    }
                },
                _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {
                    for event in self.state.due_timeouts(now_ms()) {
                        if let Err(e) = self.process(Message::Timeout(event)).await? {
                            warn!(node = %self.state.name, error = %e, "timeout handling failed");
                        }
                    }
                },
            }
        }
        info!(node = %self.state.name, "node stopped");
        Ok(())
    }

    /// Runs one command; `false` stops the loop.
    async fn handle_command(&mut self, cmd: NodeCommand) -> Result<bool> {
        match cmd {
            NodeCommand::Request { amount, receipt, reply } => {
                let verdict = self.process(Message::Api(ApiRequest::Request { amount, receipt })).await?;
                let _ = reply.send(match verdict {
                    Ok(Some(ReturnValue::Url(url))) => Ok(url),
                    Ok(_) => Err("request produced no url".into()),
                    Err(e) => Err(e.to_string()),
                });
            }
            NodeCommand::Pay { url, link, reply } => {
                let verdict = self.process(Message::Api(ApiRequest::Pay { url, link })).await?;
                if verdict.is_ok() {
                    // Clear the previous payment's rendezvous before
                    // the caller starts watching.
                    self.hub.reset();
                }
                let _ = reply.send(ack(verdict));
            }
            NodeCommand::ConfirmPayment { agreement, reply } => {
                let verdict = self.process(Message::Api(ApiRequest::ConfirmPayment { agreement })).await?;
                let _ = reply.send(ack(verdict));
            }
            NodeCommand::MakeLink { local, remote, reply } => {
                let verdict = self.process(Message::Api(ApiRequest::MakeLink { local, remote })).await?;
                let _ = reply.send(ack(verdict));
            }
            NodeCommand::MakeMeetingPoint { name, reply } => {
                let verdict = self.process(Message::Api(ApiRequest::MakeMeetingPoint { name })).await?;
                let _ = reply.send(ack(verdict));
            }
            NodeCommand::Deposit { link, kind, amount, reply } => {
                let verdict = self.process(Message::Api(ApiRequest::Deposit { link, kind, amount })).await?;
                let _ = reply.send(ack(verdict));
            }
            NodeCommand::Withdraw { link, channel_index, reply } => {
                let verdict = self.process(Message::Api(ApiRequest::Withdraw { link, channel_index })).await?;
                let _ = reply.send(ack(verdict));
            }
            NodeCommand::CloseChannel { link, channel_index, reply } => {
                let verdict = self.process(Message::Api(ApiRequest::CloseChannel { link, channel_index })).await?;
                let _ = reply.send(ack(verdict));
            }
            NodeCommand::Summary { reply } => {
                let _ = reply.send(NodeSummary::of(&self.state));
            }
            NodeCommand::Stop { reply } => {
                let _ = reply.send(());
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Handles `msg` and any messages its outward effects bounce back
    /// (a failed send or open becomes a lost conversation). Only the
    /// triggering message's verdict is reported; follow-up rejections
    /// are logged.
    async fn process(&mut self, msg: Message) -> Result<Verdict> {
        let mut pending = VecDeque::from([msg]);
        let mut verdict: Option<Verdict> = None;
        while let Some(msg) = pending.pop_front() {
            match run_batch(&mut self.state, msg, now_ms(), &self.cfg) {
                Ok(mut outcome) => {
                    self.store.save_state(&self.state)?;
                    if verdict.is_none() {
                        verdict = Some(Ok(outcome.return_value.take()));
                    }
                    pending.extend(self.perform(outcome).await?);
                }
                Err(e) => {
                    if verdict.is_none() {
                        verdict = Some(Err(e));
                    } else {
                        warn!(node = %self.state.name, error = %e, "follow-up message rejected");
                    }
                }
            }
        }
        Ok(verdict.unwrap_or(Ok(None)))
    }

    /// Performs a committed batch's outward effects, returning the
    /// messages that transport failures bounce back.
    async fn perform(&mut self, outcome: BatchOutcome) -> Result<Vec<Message>> {
        let mut bounced = Vec::new();
        for event in &outcome.events {
            self.hub.publish(event);
        }
        for (to, packet) in outcome.sends {
            if let Err(e) = self.transport.send(&to, &packet).await {
                warn!(node = %self.state.name, %to, error = %e, "send failed");
                bounced.push(Message::ConnClosed(to));
            }
        }
        for open in outcome.opens {
            if let Err(e) = self
                .transport
                .open(&open.local, &open.address, &open.remote, &open.hello)
                .await
            {
                warn!(node = %self.state.name, to = %open.address, error = %e, "open failed");
                bounced.push(Message::ConnClosed(open.local));
            }
        }
        for endpoint in outcome.releases {
            self.transport.close(&endpoint).await;
        }
        for record in outcome.completed {
            info!(
                node = %self.state.name,
                role = ?record.role,
                amount = record.amount,
                state = %record.state,
                "payment finished"
            );
            self.store.pay_log().append(&record)?;
        }
        for cmd in outcome.chain {
            let chain = self.chain.clone();
            let tx = self.chain_tx.clone();
            tokio::spawn(async move {
                let value = chain.execute(&cmd.kind).await;
                let ret = ChainReturn {
                    link: cmd.return_link,
                    channel_index: cmd.return_channel,
                    value,
                };
                let _ = tx.send(ret).await;
            });
        }
        Ok(bounced)
    }
}

fn ack(verdict: Verdict) -> Result<(), String> {
    match verdict {
        Ok(_) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}
