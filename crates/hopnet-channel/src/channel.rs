//! The channel sum type a link stores.
//!
//! The set of channel types is closed: persisted state must stay
//! readable, and every type a node can load is listed here.

use serde::{Deserialize, Serialize};

use hopnet_core::{Amount, ChainCommandKind, ChainValue, ChannelConvMsg, ChannelKind, RouteId, Token};

use crate::engine::ChannelEngine;
use crate::error::Result;
use crate::iou::IouChannel;
use crate::plain::PlainChannel;

/// What a channel operation produced besides its state change:
/// conversation payloads for the channel peer and commands for the
/// chain backend. The owning link stamps addressing onto both.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelOutput {
    pub conversation: Vec<ChannelConvMsg>,
    pub chain: Vec<ChainCommandKind>,
}

impl ChannelOutput {
    pub fn none() -> Self {
        ChannelOutput::default()
    }

    pub fn conversation(msg: ChannelConvMsg) -> Self {
        ChannelOutput { conversation: vec![msg], chain: Vec::new() }
    }

    pub fn chain(cmd: ChainCommandKind) -> Self {
        ChannelOutput { conversation: Vec::new(), chain: vec![cmd] }
    }

    pub fn is_empty(&self) -> bool {
        self.conversation.is_empty() && self.chain.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Channel {
    Plain(PlainChannel),
    Iou(IouChannel),
}

impl Channel {
    pub fn make_for_deposit(kind: ChannelKind, amount: Amount) -> Self {
        match kind {
            ChannelKind::Plain => Channel::Plain(PlainChannel::make_for_deposit(amount)),
            ChannelKind::Iou => Channel::Iou(IouChannel::make_for_deposit(amount)),
        }
    }

    pub fn make_accepting(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Plain => Channel::Plain(PlainChannel::make_accepting()),
            ChannelKind::Iou => Channel::Iou(IouChannel::make_accepting()),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Plain(_) => ChannelKind::Plain,
            Channel::Iou(_) => ChannelKind::Iou,
        }
    }

    pub fn engine(&self) -> &ChannelEngine {
        match self {
            Channel::Plain(c) => &c.engine,
            Channel::Iou(c) => &c.engine,
        }
    }

    pub fn engine_mut(&mut self) -> &mut ChannelEngine {
        match self {
            Channel::Plain(c) => &mut c.engine,
            Channel::Iou(c) => &mut c.engine,
        }
    }

    pub fn deposit_announcement(&self) -> ChannelConvMsg {
        match self {
            Channel::Plain(c) => c.deposit_announcement(),
            Channel::Iou(c) => c.deposit_announcement(),
        }
    }

    pub fn on_conversation(&mut self, msg: &ChannelConvMsg) -> Result<ChannelOutput> {
        match self {
            Channel::Plain(c) => c.on_conversation(msg),
            Channel::Iou(c) => c.on_conversation(msg),
        }
    }

    pub fn on_chain_return(&mut self, value: &ChainValue) -> Result<ChannelOutput> {
        match self {
            Channel::Plain(c) => c.on_chain_return(value),
            Channel::Iou(c) => c.on_chain_return(value),
        }
    }

    pub fn begin_withdraw(&mut self) -> Result<ChannelOutput> {
        match self {
            Channel::Plain(c) => c.begin_withdraw(),
            Channel::Iou(c) => c.begin_withdraw(),
        }
    }

    pub fn on_peer_withdraw(&mut self) -> Result<ChannelOutput> {
        match self {
            Channel::Plain(c) => c.on_peer_withdraw(),
            Channel::Iou(c) => c.on_peer_withdraw(),
        }
    }

    /// Close through the channel's settlement backing. For a plain
    /// channel this is the withdraw handshake.
    pub fn begin_close(&mut self) -> Result<ChannelOutput> {
        match self {
            Channel::Plain(c) => c.begin_withdraw(),
            Channel::Iou(c) => c.begin_close(),
        }
    }

    /// Pays a locked outgoing route, returning the amount moved plus
    /// any type-specific follow-up.
    pub fn settle_commit_outgoing(
        &mut self,
        route: &RouteId,
        token: &Token,
    ) -> Result<(Amount, ChannelOutput)> {
        let amount = self.engine_mut().settle_commit_outgoing(route, token)?;
        Ok((amount, self.settle_note(amount)))
    }

    /// Collects a locked incoming route.
    pub fn settle_commit_incoming(&mut self, route: &RouteId) -> Result<(Amount, ChannelOutput)> {
        let amount = self.engine_mut().settle_commit_incoming(route)?;
        Ok((amount, self.settle_note(amount)))
    }

    fn settle_note(&self, amount: Amount) -> ChannelOutput {
        match self {
            Channel::Plain(_) => ChannelOutput::none(),
            Channel::Iou(c) => match c.note_after_settle(amount) {
                Some(msg) => ChannelOutput::conversation(msg),
                None => ChannelOutput::none(),
            },
        }
    }
}
