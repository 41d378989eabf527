//! Payment channel ledger for hopnet.
//!
//! A channel is a bilateral ledger with a local and a remote balance
//! and four route tables. This crate implements the ledger engine and
//! the two channel types built on it; it knows nothing about links,
//! routing or the wire.

pub mod channel;
pub mod engine;
pub mod error;
pub mod iou;
pub mod plain;
pub mod reservation;

pub use channel::{Channel, ChannelOutput};
pub use engine::{ChannelEngine, ChannelState};
pub use error::ChannelError;
pub use iou::IouChannel;
pub use plain::PlainChannel;
pub use reservation::Reservation;
