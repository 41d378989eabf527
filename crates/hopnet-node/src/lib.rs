//! The hopnet node: payment entities, the message router and the
//! async shell.
//!
//! [`NodeState`] plus [`run_batch`] is the whole protocol, pure and
//! deterministic; [`Node`] wraps them in an event loop over a
//! transport, a chain backend and a store, and [`NodeHandle`] is how
//! callers drive it.

pub mod api;
pub mod chain;
pub mod commands;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod node;
pub mod payee;
pub mod payer;
pub mod paylog;
pub mod state;
pub mod store;
pub mod summary;

pub use api::NodeHandle;
pub use chain::{ChainInterface, DummyChain};
pub use commands::NodeCommand;
pub use dispatcher::{run_batch, BatchOutcome, ConnOpen};
pub use error::NodeError;
pub use events::EventHub;
pub use node::Node;
pub use payee::PayeeLink;
pub use payer::PayerLink;
pub use paylog::{CompletedPayment, PayLog, PayRole};
pub use state::NodeState;
pub use store::NodeStore;
pub use summary::NodeSummary;
