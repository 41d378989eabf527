//! Node configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::MeetingPointId;

/// Everything a node needs to know at startup. All durations are in
/// milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name; doubles as its transport address.
    pub name: String,
    /// Validity window requested for new route reservations.
    pub route_window_ms: u64,
    /// Grace period between locking an outgoing route and expecting
    /// its settle.
    pub commit_grace_ms: u64,
    /// How long the payer waits in a state before giving up.
    pub payer_timeout_ms: u64,
    /// How long a payee waits in a state before giving up.
    pub payee_timeout_ms: u64,
    /// How long a completed-route record is kept for replay detection.
    pub completed_route_retention_ms: u64,
    /// Upper bound on completed-route records per link.
    pub completed_route_capacity: usize,
    /// Meeting points hosted elsewhere that local payees may offer.
    pub external_meeting_points: Vec<MeetingPointId>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            name: "node".to_owned(),
            route_window_ms: 60_000,
            commit_grace_ms: 5_000,
            payer_timeout_ms: 30_000,
            payee_timeout_ms: 30_000,
            completed_route_retention_ms: 300_000,
            completed_route_capacity: 1024,
            external_meeting_points: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn named(name: impl Into<String>) -> Self {
        NodeConfig { name: name.into(), ..NodeConfig::default() }
    }

    pub fn from_toml_str(input: &str) -> Result<Self, CoreError> {
        toml::from_str(input).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let input = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }
}
