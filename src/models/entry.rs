//! Pool entry and pool status models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::BackendNode;

/// Pool-local state of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    /// Warm and ready for allocation
    Available,
    /// Handed out to a group
    Assigned(String),
}

impl EntryState {
    pub fn group(&self) -> Option<&str> {
        match self {
            EntryState::Available => None,
            EntryState::Assigned(group) => Some(group),
        }
    }
}

/// A backend node owned by this pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub node: BackendNode,
    pub state: EntryState,
}

impl PoolEntry {
    pub fn id(&self) -> &str {
        &self.node.id
    }

    pub fn is_available(&self) -> bool {
        self.state == EntryState::Available
    }
}

/// Lifecycle of the pool as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    NotStarted,
    /// Start growth in flight
    Starting,
    Started,
    /// Terminal
    Closed,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::NotStarted => write!(f, "NotStarted"),
            Lifecycle::Starting => write!(f, "Starting"),
            Lifecycle::Started => write!(f, "Started"),
            Lifecycle::Closed => write!(f, "Closed"),
        }
    }
}

/// Pool status summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub group: String,
    pub lifecycle: Lifecycle,
    pub min_size: usize,
    pub max_size: usize,
    pub total: usize,
    pub available: usize,
    pub assigned: usize,
    /// Nodes requested from the backend but not yet merged
    pub pending: usize,
    /// Assigned node count per group
    pub groups: BTreeMap<String, usize>,
}
