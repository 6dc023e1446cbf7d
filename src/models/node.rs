//! Backend node model

use serde::{Deserialize, Serialize};

/// Status of a node as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Being provisioned
    Pending,
    /// Up and reachable
    Running,
    /// Suspended by request
    Suspended,
    /// Being destroyed
    Terminating,
    /// Something went wrong
    Error,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Pending => write!(f, "Pending"),
            NodeStatus::Running => write!(f, "Running"),
            NodeStatus::Suspended => write!(f, "Suspended"),
            NodeStatus::Terminating => write!(f, "Terminating"),
            NodeStatus::Error => write!(f, "Error"),
        }
    }
}

/// A node as observed on the backing compute service.
///
/// The pool never mutates these; a changed node replaces the cached copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendNode {
    /// Unique within the backend
    pub id: String,
    /// Backend-level group tag the node was created under
    pub group: String,
    pub status: NodeStatus,
    /// Hardware profile id
    pub hardware: String,
    /// Location id
    pub location: String,
    pub public_addresses: Vec<String>,
    pub private_addresses: Vec<String>,
}

impl BackendNode {
    pub fn new(id: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group: group.into(),
            status: NodeStatus::Running,
            hardware: String::new(),
            location: String::new(),
            public_addresses: Vec::new(),
            private_addresses: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_hardware(mut self, hardware: impl Into<String>) -> Self {
        self.hardware = hardware.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_public_address(mut self, address: impl Into<String>) -> Self {
        self.public_addresses.push(address.into());
        self
    }

    pub fn with_private_address(mut self, address: impl Into<String>) -> Self {
        self.private_addresses.push(address.into());
        self
    }
}
