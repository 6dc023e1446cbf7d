//! Caller-facing metadata and node views

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{BackendNode, NodeStatus};

/// Login credentials handed to the caller and used for script execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub user: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
    #[serde(default)]
    pub authenticate_sudo: bool,
}

impl LoginCredentials {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: None,
            private_key: None,
            authenticate_sudo: false,
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    pub fn authenticate_sudo(mut self, sudo: bool) -> Self {
        self.authenticate_sudo = sudo;
        self
    }
}

/// Options a caller attaches to nodes it allocates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeOptions {
    pub tags: BTreeSet<String>,
    pub user_metadata: BTreeMap<String, String>,
    pub credentials: Option<LoginCredentials>,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_metadata.insert(key.into(), value.into());
        self
    }

    pub fn credentials(mut self, credentials: LoginCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Persisted association of a node id with caller metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub group: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub user_metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub credentials: Option<LoginCredentials>,
}

impl MetadataRecord {
    pub fn new(group: impl Into<String>, options: &NodeOptions) -> Self {
        Self {
            group: group.into(),
            tags: options.tags.clone(),
            user_metadata: options.user_metadata.clone(),
            credentials: options.credentials.clone(),
        }
    }

    /// Merge with live backend fields
    pub fn to_view(&self, node: &BackendNode) -> NodeView {
        NodeView {
            id: node.id.clone(),
            group: self.group.clone(),
            status: node.status,
            hardware: node.hardware.clone(),
            location: node.location.clone(),
            public_addresses: node.public_addresses.clone(),
            private_addresses: node.private_addresses.clone(),
            tags: self.tags.clone(),
            user_metadata: self.user_metadata.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

/// Read-only projection of an assigned node, recomputed on each read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: String,
    /// Caller-chosen group, not the backend tag
    pub group: String,
    pub status: NodeStatus,
    pub hardware: String,
    pub location: String,
    pub public_addresses: Vec<String>,
    pub private_addresses: Vec<String>,
    pub tags: BTreeSet<String>,
    pub user_metadata: BTreeMap<String, String>,
    pub credentials: Option<LoginCredentials>,
}
