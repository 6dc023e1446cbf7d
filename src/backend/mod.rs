//! Backing compute service interface
//!
//! The pool only ever talks to the backend through [`ComputeBackend`]. The
//! backend knows nothing of pool-local groups or caller metadata, so every
//! bulk operation takes a [`NodeFilter`] expressed in backend terms.

pub mod memory;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::NodeTemplate;
use crate::models::{BackendNode, LoginCredentials};

pub use memory::InMemoryBackend;

#[derive(Error, Debug)]
pub enum BackendError {
    /// Creation stopped early; `created` nodes exist and must not be leaked
    #[error("created {} of {requested} node(s): {reason}", created.len())]
    PartialCreate {
        created: Vec<BackendNode>,
        requested: usize,
        reason: String,
    },

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("operation failed on {id}: {reason}")]
    Operation { id: String, reason: String },

    #[error("{0}")]
    Other(String),
}

/// Filter evaluated by the backend itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeFilter {
    All,
    Ids(BTreeSet<String>),
    /// Backend group tag
    Group(String),
}

impl NodeFilter {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        NodeFilter::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, node: &BackendNode) -> bool {
        match self {
            NodeFilter::All => true,
            NodeFilter::Ids(ids) => ids.contains(&node.id),
            NodeFilter::Group(group) => node.group == *group,
        }
    }
}

/// Options for running a script on nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunScriptOptions {
    pub run_as_root: bool,
    pub block_on_complete: bool,
    pub task_name: Option<String>,
    /// Overrides the credentials stored for each node
    pub login: Option<LoginCredentials>,
}

impl Default for RunScriptOptions {
    fn default() -> Self {
        Self {
            run_as_root: true,
            block_on_complete: true,
            task_name: None,
            login: None,
        }
    }
}

impl RunScriptOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_as_root(mut self, root: bool) -> Self {
        self.run_as_root = root;
        self
    }

    pub fn block_on_complete(mut self, block: bool) -> Self {
        self.block_on_complete = block;
        self
    }

    pub fn task_name(mut self, name: impl Into<String>) -> Self {
        self.task_name = Some(name.into());
        self
    }

    pub fn login(mut self, credentials: LoginCredentials) -> Self {
        self.login = Some(credentials);
        self
    }
}

/// Result of running a script on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResponse {
    pub output: String,
    pub error: String,
    pub exit_status: i32,
}

impl ExecResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: String::new(),
            exit_status: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Abstract operations of a backing compute service
#[cfg_attr(test, mockall::automock)]
pub trait ComputeBackend: Send + Sync {
    /// Provision `count` nodes tagged with `group`.
    ///
    /// A failure after some nodes were created must be reported as
    /// [`BackendError::PartialCreate`] carrying those nodes.
    fn create_nodes_in_group(
        &self,
        group: &str,
        count: usize,
        template: &NodeTemplate,
    ) -> Result<Vec<BackendNode>, BackendError>;

    fn destroy_node(&self, id: &str) -> Result<(), BackendError>;

    fn destroy_nodes_matching(&self, filter: &NodeFilter) -> Result<Vec<BackendNode>, BackendError>;

    fn list_nodes_matching(&self, filter: &NodeFilter) -> Result<Vec<BackendNode>, BackendError>;

    fn get_node(&self, id: &str) -> Result<Option<BackendNode>, BackendError>;

    fn reboot_nodes_matching(&self, filter: &NodeFilter) -> Result<(), BackendError>;

    fn suspend_nodes_matching(&self, filter: &NodeFilter) -> Result<(), BackendError>;

    fn resume_nodes_matching(&self, filter: &NodeFilter) -> Result<(), BackendError>;

    fn run_script_on_nodes_matching(
        &self,
        filter: &NodeFilter,
        script: &str,
        options: &RunScriptOptions,
    ) -> Result<BTreeMap<String, ExecResponse>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_filter_matches() {
        let node = BackendNode::new("n-1", "pool");

        assert!(NodeFilter::All.matches(&node));
        assert!(NodeFilter::ids(["n-1", "n-2"]).matches(&node));
        assert!(!NodeFilter::ids(["n-2"]).matches(&node));
        assert!(NodeFilter::Group("pool".into()).matches(&node));
        assert!(!NodeFilter::Group("other".into()).matches(&node));
    }

    #[test]
    fn test_run_script_defaults() {
        let options = RunScriptOptions::new();
        assert!(options.run_as_root);
        assert!(options.block_on_complete);
        assert!(options.login.is_none());
    }
}
