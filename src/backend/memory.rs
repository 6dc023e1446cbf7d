//! In-memory compute backend
//!
//! Keeps nodes in a map and never touches real infrastructure. Used by the
//! CLI simulator and by tests, which can inject creation failures and read
//! back call counters.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{BackendError, ComputeBackend, ExecResponse, NodeFilter, RunScriptOptions};
use crate::config::NodeTemplate;
use crate::models::{BackendNode, NodeStatus};

#[derive(Default)]
struct BackendState {
    /// Insertion-ordered ids alongside the node map
    order: Vec<String>,
    nodes: HashMap<String, BackendNode>,
    next_seq: usize,
    create_calls: Vec<usize>,
    destroyed: Vec<String>,
    reboots: HashMap<String, usize>,
    scripts: Vec<ScriptRun>,
    /// Remaining nodes before creation starts failing
    fail_after: Option<usize>,
    /// Ids whose destruction fails
    stuck: HashSet<String>,
}

/// A recorded script invocation
#[derive(Debug, Clone)]
pub struct ScriptRun {
    pub ids: Vec<String>,
    pub script: String,
    pub options: RunScriptOptions,
}

/// Backend that lives entirely in memory
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<RwLock<BackendState>>,
    sequential_ids: bool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `<group>-<n>` ids instead of random suffixes
    pub fn with_sequential_ids(mut self) -> Self {
        self.sequential_ids = true;
        self
    }

    /// Let the next `n` nodes succeed, then fail every creation
    pub fn fail_after(&self, n: usize) {
        self.state.write().fail_after = Some(n);
    }

    pub fn clear_failure(&self) {
        let mut state = self.state.write();
        state.fail_after = None;
        state.stuck.clear();
    }

    /// Make `destroy_node(id)` fail until [`clear_failure`](Self::clear_failure)
    pub fn fail_destroy(&self, id: impl Into<String>) {
        self.state.write().stuck.insert(id.into());
    }

    /// Add a node that was not created through the pool
    pub fn insert_node(&self, node: BackendNode) {
        let mut state = self.state.write();
        if !state.nodes.contains_key(&node.id) {
            state.order.push(node.id.clone());
        }
        state.nodes.insert(node.id.clone(), node);
    }

    /// Simulate an out-of-band status change
    pub fn set_status(&self, id: &str, status: NodeStatus) -> bool {
        match self.state.write().nodes.get_mut(id) {
            Some(node) => {
                node.status = status;
                true
            }
            None => false,
        }
    }

    /// Sizes of every `create_nodes_in_group` call, in order
    pub fn create_calls(&self) -> Vec<usize> {
        self.state.read().create_calls.clone()
    }

    /// Ids passed to `destroy_node` or removed by `destroy_nodes_matching`
    pub fn destroyed(&self) -> Vec<String> {
        self.state.read().destroyed.clone()
    }

    pub fn reboot_count(&self, id: &str) -> usize {
        self.state.read().reboots.get(id).copied().unwrap_or(0)
    }

    pub fn script_runs(&self) -> Vec<ScriptRun> {
        self.state.read().scripts.clone()
    }

    pub fn count(&self) -> usize {
        self.state.read().nodes.len()
    }

    fn next_id(&self, state: &mut BackendState, group: &str) -> String {
        state.next_seq += 1;
        if self.sequential_ids {
            format!("{}-{}", group, state.next_seq)
        } else {
            format!("{}-{}", group, &uuid::Uuid::new_v4().to_string()[..8])
        }
    }

    fn matching_ids(state: &BackendState, filter: &NodeFilter) -> Vec<String> {
        state
            .order
            .iter()
            .filter(|id| state.nodes.get(*id).is_some_and(|n| filter.matches(n)))
            .cloned()
            .collect()
    }

    fn set_status_matching(&self, filter: &NodeFilter, status: NodeStatus) {
        let mut state = self.state.write();
        for id in Self::matching_ids(&state, filter) {
            if let Some(node) = state.nodes.get_mut(&id) {
                node.status = status;
            }
        }
    }
}

impl ComputeBackend for InMemoryBackend {
    fn create_nodes_in_group(
        &self,
        group: &str,
        count: usize,
        template: &NodeTemplate,
    ) -> Result<Vec<BackendNode>, BackendError> {
        let mut state = self.state.write();
        state.create_calls.push(count);

        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(remaining) = state.fail_after {
                if remaining == 0 {
                    tracing::warn!(group = %group, created = created.len(), requested = count, "Injected creation failure");
                    return Err(BackendError::PartialCreate {
                        created,
                        requested: count,
                        reason: "injected failure".into(),
                    });
                }
                state.fail_after = Some(remaining - 1);
            }

            let id = self.next_id(&mut state, group);
            let seq = state.next_seq;
            let node = BackendNode::new(id.clone(), group)
                .with_hardware(template.hardware.clone())
                .with_location(template.location.clone())
                .with_private_address(format!("10.0.{}.{}", seq / 250, seq % 250 + 1));
            state.order.push(id.clone());
            state.nodes.insert(id, node.clone());
            created.push(node);
        }

        Ok(created)
    }

    fn destroy_node(&self, id: &str) -> Result<(), BackendError> {
        let mut state = self.state.write();
        if state.stuck.contains(id) {
            return Err(BackendError::Operation {
                id: id.to_string(),
                reason: "injected failure".into(),
            });
        }
        if state.nodes.remove(id).is_none() {
            return Err(BackendError::NodeNotFound(id.to_string()));
        }
        state.order.retain(|n| n != id);
        state.destroyed.push(id.to_string());
        Ok(())
    }

    fn destroy_nodes_matching(&self, filter: &NodeFilter) -> Result<Vec<BackendNode>, BackendError> {
        let mut state = self.state.write();
        let ids = Self::matching_ids(&state, filter);
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = state.nodes.remove(&id) {
                state.destroyed.push(id.clone());
                removed.push(node);
            }
        }
        let BackendState { order, nodes, .. } = &mut *state;
        order.retain(|id| nodes.contains_key(id));
        Ok(removed)
    }

    fn list_nodes_matching(&self, filter: &NodeFilter) -> Result<Vec<BackendNode>, BackendError> {
        let state = self.state.read();
        Ok(Self::matching_ids(&state, filter)
            .into_iter()
            .filter_map(|id| state.nodes.get(&id).cloned())
            .collect())
    }

    fn get_node(&self, id: &str) -> Result<Option<BackendNode>, BackendError> {
        Ok(self.state.read().nodes.get(id).cloned())
    }

    fn reboot_nodes_matching(&self, filter: &NodeFilter) -> Result<(), BackendError> {
        let mut state = self.state.write();
        for id in Self::matching_ids(&state, filter) {
            *state.reboots.entry(id.clone()).or_insert(0) += 1;
            if let Some(node) = state.nodes.get_mut(&id) {
                node.status = NodeStatus::Running;
            }
        }
        Ok(())
    }

    fn suspend_nodes_matching(&self, filter: &NodeFilter) -> Result<(), BackendError> {
        self.set_status_matching(filter, NodeStatus::Suspended);
        Ok(())
    }

    fn resume_nodes_matching(&self, filter: &NodeFilter) -> Result<(), BackendError> {
        self.set_status_matching(filter, NodeStatus::Running);
        Ok(())
    }

    fn run_script_on_nodes_matching(
        &self,
        filter: &NodeFilter,
        script: &str,
        options: &RunScriptOptions,
    ) -> Result<BTreeMap<String, ExecResponse>, BackendError> {
        let mut state = self.state.write();
        let ids = Self::matching_ids(&state, filter);
        let user = options
            .login
            .as_ref()
            .map(|c| c.user.as_str())
            .unwrap_or("unknown");

        let responses = ids
            .iter()
            .map(|id| (id.clone(), ExecResponse::success(format!("{} ran as {}", id, user))))
            .collect();

        state.scripts.push(ScriptRun {
            ids,
            script: script.to_string(),
            options: options.clone(),
        });
        Ok(responses)
    }
}
