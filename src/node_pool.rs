//! Caller-facing node pool
//!
//! [`NodePool`] composes a [`PoolCore`] with a [`MetadataOverlay`] and
//! exposes compute-service style operations over the nodes it has handed
//! out. Predicates are evaluated here against [`NodeView`]s, never by the
//! backend: every bulk operation first resolves the predicate to a set of
//! ids and then calls the backend with [`NodeFilter::Ids`].
//!
//! A view is only produced when its stored group matches the node's live
//! assignment; mappings are dropped whenever a node is released.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::backend::{ComputeBackend, ExecResponse, NodeFilter, RunScriptOptions};
use crate::blobstore::BlobStore;
use crate::config::PoolConfig;
use crate::growth::GrowthHandle;
use crate::models::{LoginCredentials, NodeOptions, NodeView, PoolEntry, PoolStatus};
use crate::overlay::{AssignmentOverlay, MetadataOverlay, PersistedOverlay};
use crate::pool::PoolCore;
use crate::{Error, Result};

/// Builder selecting the metadata overlay strategy
pub struct NodePoolBuilder {
    config: PoolConfig,
    backend: Arc<dyn ComputeBackend>,
    blob_store: Option<Arc<dyn BlobStore>>,
    cache: bool,
}

impl NodePoolBuilder {
    /// Persist metadata in `store` instead of the in-memory assignment table
    pub fn blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    /// Cache decoded records in memory (persisted strategy only)
    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn build(self) -> Result<NodePool> {
        let core = PoolCore::new(self.config, self.backend)?;
        let overlay: Arc<dyn MetadataOverlay> = match self.blob_store {
            Some(store) if self.cache => Arc::new(PersistedOverlay::with_cache(store)),
            Some(store) => Arc::new(PersistedOverlay::new(store)),
            None => Arc::new(AssignmentOverlay::new(&core)),
        };
        Ok(NodePool { core, overlay })
    }
}

/// Warm node pool with caller metadata
pub struct NodePool {
    core: PoolCore,
    overlay: Arc<dyn MetadataOverlay>,
}

impl NodePool {
    /// Pool keeping metadata in its assignment table
    pub fn new(config: PoolConfig, backend: Arc<dyn ComputeBackend>) -> Result<Self> {
        Self::builder(config, backend).build()
    }

    pub fn builder(config: PoolConfig, backend: Arc<dyn ComputeBackend>) -> NodePoolBuilder {
        NodePoolBuilder {
            config,
            backend,
            blob_store: None,
            cache: false,
        }
    }

    pub fn core(&self) -> &PoolCore {
        &self.core
    }

    pub fn config(&self) -> &PoolConfig {
        self.core.config()
    }

    pub fn status(&self) -> PoolStatus {
        self.core.status()
    }

    pub fn start_pool(&self) -> GrowthHandle {
        self.core.start_pool()
    }

    /// Allocate `count` nodes to `group` and attach `options` to each
    pub fn create_nodes_in_group(
        &self,
        group: &str,
        count: usize,
        options: &NodeOptions,
    ) -> Result<Vec<NodeView>> {
        let entries = self.core.allocate(group, count)?;

        let mut views = Vec::with_capacity(entries.len());
        for entry in &entries {
            match self.overlay.store(&entry.node, options, group) {
                Ok(view) => views.push(view),
                Err(e) => {
                    tracing::error!(group = %group, node = %entry.node.id, error = %e, "Failed to store node metadata");
                    self.undo_allocation(&entries);
                    return Err(e);
                }
            }
        }
        Ok(views)
    }

    fn undo_allocation(&self, entries: &[PoolEntry]) {
        for entry in entries {
            if let Err(e) = self.overlay.delete_mapping(entry.id()) {
                tracing::warn!(node = %entry.node.id, error = %e, "Failed to drop node metadata after metadata error");
            }
            if let Err(e) = self.core.release(entry.id()) {
                tracing::warn!(node = %entry.node.id, error = %e, "Failed to release node after metadata error");
            }
        }
    }

    /// Release an assigned node according to the pool's reuse policy
    pub fn destroy_node(&self, id: &str) -> Result<NodeView> {
        let view = self.assigned_view(id)?;
        self.core.release(id)?;
        self.forget([&view.id])?;
        Ok(view)
    }

    /// Release every assigned node whose view matches `predicate`
    pub fn destroy_nodes_matching<P>(&self, predicate: P) -> Result<Vec<NodeView>>
    where
        P: Fn(&NodeView) -> bool,
    {
        let views = self.list_nodes_matching(predicate)?;
        let ids: BTreeSet<String> = views.iter().map(|view| view.id.clone()).collect();
        if ids.is_empty() {
            return Ok(views);
        }

        let report = self.core.release_matching(|entry| ids.contains(entry.id()))?;
        let released: BTreeSet<String> = report
            .released
            .iter()
            .map(|entry| entry.node.id.clone())
            .collect();
        // Released nodes lose their mapping even when others failed
        let forgotten = self.forget(released.iter());
        for (id, e) in &report.failed {
            tracing::error!(pool = %self.config().group, node = %id, error = %e, "Failed to destroy node");
        }
        report.into_result()?;
        forgotten?;

        tracing::info!(pool = %self.config().group, count = released.len(), "Nodes destroyed");
        Ok(views
            .into_iter()
            .filter(|view| released.contains(&view.id))
            .collect())
    }

    /// Drop overlay mappings of released nodes; every id is attempted
    fn forget<'a>(&self, ids: impl IntoIterator<Item = &'a String>) -> Result<()> {
        let mut first_error = None;
        for id in ids {
            if let Err(e) = self.overlay.delete_mapping(id) {
                tracing::warn!(pool = %self.config().group, node = %id, error = %e, "Failed to drop node metadata");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Views of every node currently assigned
    pub fn list_nodes(&self) -> Result<Vec<NodeView>> {
        self.core.ensure_started()?;
        let entries = self.core.assigned_entries();
        let groups: HashMap<String, String> = entries
            .iter()
            .filter_map(|entry| Some((entry.node.id.clone(), entry.state.group()?.to_string())))
            .collect();
        let nodes: Vec<_> = entries.into_iter().map(|entry| entry.node).collect();

        Ok(self
            .overlay
            .load_all(&nodes)?
            .into_iter()
            .filter(|view| groups.get(&view.id) == Some(&view.group))
            .collect())
    }

    pub fn list_nodes_matching<P>(&self, predicate: P) -> Result<Vec<NodeView>>
    where
        P: Fn(&NodeView) -> bool,
    {
        Ok(self
            .list_nodes()?
            .into_iter()
            .filter(|view| predicate(view))
            .collect())
    }

    /// Live view of an assigned node.
    ///
    /// `None` when the node is not assigned by this pool or has vanished
    /// from the backend.
    pub fn get_node_metadata(&self, id: &str) -> Result<Option<NodeView>> {
        self.core.ensure_started()?;
        let Some(group) = self.core.group_of(id) else {
            return Ok(None);
        };
        let Some(node) = self.core.backend().get_node(id)? else {
            tracing::warn!(pool = %self.config().group, node = %id, "Assigned node missing from backend");
            return Ok(None);
        };
        self.core.refresh_node(&node);
        Ok(self.overlay.load(&node)?.filter(|view| view.group == group))
    }

    fn assigned_view(&self, id: &str) -> Result<NodeView> {
        self.core.ensure_started()?;
        let entry = self
            .core
            .entry(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let Some(group) = entry.state.group() else {
            return Err(Error::NotFound(id.to_string()));
        };
        self.overlay
            .load(&entry.node)?
            .filter(|view| view.group == group)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn assigned_filter(&self, id: &str) -> Result<NodeFilter> {
        self.core.ensure_started()?;
        match self.core.group_of(id) {
            Some(_) => Ok(NodeFilter::ids([id])),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    /// Resolve `predicate` to an id filter over assigned nodes
    fn materialize<P>(&self, predicate: P) -> Result<(Vec<NodeView>, Option<NodeFilter>)>
    where
        P: Fn(&NodeView) -> bool,
    {
        let views = self.list_nodes_matching(predicate)?;
        let filter = if views.is_empty() {
            None
        } else {
            Some(NodeFilter::ids(views.iter().map(|view| view.id.clone())))
        };
        Ok((views, filter))
    }

    pub fn reboot_node(&self, id: &str) -> Result<()> {
        let filter = self.assigned_filter(id)?;
        self.core.backend().reboot_nodes_matching(&filter)?;
        Ok(())
    }

    pub fn reboot_nodes_matching<P>(&self, predicate: P) -> Result<Vec<NodeView>>
    where
        P: Fn(&NodeView) -> bool,
    {
        let (views, filter) = self.materialize(predicate)?;
        if let Some(filter) = filter {
            self.core.backend().reboot_nodes_matching(&filter)?;
        }
        Ok(views)
    }

    pub fn suspend_node(&self, id: &str) -> Result<()> {
        let filter = self.assigned_filter(id)?;
        self.core.backend().suspend_nodes_matching(&filter)?;
        Ok(())
    }

    pub fn suspend_nodes_matching<P>(&self, predicate: P) -> Result<Vec<NodeView>>
    where
        P: Fn(&NodeView) -> bool,
    {
        let (views, filter) = self.materialize(predicate)?;
        if let Some(filter) = filter {
            self.core.backend().suspend_nodes_matching(&filter)?;
        }
        Ok(views)
    }

    pub fn resume_node(&self, id: &str) -> Result<()> {
        let filter = self.assigned_filter(id)?;
        self.core.backend().resume_nodes_matching(&filter)?;
        Ok(())
    }

    pub fn resume_nodes_matching<P>(&self, predicate: P) -> Result<Vec<NodeView>>
    where
        P: Fn(&NodeView) -> bool,
    {
        let (views, filter) = self.materialize(predicate)?;
        if let Some(filter) = filter {
            self.core.backend().resume_nodes_matching(&filter)?;
        }
        Ok(views)
    }

    /// Run `script` on one assigned node, logging in with its stored
    /// credentials unless `options` overrides them
    pub fn run_script_on_node(
        &self,
        id: &str,
        script: &str,
        options: &RunScriptOptions,
    ) -> Result<ExecResponse> {
        let view = self.assigned_view(id)?;
        let mut responses = self.run_script_batched(vec![view], script, options)?;
        responses
            .remove(id)
            .ok_or_else(|| Error::Backend(format!("no script response for {}", id)))
    }

    pub fn run_script_on_nodes_matching<P>(
        &self,
        predicate: P,
        script: &str,
        options: &RunScriptOptions,
    ) -> Result<BTreeMap<String, ExecResponse>>
    where
        P: Fn(&NodeView) -> bool,
    {
        let views = self.list_nodes_matching(predicate)?;
        self.run_script_batched(views, script, options)
    }

    /// One backend call per distinct set of login credentials
    fn run_script_batched(
        &self,
        views: Vec<NodeView>,
        script: &str,
        options: &RunScriptOptions,
    ) -> Result<BTreeMap<String, ExecResponse>> {
        let mut batches: BTreeMap<Option<LoginCredentials>, Vec<String>> = BTreeMap::new();
        for view in views {
            let login = options.login.clone().or(view.credentials);
            batches.entry(login).or_default().push(view.id);
        }

        let mut responses = BTreeMap::new();
        for (login, ids) in batches {
            let batch_options = RunScriptOptions {
                login,
                ..options.clone()
            };
            tracing::debug!(pool = %self.config().group, count = ids.len(), "Running script");
            responses.extend(self.core.backend().run_script_on_nodes_matching(
                &NodeFilter::ids(ids),
                script,
                &batch_options,
            )?);
        }
        Ok(responses)
    }

    /// Destroy every node of the pool and drop all metadata. Terminal.
    pub fn close(&self) -> Result<()> {
        self.core.close()?;
        self.overlay.delete_all_mappings()
    }
}
