//! Pool core: warm nodes handed out by group
//!
//! A [`PoolCore`] owns a set of backend nodes, each either available or
//! assigned to a caller-chosen group. It grows through a bounded worker pool
//! and shrinks on release when nodes are not reused.
//!
//! Locking: `(available, nodes, assignments)` live in one coarse
//! [`PoolState`] mutex. Compound operations (`allocate`, `release`, `close`)
//! also hold the operation lock, so a synchronous growth wait inside
//! `allocate` is never interleaved with another allocation. Growth tasks only
//! take the growth lock and the state mutex, and signal `growth_done` once
//! their reservation is settled.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::backend::{BackendError, ComputeBackend, NodeFilter};
use crate::config::PoolConfig;
use crate::growth::{GrowthHandle, GrowthSender, GrowthWorkers};
use crate::models::{BackendNode, EntryState, Lifecycle, NodeOptions, PoolEntry, PoolStatus};
use crate::{Error, Result};

/// Assignment index entry for one node
#[derive(Debug, Clone)]
pub(crate) struct Assignment {
    pub group: String,
    /// Caller options recorded by the assignment-table overlay
    pub options: Option<NodeOptions>,
}

pub(crate) struct PoolState {
    lifecycle: Lifecycle,
    nodes: HashMap<String, BackendNode>,
    /// Oldest first
    available: VecDeque<String>,
    groups: BTreeMap<String, Vec<String>>,
    /// Reverse index id -> group, kept in step with `groups`
    assignments: HashMap<String, Assignment>,
    /// Nodes requested from the backend and not yet merged
    pending: usize,
    /// Callers of `start_pool` while the start growth is in flight
    start_waiters: Vec<GrowthSender>,
}

impl PoolState {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::NotStarted,
            nodes: HashMap::new(),
            available: VecDeque::new(),
            groups: BTreeMap::new(),
            assignments: HashMap::new(),
            pending: 0,
            start_waiters: Vec::new(),
        }
    }

    fn ensure_started(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Started => Ok(()),
            Lifecycle::Closed => Err(Error::Closed),
            Lifecycle::NotStarted | Lifecycle::Starting => Err(Error::NotStarted),
        }
    }

    fn mark_grown(&mut self) {
        if self.lifecycle == Lifecycle::Starting {
            self.lifecycle = Lifecycle::Started;
            for waiter in self.start_waiters.drain(..) {
                let _ = waiter.send(Ok(Vec::new()));
            }
        }
    }

    /// Back to `NotStarted` after a failed start growth
    fn fail_start(&mut self, partial: &[BackendNode], reason: &str) {
        if self.lifecycle == Lifecycle::Starting {
            self.lifecycle = Lifecycle::NotStarted;
            for waiter in self.start_waiters.drain(..) {
                let _ = waiter.send(Err(Error::BackendProvisioningFailure {
                    partial: partial.to_vec(),
                    reason: reason.to_string(),
                }));
            }
        }
    }

    /// Add freshly created nodes as available; returns the nodes added
    fn merge(&mut self, created: Vec<BackendNode>) -> Vec<BackendNode> {
        let mut added = Vec::with_capacity(created.len());
        for node in created {
            if self.nodes.contains_key(&node.id) {
                tracing::warn!(node = %node.id, "Backend returned a node already in the pool");
                continue;
            }
            self.available.push_back(node.id.clone());
            self.nodes.insert(node.id.clone(), node.clone());
            added.push(node);
        }
        added
    }

    fn assign(&mut self, group: &str, count: usize) -> Vec<PoolEntry> {
        let mut entries = Vec::with_capacity(count);
        while entries.len() < count {
            let Some(id) = self.available.pop_front() else {
                break;
            };
            let Some(node) = self.nodes.get(&id).cloned() else {
                continue;
            };
            self.groups.entry(group.to_string()).or_default().push(id.clone());
            self.assignments.insert(
                id,
                Assignment {
                    group: group.to_string(),
                    options: None,
                },
            );
            entries.push(PoolEntry {
                node,
                state: EntryState::Assigned(group.to_string()),
            });
        }
        entries
    }

    /// Remove `id` from its group; returns the entry as it was assigned
    fn unassign(&mut self, id: &str) -> Option<PoolEntry> {
        let assignment = self.assignments.remove(id)?;
        if let Some(members) = self.groups.get_mut(&assignment.group) {
            members.retain(|member| member != id);
            if members.is_empty() {
                self.groups.remove(&assignment.group);
            }
        }
        let node = self.nodes.get(id)?.clone();
        Some(PoolEntry {
            node,
            state: EntryState::Assigned(assignment.group),
        })
    }

    fn entry(&self, id: &str) -> Option<PoolEntry> {
        let node = self.nodes.get(id)?.clone();
        let state = match self.assignments.get(id) {
            Some(assignment) => EntryState::Assigned(assignment.group.clone()),
            None => EntryState::Available,
        };
        Some(PoolEntry { node, state })
    }

    fn assigned_entries(&self) -> impl Iterator<Item = PoolEntry> + '_ {
        self.groups.iter().flat_map(move |(group, ids)| {
            ids.iter().filter_map(move |id| {
                self.nodes.get(id).map(|node| PoolEntry {
                    node: node.clone(),
                    state: EntryState::Assigned(group.clone()),
                })
            })
        })
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.available.clear();
        self.groups.clear();
        self.assignments.clear();
        self.pending = 0;
        // Dropped senders resolve waiting handles to `Closed`
        self.start_waiters.clear();
    }
}

/// State shared with growth tasks and the assignment-table overlay
pub(crate) struct Shared {
    config: PoolConfig,
    backend: Arc<dyn ComputeBackend>,
    state: Mutex<PoolState>,
    /// Signalled whenever a growth task settles its `pending` reservation
    growth_done: Condvar,
    growth_lock: Mutex<()>,
}

impl Shared {
    /// Body of one growth task
    fn grow(&self, n: usize) -> Result<Vec<BackendNode>> {
        let result = self.grow_locked(n);
        self.growth_done.notify_all();
        result
    }

    fn grow_locked(&self, n: usize) -> Result<Vec<BackendNode>> {
        let group = &self.config.group;
        let _growth = self.growth_lock.lock();

        if self.state.lock().lifecycle == Lifecycle::Closed {
            return Err(Error::Closed);
        }

        tracing::debug!(pool = %group, count = n, "Requesting nodes from backend");
        let (mut created, failure) =
            match self.backend.create_nodes_in_group(group, n, &self.config.template) {
                Ok(nodes) if nodes.len() >= n => (nodes, None),
                Ok(nodes) => {
                    let reason = format!("backend returned {} of {} node(s)", nodes.len(), n);
                    (nodes, Some(reason))
                }
                Err(BackendError::PartialCreate { created, reason, .. }) => (created, Some(reason)),
                Err(e) => (Vec::new(), Some(e.to_string())),
            };

        // Only the reserved `n` slots fit under max_size
        if created.len() > n {
            let surplus = created.split_off(n);
            tracing::warn!(pool = %group, requested = n, surplus = surplus.len(), "Backend over-provisioned; destroying surplus");
            self.discard(&surplus);
        }

        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(n);

        if state.lifecycle == Lifecycle::Closed {
            drop(state);
            self.discard(&created);
            return Err(Error::Closed);
        }

        let merged = state.merge(created);

        match failure {
            None => {
                state.mark_grown();
                tracing::info!(
                    pool = %group,
                    added = merged.len(),
                    total = state.nodes.len(),
                    available = state.available.len(),
                    "Pool grown"
                );
                Ok(merged)
            }
            Some(reason) => {
                state.fail_start(&merged, &reason);
                tracing::error!(
                    pool = %group,
                    requested = n,
                    added = merged.len(),
                    error = %reason,
                    "Pool growth failed"
                );
                Err(Error::BackendProvisioningFailure {
                    partial: merged,
                    reason,
                })
            }
        }
    }

    /// Destroy nodes that must not join the pool
    fn discard(&self, nodes: &[BackendNode]) {
        for node in nodes {
            if let Err(e) = self.backend.destroy_node(&node.id) {
                tracing::error!(pool = %self.config.group, node = %node.id, error = %e, "Failed to destroy discarded node");
            }
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Group and recorded options of an assigned node
    pub fn assignment(&self, id: &str) -> Option<Assignment> {
        self.state.lock().assignments.get(id).cloned()
    }

    pub fn record_options(&self, id: &str, group: &str, options: &NodeOptions) -> Result<()> {
        let mut state = self.state.lock();
        match state.assignments.get_mut(id) {
            Some(assignment) if assignment.group == group => {
                assignment.options = Some(options.clone());
                Ok(())
            }
            _ => Err(Error::NotFound(id.to_string())),
        }
    }

    pub fn clear_options(&self, id: &str) {
        if let Some(assignment) = self.state.lock().assignments.get_mut(id) {
            assignment.options = None;
        }
    }

    pub fn clear_all_options(&self) {
        for assignment in self.state.lock().assignments.values_mut() {
            assignment.options = None;
        }
    }
}

/// Outcome of [`PoolCore::release_matching`]
#[derive(Debug, Default)]
pub struct BulkRelease {
    /// Entries as they were assigned
    pub released: Vec<PoolEntry>,
    pub failed: Vec<(String, Error)>,
}

impl BulkRelease {
    /// Released entries, or the first failure
    pub fn into_result(self) -> Result<Vec<PoolEntry>> {
        match self.failed.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(self.released),
        }
    }
}

/// Pool of warm backend nodes
pub struct PoolCore {
    shared: Arc<Shared>,
    workers: GrowthWorkers,
    ops: Mutex<()>,
}

impl PoolCore {
    /// Create a pool; nothing is provisioned until [`PoolCore::start_pool`]
    pub fn new(config: PoolConfig, backend: Arc<dyn ComputeBackend>) -> Result<Self> {
        config.validate()?;
        let workers = GrowthWorkers::new(&config.group, config.growth_workers)?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                backend,
                state: Mutex::new(PoolState::new()),
                growth_done: Condvar::new(),
                growth_lock: Mutex::new(()),
            }),
            workers,
            ops: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.shared.backend
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.state.lock().lifecycle
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle() == Lifecycle::Started
    }

    /// `NotStarted` or `Closed` unless the pool is serving
    pub fn ensure_started(&self) -> Result<()> {
        self.shared.state.lock().ensure_started()
    }

    /// Grow the pool to `min_size`.
    ///
    /// A no-op resolving immediately when the pool is already started. While
    /// a start is in flight the returned handle resolves with it. If the
    /// start growth fails the pool stays not started and this may be called
    /// again.
    pub fn start_pool(&self) -> GrowthHandle {
        let deficit = {
            let mut state = self.shared.state.lock();
            match state.lifecycle {
                Lifecycle::Closed => return GrowthHandle::ready(Err(Error::Closed)),
                Lifecycle::Started => return GrowthHandle::ready(Ok(Vec::new())),
                Lifecycle::Starting => {
                    let (tx, handle) = GrowthHandle::channel();
                    state.start_waiters.push(tx);
                    return handle;
                }
                Lifecycle::NotStarted => {}
            }
            state.lifecycle = Lifecycle::Starting;
            self.config()
                .min_size
                .saturating_sub(state.nodes.len() + state.pending)
        };

        tracing::info!(pool = %self.config().group, count = deficit, "Starting pool");
        self.increase_pool_size(deficit)
    }

    /// Submit a growth of `n` nodes to the worker pool
    pub(crate) fn increase_pool_size(&self, n: usize) -> GrowthHandle {
        {
            let mut state = self.shared.state.lock();
            if state.lifecycle == Lifecycle::Closed {
                return GrowthHandle::ready(Err(Error::Closed));
            }
            if n == 0 {
                state.mark_grown();
                return GrowthHandle::ready(Ok(Vec::new()));
            }
            state.pending += n;
        }

        let shared = Arc::clone(&self.shared);
        self.workers.submit(move || shared.grow(n))
    }

    /// Hand `count` nodes to `group`, growing synchronously when the
    /// available set is short.
    ///
    /// Growth already in flight counts towards the shortfall: the call waits
    /// for it and only requests the remainder from the backend.
    pub fn allocate(&self, group: &str, count: usize) -> Result<Vec<PoolEntry>> {
        let _op = self.ops.lock();
        let config = self.config();

        let mut state = self.shared.state.lock();
        loop {
            state.ensure_started()?;
            if count == 0 {
                return Ok(Vec::new());
            }

            let available = state.available.len();
            if available >= count {
                let entries = state.assign(group, count);
                tracing::info!(
                    pool = %config.group,
                    group = %group,
                    count = entries.len(),
                    available = state.available.len(),
                    "Nodes allocated"
                );
                return Ok(entries);
            }

            let shortfall = count - available;
            if state.nodes.len() + shortfall > config.max_size {
                tracing::warn!(
                    pool = %config.group,
                    group = %group,
                    requested = count,
                    available,
                    total = state.nodes.len(),
                    "Allocation exceeds pool capacity"
                );
                return Err(Error::InsufficientCapacity {
                    available,
                    pool_size: state.nodes.len(),
                    min_size: config.min_size,
                    max_size: config.max_size,
                    requested: count,
                });
            }

            if state.pending >= shortfall {
                tracing::debug!(pool = %config.group, group = %group, pending = state.pending, "Waiting for in-flight growth");
                self.shared.growth_done.wait(&mut state);
                continue;
            }

            let needed = shortfall - state.pending;
            drop(state);
            tracing::info!(pool = %config.group, group = %group, count = needed, "Growing pool for allocation");
            self.increase_pool_size(needed).wait()?;
            state = self.shared.state.lock();
        }
    }

    /// Release an assigned node; returns the entry as it was assigned
    pub fn release(&self, id: &str) -> Result<PoolEntry> {
        let _op = self.ops.lock();
        self.release_locked(id)
    }

    fn release_locked(&self, id: &str) -> Result<PoolEntry> {
        let config = self.config();
        {
            let mut state = self.shared.state.lock();
            state.ensure_started()?;
            if !state.assignments.contains_key(id) {
                return Err(Error::NotFound(id.to_string()));
            }

            if config.reuse_destroyed {
                let entry = state
                    .unassign(id)
                    .ok_or_else(|| Error::NotFound(id.to_string()))?;
                state.available.push_back(id.to_string());
                tracing::info!(pool = %config.group, node = %id, available = state.available.len(), "Node returned to pool");
                return Ok(entry);
            }
        }

        // The operation lock keeps the node assigned to us while the backend works
        match self.shared.backend.destroy_node(id) {
            Ok(()) => {}
            Err(BackendError::NodeNotFound(_)) => {
                tracing::warn!(pool = %config.group, node = %id, "Node already gone from backend");
            }
            Err(e) => {
                tracing::error!(pool = %config.group, node = %id, error = %e, "Failed to destroy node");
                return Err(e.into());
            }
        }

        let (entry, deficit) = {
            let mut state = self.shared.state.lock();
            let entry = state
                .unassign(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            state.nodes.remove(id);
            let deficit = config
                .min_size
                .saturating_sub(state.nodes.len() + state.pending);
            tracing::info!(pool = %config.group, node = %id, total = state.nodes.len(), "Node destroyed");
            (entry, deficit)
        };

        if deficit > 0 {
            tracing::info!(pool = %config.group, count = deficit, "Replenishing pool");
            // Failures surface in the growth task's logs
            drop(self.increase_pool_size(deficit));
        }

        Ok(entry)
    }

    /// Release every assigned entry matching `predicate`.
    ///
    /// Matching entries are snapshotted first, then released one by one. A
    /// failed release does not stop the others; failures are reported next
    /// to the entries that were released.
    pub fn release_matching<P>(&self, predicate: P) -> Result<BulkRelease>
    where
        P: Fn(&PoolEntry) -> bool,
    {
        let _op = self.ops.lock();
        let matching: Vec<String> = {
            let state = self.shared.state.lock();
            state.ensure_started()?;
            state
                .assigned_entries()
                .filter(|entry| predicate(entry))
                .map(|entry| entry.node.id)
                .collect()
        };

        let mut report = BulkRelease::default();
        for id in matching {
            match self.release_locked(&id) {
                Ok(entry) => report.released.push(entry),
                Err(e) => report.failed.push((id, e)),
            }
        }
        Ok(report)
    }

    pub fn entry(&self, id: &str) -> Option<PoolEntry> {
        self.shared.state.lock().entry(id)
    }

    /// Every entry: available ones oldest first, then assigned ones by group
    pub fn entries(&self) -> Vec<PoolEntry> {
        let state = self.shared.state.lock();
        let mut entries: Vec<PoolEntry> = state
            .available
            .iter()
            .filter_map(|id| state.entry(id))
            .collect();
        entries.extend(state.assigned_entries());
        entries
    }

    pub fn assigned_entries(&self) -> Vec<PoolEntry> {
        self.shared.state.lock().assigned_entries().collect()
    }

    pub fn group_of(&self, id: &str) -> Option<String> {
        self.shared
            .state
            .lock()
            .assignments
            .get(id)
            .map(|assignment| assignment.group.clone())
    }

    /// Replace the cached copy of a node when the backend reports a change.
    ///
    /// Returns false when the node is not part of the pool.
    pub fn refresh_node(&self, node: &BackendNode) -> bool {
        let mut state = self.shared.state.lock();
        match state.nodes.get_mut(&node.id) {
            Some(cached) => {
                if cached != node {
                    tracing::debug!(pool = %self.config().group, node = %node.id, "Cached node updated");
                    *cached = node.clone();
                }
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        let config = self.config();
        PoolStatus {
            group: config.group.clone(),
            lifecycle: state.lifecycle,
            min_size: config.min_size,
            max_size: config.max_size,
            total: state.nodes.len(),
            available: state.available.len(),
            assigned: state.assignments.len(),
            pending: state.pending,
            groups: state
                .groups
                .iter()
                .map(|(group, ids)| (group.clone(), ids.len()))
                .collect(),
        }
    }

    /// Tear the pool down: destroy every backend node tagged with the pool
    /// group and clear all bookkeeping. Terminal.
    pub fn close(&self) -> Result<Vec<BackendNode>> {
        let _op = self.ops.lock();
        let group = self.config().group.clone();
        {
            let mut state = self.shared.state.lock();
            if state.lifecycle == Lifecycle::Closed {
                return Err(Error::Closed);
            }
            state.lifecycle = Lifecycle::Closed;
            state.clear();
        }
        self.workers.shutdown();

        // Wait out a growth call already talking to the backend
        let _growth = self.shared.growth_lock.lock();
        let destroyed = self
            .shared
            .backend
            .destroy_nodes_matching(&NodeFilter::Group(group.clone()))
            .map_err(|e| {
                tracing::error!(pool = %group, error = %e, "Failed to destroy pool nodes");
                Error::from(e)
            })?;
        tracing::info!(pool = %group, destroyed = destroyed.len(), "Pool closed");
        Ok(destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, MockComputeBackend};
    use crate::config::NodeTemplate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn config(min: usize, max: usize, reuse: bool) -> PoolConfig {
        PoolConfig::new("pool", NodeTemplate::default())
            .min_size(min)
            .max_size(max)
            .reuse_destroyed(reuse)
    }

    fn started_pool(min: usize, max: usize, reuse: bool) -> (PoolCore, InMemoryBackend) {
        let backend = InMemoryBackend::new().with_sequential_ids();
        let pool = PoolCore::new(config(min, max, reuse), Arc::new(backend.clone())).unwrap();
        pool.start_pool().wait().unwrap();
        (pool, backend)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn assert_invariants(pool: &PoolCore) {
        let status = pool.status();
        let entries = pool.entries();
        let mut ids: Vec<_> = entries.iter().map(|e| e.node.id.clone()).collect();
        ids.sort();
        ids.dedup();

        assert_eq!(status.available + status.assigned, status.total);
        assert_eq!(status.groups.values().sum::<usize>(), status.assigned);
        assert_eq!(ids.len(), status.total);
        assert!(status.total <= status.max_size);
    }

    fn counting_mock(created: Arc<AtomicUsize>, creates: usize) -> MockComputeBackend {
        let mut mock = MockComputeBackend::new();
        mock.expect_create_nodes_in_group()
            .times(creates)
            .returning(move |group, count, _| {
                Ok((0..count)
                    .map(|_| {
                        let n = created.fetch_add(1, Ordering::SeqCst);
                        BackendNode::new(format!("m-{}", n), group)
                    })
                    .collect())
            });
        mock
    }

    #[test]
    fn test_operations_before_start_fail() {
        let pool = PoolCore::new(config(1, 2, true), Arc::new(InMemoryBackend::new())).unwrap();

        assert!(matches!(pool.allocate("g", 1), Err(Error::NotStarted)));
        assert!(matches!(pool.release("x"), Err(Error::NotStarted)));
        assert!(matches!(pool.release_matching(|_| true), Err(Error::NotStarted)));
        assert_eq!(pool.lifecycle(), Lifecycle::NotStarted);
    }

    #[test]
    fn test_start_grows_to_min() {
        let (pool, backend) = started_pool(2, 5, true);

        assert!(pool.is_started());
        assert_eq!(pool.status().total, 2);
        assert_eq!(pool.status().available, 2);
        assert_eq!(backend.create_calls(), vec![2]);

        // Second start is a no-op
        assert!(pool.start_pool().wait().unwrap().is_empty());
        assert_eq!(backend.create_calls(), vec![2]);
    }

    #[test]
    fn test_start_with_zero_min() {
        let (pool, backend) = started_pool(0, 3, true);
        assert!(pool.is_started());
        assert!(backend.create_calls().is_empty());
    }

    #[test]
    fn test_allocate_from_available_does_not_grow() {
        let created = Arc::new(AtomicUsize::new(0));
        let mock = counting_mock(created, 1);
        let pool = PoolCore::new(config(3, 5, true), Arc::new(mock)).unwrap();
        pool.start_pool().wait().unwrap();

        let entries = pool.allocate("g1", 2).unwrap();

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.state == EntryState::Assigned("g1".into())));
        assert_eq!(pool.status().available, 1);
        assert_invariants(&pool);
    }

    #[test]
    fn test_allocate_grows_by_shortfall() {
        let (pool, backend) = started_pool(2, 5, true);

        let entries = pool.allocate("g1", 4).unwrap();

        assert_eq!(entries.len(), 4);
        assert_eq!(backend.create_calls(), vec![2, 2]);
        assert_eq!(pool.status().total, 4);
        assert_eq!(pool.status().available, 0);
        assert_invariants(&pool);
    }

    #[test]
    fn test_allocate_order_is_oldest_first() {
        let (pool, _backend) = started_pool(3, 3, true);

        let first = pool.allocate("g1", 1).unwrap();
        assert_eq!(first[0].node.id, "pool-1");

        pool.release("pool-1").unwrap();
        let next = pool.allocate("g2", 2).unwrap();
        let ids: Vec<_> = next.iter().map(|e| e.node.id.as_str()).collect();
        assert_eq!(ids, vec!["pool-2", "pool-3"]);
    }

    #[test]
    fn test_allocate_past_max_leaves_state_untouched() {
        let (pool, backend) = started_pool(2, 3, true);
        pool.allocate("g1", 1).unwrap();
        let before = pool.entries();

        let err = pool.allocate("g2", 3).unwrap_err();

        match err {
            Error::InsufficientCapacity { available, pool_size, min_size, max_size, requested } => {
                assert_eq!((available, pool_size, min_size, max_size, requested), (1, 2, 2, 3, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pool.entries(), before);
        assert_eq!(backend.create_calls(), vec![2]);
    }

    #[test]
    fn test_allocate_zero_is_empty() {
        let (pool, _backend) = started_pool(1, 1, true);
        assert!(pool.allocate("g1", 0).unwrap().is_empty());
        assert_eq!(pool.status().available, 1);
    }

    #[test]
    fn test_release_with_reuse_returns_to_available() {
        let (pool, backend) = started_pool(2, 5, true);
        let entries = pool.allocate("g1", 2).unwrap();
        let id = entries[0].node.id.clone();

        let released = pool.release(&id).unwrap();

        assert_eq!(released.state, EntryState::Assigned("g1".into()));
        assert!(pool.entry(&id).unwrap().is_available());
        assert_eq!(pool.status().total, 2);
        assert!(backend.destroyed().is_empty());
        assert_invariants(&pool);
    }

    #[test]
    fn test_release_unknown_is_not_found() {
        let (pool, _backend) = started_pool(1, 2, true);
        assert!(matches!(pool.release("nope"), Err(Error::NotFound(_))));

        // Available nodes are not releasable either
        assert!(matches!(pool.release("pool-1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_release_without_reuse_destroys_once_and_replenishes() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut mock = counting_mock(created, 2);
        mock.expect_destroy_node()
            .withf(|id| id == "m-0")
            .times(1)
            .returning(|_| Ok(()));
        let pool = PoolCore::new(config(1, 2, false), Arc::new(mock)).unwrap();
        pool.start_pool().wait().unwrap();

        let entries = pool.allocate("g1", 1).unwrap();
        assert_eq!(entries[0].node.id, "m-0");

        pool.release("m-0").unwrap();
        assert!(pool.entry("m-0").is_none());

        assert!(wait_until(|| pool.status().total >= 1));
        assert_eq!(pool.status().available, 1);
        assert_invariants(&pool);
    }

    #[test]
    fn test_release_failure_keeps_assignment() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut mock = counting_mock(created, 1);
        mock.expect_destroy_node().times(1).returning(|id| {
            Err(BackendError::Operation {
                id: id.to_string(),
                reason: "busy".into(),
            })
        });
        let pool = PoolCore::new(config(1, 1, false), Arc::new(mock)).unwrap();
        pool.start_pool().wait().unwrap();
        pool.allocate("g1", 1).unwrap();

        assert!(matches!(pool.release("m-0"), Err(Error::Backend(_))));
        assert_eq!(pool.group_of("m-0").as_deref(), Some("g1"));
    }

    #[test]
    fn test_release_matching_by_group() {
        let (pool, _backend) = started_pool(4, 4, true);
        pool.allocate("g1", 2).unwrap();
        pool.allocate("g2", 2).unwrap();

        let report = pool
            .release_matching(|e| e.state == EntryState::Assigned("g1".into()))
            .unwrap();

        assert!(report.failed.is_empty());
        assert_eq!(report.into_result().unwrap().len(), 2);
        assert_eq!(pool.status().groups.get("g1"), None);
        assert_eq!(pool.status().groups.get("g2"), Some(&2));
        assert_invariants(&pool);
    }

    #[test]
    fn test_release_matching_continues_past_failure() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut mock = counting_mock(created, 1);
        mock.expect_destroy_node().times(2).returning(|id| {
            if id == "m-1" {
                Err(BackendError::Operation {
                    id: id.to_string(),
                    reason: "busy".into(),
                })
            } else {
                Ok(())
            }
        });
        let pool = PoolCore::new(config(0, 2, false), Arc::new(mock)).unwrap();
        pool.start_pool().wait().unwrap();
        pool.allocate("g1", 2).unwrap();

        let report = pool.release_matching(|_| true).unwrap();

        let released: Vec<_> = report.released.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(released, vec!["m-0".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "m-1");
        assert!(pool.entry("m-0").is_none());
        assert_eq!(pool.group_of("m-1").as_deref(), Some("g1"));
        assert!(matches!(report.into_result(), Err(Error::Backend(_))));
    }

    #[test]
    fn test_allocate_waits_for_replenishment_in_flight() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut mock = MockComputeBackend::new();
        mock.expect_create_nodes_in_group()
            .times(2)
            .returning(move |group, count, _| {
                std::thread::sleep(Duration::from_millis(100));
                Ok((0..count)
                    .map(|_| BackendNode::new(format!("m-{}", created.fetch_add(1, Ordering::SeqCst)), group))
                    .collect())
            });
        mock.expect_destroy_node().times(1).returning(|_| Ok(()));
        let pool = PoolCore::new(config(2, 2, false), Arc::new(mock)).unwrap();
        pool.start_pool().wait().unwrap();
        pool.allocate("g1", 2).unwrap();

        // Schedules a replacement that is still being created below
        pool.release("m-0").unwrap();
        assert_eq!(pool.status().pending, 1);

        let entries = pool.allocate("g2", 1).unwrap();

        assert_eq!(entries[0].node.id, "m-2");
        assert_eq!(pool.status().total, 2);
        assert_invariants(&pool);
    }

    #[test]
    fn test_start_while_starting_resolves_with_start() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut mock = MockComputeBackend::new();
        mock.expect_create_nodes_in_group()
            .times(1)
            .returning(move |group, count, _| {
                std::thread::sleep(Duration::from_millis(100));
                Ok((0..count)
                    .map(|_| BackendNode::new(format!("m-{}", created.fetch_add(1, Ordering::SeqCst)), group))
                    .collect())
            });
        let pool = PoolCore::new(config(2, 2, true), Arc::new(mock)).unwrap();

        let first = pool.start_pool();
        let second = pool.start_pool();
        assert_eq!(pool.lifecycle(), Lifecycle::Starting);

        assert!(second.wait().unwrap().is_empty());
        assert!(pool.is_started());
        assert_eq!(pool.allocate("g1", 1).unwrap().len(), 1);
        assert_eq!(first.wait().unwrap().len(), 2);
    }

    #[test]
    fn test_start_waiter_sees_start_failure() {
        let mut mock = MockComputeBackend::new();
        mock.expect_create_nodes_in_group()
            .times(1)
            .returning(|_, _, _| {
                std::thread::sleep(Duration::from_millis(100));
                Err(BackendError::Other("quota exceeded".into()))
            });
        let pool = PoolCore::new(config(1, 1, true), Arc::new(mock)).unwrap();

        let first = pool.start_pool();
        let second = pool.start_pool();

        assert!(matches!(second.wait(), Err(Error::BackendProvisioningFailure { .. })));
        assert!(first.wait().is_err());
        assert_eq!(pool.lifecycle(), Lifecycle::NotStarted);
    }

    #[test]
    fn test_surplus_nodes_are_destroyed() {
        let mut mock = MockComputeBackend::new();
        mock.expect_create_nodes_in_group()
            .times(1)
            .returning(|group, count, _| {
                Ok((0..=count)
                    .map(|i| BackendNode::new(format!("x-{}", i), group))
                    .collect())
            });
        mock.expect_destroy_node()
            .withf(|id| id == "x-2")
            .times(1)
            .returning(|_| Ok(()));
        let pool = PoolCore::new(config(2, 2, true), Arc::new(mock)).unwrap();

        let merged = pool.start_pool().wait().unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(pool.status().total, 2);
        assert!(pool.entry("x-2").is_none());
        assert_invariants(&pool);
    }

    #[test]
    fn test_partial_growth_keeps_created_nodes() {
        let backend = InMemoryBackend::new();
        let pool = PoolCore::new(config(1, 5, true), Arc::new(backend.clone())).unwrap();
        pool.start_pool().wait().unwrap();
        pool.allocate("g1", 1).unwrap();

        backend.fail_after(1);
        let err = pool.allocate("g2", 3).unwrap_err();

        match err {
            Error::BackendProvisioningFailure { partial, .. } => assert_eq!(partial.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pool.status().total, 2);
        assert_eq!(pool.status().available, 1);
        assert_eq!(pool.status().pending, 0);
        assert_invariants(&pool);
    }

    #[test]
    fn test_failed_start_can_be_retried() {
        let backend = InMemoryBackend::new();
        backend.fail_after(1);
        let pool = PoolCore::new(config(2, 4, true), Arc::new(backend.clone())).unwrap();

        assert!(matches!(
            pool.start_pool().wait(),
            Err(Error::BackendProvisioningFailure { .. })
        ));
        assert_eq!(pool.lifecycle(), Lifecycle::NotStarted);
        assert_eq!(pool.status().total, 1);

        backend.clear_failure();
        pool.start_pool().wait().unwrap();
        assert!(pool.is_started());
        assert_eq!(pool.status().total, 2);
        assert_eq!(backend.create_calls(), vec![2, 1]);
    }

    #[test]
    fn test_close_destroys_group_and_is_terminal() {
        let (pool, backend) = started_pool(2, 4, true);
        pool.allocate("g1", 1).unwrap();
        backend.insert_node(BackendNode::new("foreign", "other"));

        let destroyed = pool.close().unwrap();

        assert_eq!(destroyed.len(), 2);
        assert_eq!(backend.count(), 1);
        assert_eq!(pool.status().total, 0);
        assert!(matches!(pool.allocate("g1", 1), Err(Error::Closed)));
        assert!(matches!(pool.start_pool().wait(), Err(Error::Closed)));
        assert!(matches!(pool.close(), Err(Error::Closed)));
    }

    #[test]
    fn test_refresh_node_replaces_cached_copy() {
        let (pool, _backend) = started_pool(1, 1, true);
        let updated = BackendNode::new("pool-1", "pool")
            .with_status(crate::models::NodeStatus::Suspended);

        assert!(pool.refresh_node(&updated));
        assert_eq!(pool.entry("pool-1").unwrap().node, updated);
        assert!(!pool.refresh_node(&BackendNode::new("other", "pool")));
    }
}
