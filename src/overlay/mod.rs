//! Metadata overlay: caller-facing group, tags and credentials for nodes
//!
//! The backend keeps no notion of pool groups or caller metadata, so the pool
//! layers it on top. Two strategies share one contract: loading a node with
//! no stored mapping yields `None`, which is how the pool tells apart nodes
//! it does not currently hand out.

mod assignment;
mod persisted;

use crate::models::{BackendNode, NodeOptions, NodeView};
use crate::Result;

pub use assignment::AssignmentOverlay;
pub use persisted::PersistedOverlay;

pub trait MetadataOverlay: Send + Sync {
    /// Associate `options` and `group` with `node`
    fn store(&self, node: &BackendNode, options: &NodeOptions, group: &str) -> Result<NodeView>;

    fn load(&self, node: &BackendNode) -> Result<Option<NodeView>>;

    /// Views for every node with a mapping; nodes without one are skipped
    fn load_all(&self, nodes: &[BackendNode]) -> Result<Vec<NodeView>> {
        let mut views = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Some(view) = self.load(node)? {
                views.push(view);
            }
        }
        Ok(views)
    }

    fn delete_mapping(&self, id: &str) -> Result<()>;

    fn delete_all_mappings(&self) -> Result<()>;
}
