//! Overlay backed by the pool's own assignment table

use std::sync::Arc;

use super::MetadataOverlay;
use crate::models::{BackendNode, MetadataRecord, NodeOptions, NodeView};
use crate::pool::{PoolCore, Shared};
use crate::Result;

/// Keeps caller metadata next to each assignment in memory.
///
/// A node has a mapping exactly while it is assigned; nothing survives a
/// restart. Deleting a mapping only drops the stored options, the group
/// comes from the assignment itself.
pub struct AssignmentOverlay {
    shared: Arc<Shared>,
}

impl AssignmentOverlay {
    pub fn new(pool: &PoolCore) -> Self {
        Self {
            shared: pool.shared(),
        }
    }
}

impl MetadataOverlay for AssignmentOverlay {
    fn store(&self, node: &BackendNode, options: &NodeOptions, group: &str) -> Result<NodeView> {
        self.shared.record_options(&node.id, group, options)?;
        Ok(MetadataRecord::new(group, options).to_view(node))
    }

    fn load(&self, node: &BackendNode) -> Result<Option<NodeView>> {
        Ok(self.shared.assignment(&node.id).map(|assignment| {
            let options = assignment.options.unwrap_or_default();
            MetadataRecord::new(assignment.group, &options).to_view(node)
        }))
    }

    fn delete_mapping(&self, id: &str) -> Result<()> {
        self.shared.clear_options(id);
        Ok(())
    }

    fn delete_all_mappings(&self) -> Result<()> {
        self.shared.clear_all_options();
        Ok(())
    }
}
