//! Node Pool
//!
//! A warm pool of pre-provisioned compute nodes. Provisioning a node can
//! take minutes, so the pool keeps `min_size` nodes ready and hands them out
//! to caller-chosen groups on demand, growing up to `max_size` when the warm
//! set runs short.
//!
//! # Key Features
//!
//! - **Instant allocation** - Nodes come from the warm set; growth only on shortfall
//! - **Reuse or destroy** - Released nodes go back to the pool or are torn down and replaced
//! - **Caller metadata** - Tags, user metadata and login credentials per node,
//!   kept in memory or persisted to a blob store
//! - **Pluggable backends** - Anything implementing [`ComputeBackend`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nodepool::{InMemoryBackend, NodeOptions, NodePool, NodeTemplate, PoolConfig};
//!
//! let config = PoolConfig::new("workers", NodeTemplate::default())
//!     .min_size(2)
//!     .max_size(8);
//!
//! let pool = NodePool::new(config, Arc::new(InMemoryBackend::new()))?;
//! pool.start_pool().wait()?;
//!
//! let nodes = pool.create_nodes_in_group("ci", 2, &NodeOptions::new().tag("linux"))?;
//! pool.destroy_node(&nodes[0].id)?;
//!
//! pool.close()?;
//! # Ok::<(), nodepool::Error>(())
//! ```

pub mod backend;
pub mod blobstore;
pub mod config;
pub mod error;
pub mod growth;
pub mod models;
pub mod node_pool;
pub mod overlay;
pub mod pool;
pub mod predicates;

pub use backend::{
    BackendError, ComputeBackend, ExecResponse, InMemoryBackend, NodeFilter, RunScriptOptions,
};
pub use blobstore::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use config::{NodeTemplate, PoolConfig};
pub use error::{Error, Result};
pub use growth::GrowthHandle;
pub use models::{
    BackendNode, EntryState, Lifecycle, LoginCredentials, NodeOptions, NodeStatus, NodeView,
    PoolEntry, PoolStatus,
};
pub use node_pool::{NodePool, NodePoolBuilder};
pub use overlay::{AssignmentOverlay, MetadataOverlay, PersistedOverlay};
pub use pool::{BulkRelease, PoolCore};
