//! Data models

mod entry;
mod metadata;
mod node;

pub use entry::*;
pub use metadata::*;
pub use node::*;
