//! Hierarchical configuration document
//!
//! This module provides the order-preserving section/option tree that is
//! the unit of replication:
//! - Ordered sections and string-valued options with comments
//! - Per-node committer annotation
//! - Structural mutation (create/delete/rename/copy)
//! - Non-destructive merge with argument-wins precedence
//! - Byte-exact text serialization round trip
//! - Slash-path resolution and typed value accessors

pub mod format;
pub mod node;
pub mod values;

pub use node::*;
pub use values::*;
