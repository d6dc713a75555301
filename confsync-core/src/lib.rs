//! ConfSync Core - Replicated configuration tree and protocol
//!
//! This crate provides the foundational components for ConfSync:
//! - Hierarchical section/option configuration tree with comments
//! - Versioned store with atomic apply and on-disk backups
//! - Master/slave replication protocol over framed TCP
//! - Client edit sessions and the slave refresh loop

pub mod backup;
pub mod client;
pub mod codec;
pub mod diff;
pub mod error;
pub mod modificator;
pub mod net;
pub mod protocol;
pub mod refresher;
pub mod service;
pub mod settings;
pub mod store;
pub mod tree;

pub use backup::*;
pub use client::*;
pub use codec::*;
pub use diff::*;
pub use error::*;
pub use modificator::*;
pub use net::*;
pub use protocol::*;
pub use refresher::*;
pub use service::*;
pub use settings::*;
pub use store::*;
pub use tree::*;
