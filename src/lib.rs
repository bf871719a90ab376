/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A fault-tolerant variant of the Ivy sequential-consistency protocol over a simulated
//! cluster of worker nodes.
//!
//! Each node holds a local cache of pages. A central manager serializes page ownership and
//! invalidation so that reads see a consistent value and writes are globally ordered. Fault
//! tolerance comes from running two managers, a primary and a backup, with asynchronous
//! metadata replication between them and client-driven failover: when the primary dies,
//! every node swaps its primary and backup references and the protocol resumes on what was
//! the backup.
//!
//! The entry point is [`Cluster::start`] (or [`ClusterSpec`] to register event handlers),
//! which wires up the in-process network, spawns a service thread per entity, and exposes
//! the driver operations: `read`, `write`, `kill`, `revive`, and `print_state`.

pub mod cluster;

pub mod events;

pub mod failover;

pub mod manager;

pub mod messages;

pub mod networking;

pub mod node;

pub mod types;

pub(crate) mod event_bus;

pub(crate) mod logging;

pub(crate) mod replication;

// Re-exports
pub use cluster::{Cluster, ClusterSpec, Configuration, ConfigurationBuilder, BACKUP, PRIMARY};
pub use manager::{ManagerCamera, ManagerSnapshot};
pub use node::{NodeCamera, NodeSnapshot, RequestError};
pub use types::{ManagerId, NodeId, PageId, Peer, Permission, Role};
