/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The central manager: the serialization point of the coherence protocol.
//!
//! A central manager tracks, for every page that has ever been written, the node that owns
//! it and the set of nodes holding read copies. Its service loop handles one node request
//! end-to-end before accepting the next, which is what turns the per-page invalidation
//! scheme into a sequentially consistent memory.
//!
//! A cluster runs two managers. The incumbent serves requests and periodically pushes its
//! metadata to the peer through the [replication](crate::replication) task; the peer holds
//! the metadata in reserve and takes over the moment nodes start contacting it after a
//! failover.

pub mod protocol;

pub use protocol::{ManagerCamera, ManagerSnapshot};
