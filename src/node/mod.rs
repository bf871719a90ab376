/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A worker node: the holder of a local page cache and the origin of reads and writes.
//!
//! Each node runs a service loop on its own thread, handling the directives its primary
//! manager sends it (forward a page, hand a page over, drop a copy) and the failover
//! signals the driver broadcasts when a manager dies. The driver-facing
//! [`read`](protocol::NodeHandle::read) and [`write`](protocol::NodeHandle::write) calls
//! run on the caller's thread and block on the node's response inbox while a request is in
//! flight.

pub mod protocol;

pub use protocol::{NodeCamera, NodeSnapshot, RequestError};
