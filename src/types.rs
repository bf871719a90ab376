/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types shared by every part of the crate: identifiers for pages, nodes, and
//! central managers, the page access permissions, and the manager role.
//!
//! These types follow the newtype pattern. They are sent around and inspected, but have no
//! active behavior of their own.

use std::fmt::{self, Display, Formatter};

/// Identifier of a worker node. Nodes are numbered starting from 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Identifier of a central manager. A cluster runs exactly two managers, numbered 0 and 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManagerId(u32);

impl ManagerId {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for ManagerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Identifier of an addressable unit of shared memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(u32);

impl PageId {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for PageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The permission a node holds on a locally cached page. A node with no entry for a page
/// holds no valid copy at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Display for Permission {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Permission::ReadOnly => write!(f, "READONLY"),
            Permission::ReadWrite => write!(f, "READWRITE"),
        }
    }
}

/// A central manager's view of whether it is the manager that nodes currently contact.
///
/// An overthrown manager becomes incumbent again the moment a node request reaches it; an
/// incumbent becomes overthrown when it is killed or when it receives a metadata snapshot
/// from its peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Incumbent,
    Overthrown,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Role::Incumbent => write!(f, "INCUMBENT"),
            Role::Overthrown => write!(f, "OVERTHROWN"),
        }
    }
}

/// Address of a protocol participant, used to route messages through the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Peer {
    Node(NodeId),
    Manager(ManagerId),
}

impl Display for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Node(id) => write!(f, "node {}", id),
            Peer::Manager(id) => write!(f, "manager {}", id),
        }
    }
}
