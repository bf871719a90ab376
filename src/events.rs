/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Notifications that are emitted when significant things happen in the cluster.
//!
//! Each variant of the [event enum](Event) contains an inner struct type summarizing the
//! particular kind of occurrence, always including a timestamp of when it happened. Events
//! are emitted **after** the corresponding occurrence completed: for example,
//! [`PageWrittenEvent`] is only published once the new content is installed in the node's
//! cache.
//!
//! Library users can register handler closures for each event type when building a cluster;
//! the [event bus](crate::event_bus) thread calls them as events arrive. Default handlers
//! that log events through the [log](https://docs.rs/log) facade can be enabled in the
//! cluster [configuration](crate::cluster::Configuration).

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::types::{ManagerId, NodeId, PageId, Role};

/// Enumerates all events defined for the cluster.
pub enum Event {
    // Events emitted by nodes.
    ReadCached(ReadCachedEvent),
    PageRead(PageReadEvent),
    PageWritten(PageWrittenEvent),
    Invalidated(InvalidatedEvent),
    PrimarySwapped(PrimarySwappedEvent),
    RequestTimedOut(RequestTimedOutEvent),

    // Events emitted by managers.
    OwnerInstalled(OwnerInstalledEvent),
    OwnershipTransferred(OwnershipTransferredEvent),
    SnapshotApplied(SnapshotAppliedEvent),
    RoleChanged(RoleChangedEvent),
}

impl Event {
    /// Publishes this event on the event publisher channel (if the channel is defined).
    pub fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// A node served a read from its local cache without contacting the manager.
pub struct ReadCachedEvent {
    pub timestamp: SystemTime,
    pub node: NodeId,
    pub page: PageId,
}

/// A node obtained a read-only copy of a page.
pub struct PageReadEvent {
    pub timestamp: SystemTime,
    pub node: NodeId,
    pub page: PageId,
    pub content: String,
}

/// A node installed new content for a page it holds read-write.
pub struct PageWrittenEvent {
    pub timestamp: SystemTime,
    pub node: NodeId,
    pub page: PageId,
    pub content: String,
}

/// A node dropped its copy of a page because another node is about to write it.
pub struct InvalidatedEvent {
    pub timestamp: SystemTime,
    pub node: NodeId,
    pub page: PageId,
}

/// A node was told its primary manager died and now routes requests to what was its backup.
pub struct PrimarySwappedEvent {
    pub timestamp: SystemTime,
    pub node: NodeId,
    pub new_primary: ManagerId,
}

/// A node's pending request was not answered before its deadline; the request will be
/// retried against the current primary, if any attempts remain.
pub struct RequestTimedOutEvent {
    pub timestamp: SystemTime,
    pub node: NodeId,
    pub page: PageId,
    pub attempt: u32,
}

/// A manager recorded the first owner of a page.
pub struct OwnerInstalledEvent {
    pub timestamp: SystemTime,
    pub manager: ManagerId,
    pub page: PageId,
    pub owner: NodeId,
}

/// A manager moved ownership of a page from one node to another after invalidating every
/// read copy.
pub struct OwnershipTransferredEvent {
    pub timestamp: SystemTime,
    pub manager: ManagerId,
    pub page: PageId,
    pub from: NodeId,
    pub to: NodeId,
    pub invalidated: usize,
}

/// A manager replaced its metadata tables with a snapshot received from its peer.
pub struct SnapshotAppliedEvent {
    pub timestamp: SystemTime,
    pub manager: ManagerId,
    pub sender: ManagerId,
    pub pages: usize,
}

/// A manager's view of whether it is the one nodes contact changed.
pub struct RoleChangedEvent {
    pub timestamp: SystemTime,
    pub manager: ManagerId,
    pub role: Role,
}
