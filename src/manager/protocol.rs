/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The central manager's state and service loop.
//!
//! ## Serialization
//!
//! The service loop handles one request end-to-end before accepting the next. Within one
//! request the manager may block on acknowledgements from several nodes: a read blocks on
//! the requester's acknowledgement, and a write with a non-empty copy-set blocks until
//! *every* holder has acknowledged invalidation before the page is forwarded to the
//! requester.
//!
//! All acknowledgement waits carry a deadline. A request whose acknowledgements never
//! arrive (for example because the driver killed this manager's counterpart node flow
//! mid-request) is abandoned with a warning rather than wedging the loop; the requesting
//! node re-issues against the current primary.
//!
//! ## Role
//!
//! Receiving a node request makes the manager consider itself incumbent. Receiving a
//! metadata snapshot from the peer, or a shutdown signal, makes it consider itself
//! overthrown. The service loop drains queued snapshots before taking the next request, so
//! a freshly revived manager catches up on everything its peer pushed while it was down.

use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use indexmap::{IndexMap, IndexSet};

use crate::events::{
    Event, OwnerInstalledEvent, OwnershipTransferredEvent, RoleChangedEvent,
    SnapshotAppliedEvent,
};
use crate::messages::{
    Ack, Invalidate, MetaMessage, ReadForward, ReadOwnerNil, ReadRequest, Request,
    WriteForward, WriteOwnerNil, WriteRequest,
};
use crate::networking::{AckReceiveError, AckStub, ManagerInboxes, Network, SenderHandle};
use crate::types::{ManagerId, NodeId, PageId, Peer, Role};

/// Protocol metadata owned by one central manager. Shared between the manager's service
/// loop, its replication task, and any [`ManagerCamera`].
pub(crate) struct ManagerState {
    pub(crate) role: Role,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) page_owner: IndexMap<PageId, NodeId>,
    pub(crate) page_copies: IndexMap<PageId, IndexSet<NodeId>>,
}

impl ManagerState {
    pub(crate) fn new(role: Role, nodes: Vec<NodeId>) -> ManagerState {
        ManagerState {
            role,
            nodes,
            page_owner: IndexMap::new(),
            page_copies: IndexMap::new(),
        }
    }

    /// Build the metadata snapshot pushed to the peer manager.
    pub(crate) fn snapshot(&self, sender: ManagerId) -> MetaMessage {
        MetaMessage {
            sender,
            nodes: self.nodes.clone(),
            page_owner: self.page_owner.clone(),
            page_copies: self.page_copies.clone(),
        }
    }

    /// Record `owner` as the single holder of `page`, clearing the copy-set.
    fn install_owner(&mut self, page: PageId, owner: NodeId) {
        self.page_owner.insert(page, owner);
        self.page_copies.entry(page).or_default().clear();
    }

    /// Record that `reader` holds a read copy of `page`.
    fn commit_copy(&mut self, page: PageId, reader: NodeId) {
        debug_assert!(
            self.page_owner.get(&page) != Some(&reader),
            "owner of page {} cannot join its own copy-set",
            page
        );
        self.page_copies.entry(page).or_default().insert(reader);
    }
}

/// One central manager. [`start`](CentralManager::start) consumes the manager and runs its
/// service loop on a dedicated thread; a shutdown signal makes the loop return the manager
/// back out of the thread, so a later revive can respawn it with all of its channels intact.
pub(crate) struct CentralManager<N: Network> {
    id: ManagerId,
    state: Arc<Mutex<ManagerState>>,
    requests: Receiver<Request>,
    acks: AckStub,
    snapshots: Receiver<MetaMessage>,
    sender: SenderHandle<N>,
    ack_timeout: Duration,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network> CentralManager<N> {
    pub(crate) fn new(
        id: ManagerId,
        state: Arc<Mutex<ManagerState>>,
        inboxes: ManagerInboxes,
        network: N,
        ack_timeout: Duration,
        event_publisher: Option<Sender<Event>>,
    ) -> CentralManager<N> {
        CentralManager {
            id,
            state,
            requests: inboxes.requests,
            acks: AckStub::new(inboxes.acks),
            snapshots: inboxes.snapshots,
            sender: SenderHandle::new(network),
            ack_timeout,
            event_publisher,
        }
    }

    /// Start the service loop. It runs until a shutdown signal arrives, at which point the
    /// manager marks itself overthrown and returns itself out of the thread.
    pub(crate) fn start(self, shutdown_signal: Receiver<()>) -> JoinHandle<CentralManager<N>> {
        thread::spawn(move || {
            let manager = self;
            loop {
                match shutdown_signal.try_recv() {
                    Ok(()) => {
                        manager.set_role(Role::Overthrown);
                        return manager;
                    }
                    Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => {
                        panic!("manager {} disconnected from its controller", manager.id)
                    }
                }

                // Catch up on everything the peer pushed, before taking new work.
                while let Ok(snapshot) = manager.snapshots.try_recv() {
                    manager.apply_snapshot(snapshot);
                }

                match manager.requests.try_recv() {
                    Ok(request) => {
                        manager.set_role(Role::Incumbent);
                        log::debug!(
                            "manager {} took a {} of page {} from node {}",
                            manager.id,
                            match request {
                                Request::Read(_) => "read",
                                Request::Write(_) => "write",
                            },
                            request.page(),
                            request.requester()
                        );
                        match request {
                            Request::Read(request) => manager.handle_read_request(request),
                            Request::Write(request) => manager.handle_write_request(request),
                        }
                    }
                    Err(TryRecvError::Empty) => thread::yield_now(),
                    Err(TryRecvError::Disconnected) => {
                        panic!("manager {} lost its request inbox", manager.id)
                    }
                }
            }
        })
    }

    fn handle_read_request(&self, request: ReadRequest) {
        let ReadRequest { requester, page } = request;

        let owner = self.state.lock().unwrap().page_owner.get(&page).copied();
        let owner = match owner {
            Some(owner) => owner,
            None => {
                self.sender
                    .send(Peer::Node(requester), ReadOwnerNil { requester, page });
                self.await_read_ack(requester, page);
                return;
            }
        };

        self.sender
            .send(Peer::Node(owner), ReadForward { requester, page });
        if self.await_read_ack(requester, page) {
            self.state.lock().unwrap().commit_copy(page, requester);
        }
    }

    fn handle_write_request(&self, request: WriteRequest) {
        let WriteRequest { requester, page } = request;

        let (owner, copies) = {
            let state = self.state.lock().unwrap();
            (
                state.page_owner.get(&page).copied(),
                state.page_copies.get(&page).cloned().unwrap_or_default(),
            )
        };

        let owner = match owner {
            Some(owner) => owner,
            None => {
                self.state.lock().unwrap().install_owner(page, requester);
                Event::OwnerInstalled(OwnerInstalledEvent {
                    timestamp: SystemTime::now(),
                    manager: self.id,
                    page,
                    owner: requester,
                })
                .publish(&self.event_publisher);
                self.sender
                    .send(Peer::Node(requester), WriteOwnerNil { requester, page });
                self.await_write_ack(requester, page);
                return;
            }
        };

        // Every read copy must be gone before the page moves: the new owner has to be the
        // only node left holding it.
        for holder in copies.iter() {
            self.sender
                .send(Peer::Node(*holder), Invalidate { requester, page });
        }
        if !self.await_invalidate_acks(page, copies.len()) {
            return;
        }

        self.sender
            .send(Peer::Node(owner), WriteForward { requester, page });
        if self.await_write_ack(requester, page) {
            self.state.lock().unwrap().install_owner(page, requester);
            Event::OwnershipTransferred(OwnershipTransferredEvent {
                timestamp: SystemTime::now(),
                manager: self.id,
                page,
                from: owner,
                to: requester,
                invalidated: copies.len(),
            })
            .publish(&self.event_publisher);
        }
    }

    fn await_read_ack(&self, requester: NodeId, page: PageId) -> bool {
        let deadline = Instant::now() + self.ack_timeout;
        let matches = |ack: &Ack| {
            matches!(ack, Ack::Read(ack) if ack.sender == requester && ack.page == page)
        };
        match self.acks.recv_matching(deadline, matches) {
            Ok(_) => true,
            Err(AckReceiveError::Timeout) => {
                log::warn!(
                    "manager {} abandoned a read of page {} for node {}: no acknowledgement",
                    self.id,
                    page,
                    requester
                );
                false
            }
            Err(AckReceiveError::Disconnected) => {
                panic!("manager {} lost its acknowledgement inbox", self.id)
            }
        }
    }

    fn await_write_ack(&self, requester: NodeId, page: PageId) -> bool {
        let deadline = Instant::now() + self.ack_timeout;
        let matches = |ack: &Ack| {
            matches!(ack, Ack::Write(ack) if ack.sender == requester && ack.page == page)
        };
        match self.acks.recv_matching(deadline, matches) {
            Ok(_) => true,
            Err(AckReceiveError::Timeout) => {
                log::warn!(
                    "manager {} abandoned a write of page {} for node {}: no acknowledgement",
                    self.id,
                    page,
                    requester
                );
                false
            }
            Err(AckReceiveError::Disconnected) => {
                panic!("manager {} lost its acknowledgement inbox", self.id)
            }
        }
    }

    /// Wait for `expected` invalidation acknowledgements for `page`, in any order.
    fn await_invalidate_acks(&self, page: PageId, expected: usize) -> bool {
        let deadline = Instant::now() + self.ack_timeout;
        for received in 0..expected {
            let matches = |ack: &Ack| matches!(ack, Ack::Invalidate(ack) if ack.page == page);
            match self.acks.recv_matching(deadline, matches) {
                Ok(_) => (),
                Err(AckReceiveError::Timeout) => {
                    log::warn!(
                        "manager {} abandoned a write of page {}: {} of {} invalidation acknowledgements outstanding",
                        self.id,
                        page,
                        expected - received,
                        expected
                    );
                    return false;
                }
                Err(AckReceiveError::Disconnected) => {
                    panic!("manager {} lost its acknowledgement inbox", self.id)
                }
            }
        }
        true
    }

    /// Replace the local metadata tables wholesale with the peer's snapshot. The peer is
    /// incumbent, so this manager is not.
    fn apply_snapshot(&self, snapshot: MetaMessage) {
        let MetaMessage {
            sender,
            nodes,
            page_owner,
            page_copies,
        } = snapshot;
        let pages = page_owner.len();
        {
            let mut state = self.state.lock().unwrap();
            state.nodes = nodes;
            state.page_owner = page_owner;
            state.page_copies = page_copies;
        }
        self.set_role(Role::Overthrown);
        log::trace!(
            "manager {} synced {} pages from incumbent manager {}",
            self.id,
            pages,
            sender
        );
        Event::SnapshotApplied(SnapshotAppliedEvent {
            timestamp: SystemTime::now(),
            manager: self.id,
            sender,
            pages,
        })
        .publish(&self.event_publisher);
    }

    fn set_role(&self, role: Role) {
        let mut state = self.state.lock().unwrap();
        if state.role == role {
            return;
        }
        state.role = role;
        drop(state);
        Event::RoleChanged(RoleChangedEvent {
            timestamp: SystemTime::now(),
            manager: self.id,
            role,
        })
        .publish(&self.event_publisher);
    }
}

/// Read-only view of a manager's protocol metadata. Cameras can be held and queried at any
/// time, including while the manager is dead.
pub struct ManagerCamera {
    id: ManagerId,
    state: Arc<Mutex<ManagerState>>,
}

impl ManagerCamera {
    pub(crate) fn new(id: ManagerId, state: Arc<Mutex<ManagerState>>) -> ManagerCamera {
        ManagerCamera { id, state }
    }

    pub fn id(&self) -> ManagerId {
        self.id
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        let state = self.state.lock().unwrap();
        ManagerSnapshot {
            role: state.role,
            nodes: state.nodes.clone(),
            page_owner: state.page_owner.clone(),
            page_copies: state.page_copies.clone(),
        }
    }
}

/// A point-in-time copy of a manager's protocol metadata.
#[derive(Clone, Debug)]
pub struct ManagerSnapshot {
    pub role: Role,
    pub nodes: Vec<NodeId>,
    pub page_owner: IndexMap<PageId, NodeId>,
    pub page_copies: IndexMap<PageId, IndexSet<NodeId>>,
}

impl ManagerSnapshot {
    /// The owner of `page`, if the page has ever been written.
    pub fn owner(&self, page: PageId) -> Option<NodeId> {
        self.page_owner.get(&page).copied()
    }

    /// The nodes holding a read copy of `page`, excluding the owner.
    pub fn copies(&self, page: PageId) -> Vec<NodeId> {
        self.page_copies
            .get(&page)
            .map(|copies| copies.iter().copied().collect())
            .unwrap_or_default()
    }
}
