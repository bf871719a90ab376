/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The node's cache state, service loop, and driver-facing read/write calls.
//!
//! ## Two threads per node
//!
//! A node's state is touched from two places: the service loop thread, which handles
//! manager directives and failover signals, and the driver thread calling
//! [`NodeHandle::read`] or [`NodeHandle::write`]. The protocol keeps at most one pending
//! local operation per node, so the two rarely contend; the mutex around [`NodeState`]
//! makes the handoff safe.
//!
//! ## Retrying across failovers
//!
//! A request that is in flight when the primary manager is killed is lost: nobody replays
//! it on the backup. The read/write calls therefore wait for each reply under a deadline
//! and re-send the request to the *current* primary when the deadline passes, which by then
//! is the swapped-in backup. Only when every attempt is exhausted does the call fail with
//! [`RequestError::OwnerUnreachable`].

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crate::events::{
    Event, InvalidatedEvent, PageReadEvent, PageWrittenEvent, PrimarySwappedEvent,
    ReadCachedEvent, RequestTimedOutEvent,
};
use crate::failover::FailoverSignal;
use crate::messages::{
    Directive, Invalidate, InvalidateAck, ReadAck, ReadForward, ReadPage, ReadRequest,
    Response, WriteAck, WriteForward, WritePage, WriteRequest,
};
use crate::networking::{Network, ResponseReceiveError, ResponseStub, SenderHandle};
use crate::types::{ManagerId, NodeId, PageId, Peer, Permission};

/// Errors surfaced by the driver-facing read and write calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// Every attempt at the request timed out: no reachable manager completed it.
    OwnerUnreachable,
}

/// A node's local view of the shared memory. Shared between the node's service loop, its
/// [`NodeHandle`], and any [`NodeCamera`].
pub(crate) struct NodeState {
    pub(crate) access: HashMap<PageId, Permission>,
    pub(crate) content: HashMap<PageId, String>,
    pub(crate) pending_write: String,
    pub(crate) primary: ManagerId,
    pub(crate) backup: ManagerId,
}

impl NodeState {
    pub(crate) fn new(primary: ManagerId, backup: ManagerId) -> NodeState {
        NodeState {
            access: HashMap::new(),
            content: HashMap::new(),
            pending_write: String::new(),
            primary,
            backup,
        }
    }
}

/// The service half of a node: dispatches manager directives and failover signals.
pub(crate) struct NodeService<N: Network> {
    id: NodeId,
    state: Arc<Mutex<NodeState>>,
    directives: Receiver<Directive>,
    failover_signals: Receiver<FailoverSignal>,
    loopback: Sender<Response>,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network> NodeService<N> {
    pub(crate) fn new(
        id: NodeId,
        state: Arc<Mutex<NodeState>>,
        directives: Receiver<Directive>,
        failover_signals: Receiver<FailoverSignal>,
        loopback: Sender<Response>,
        network: N,
        event_publisher: Option<Sender<Event>>,
    ) -> NodeService<N> {
        NodeService {
            id,
            state,
            directives,
            failover_signals,
            loopback,
            sender: SenderHandle::new(network),
            event_publisher,
        }
    }

    pub(crate) fn start(self, shutdown_signal: Receiver<()>) -> JoinHandle<()> {
        thread::spawn(move || {
            let node = self;
            loop {
                match shutdown_signal.try_recv() {
                    Ok(()) => return,
                    Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => {
                        panic!("node {} disconnected from its controller", node.id)
                    }
                }

                match node.failover_signals.try_recv() {
                    Ok(signal) => node.handle_failover(signal),
                    Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => {
                        panic!("node {} lost its failover inbox", node.id)
                    }
                }

                match node.directives.try_recv() {
                    Ok(Directive::ReadForward(directive)) => node.handle_read_forward(directive),
                    Ok(Directive::WriteForward(directive)) => node.handle_write_forward(directive),
                    Ok(Directive::Invalidate(directive)) => node.handle_invalidate(directive),
                    Err(TryRecvError::Empty) => thread::yield_now(),
                    Err(TryRecvError::Disconnected) => {
                        panic!("node {} lost its directive inbox", node.id)
                    }
                }
            }
        })
    }

    /// Forward a read copy to the requester, downgrading a read-write copy to read-only.
    fn handle_read_forward(&self, directive: ReadForward) {
        let ReadForward { requester, page } = directive;
        let content = {
            let mut state = self.state.lock().unwrap();
            if state.access.get(&page) == Some(&Permission::ReadWrite) {
                state.access.insert(page, Permission::ReadOnly);
            }
            match state.content.get(&page) {
                Some(content) => content.clone(),
                None => {
                    log::warn!(
                        "node {} asked to forward page {} it no longer caches",
                        self.id,
                        page
                    );
                    String::new()
                }
            }
        };
        log::debug!(
            "node {} forwarding page {} to node {} for reading",
            self.id,
            page,
            requester
        );
        self.sender.send(
            Peer::Node(requester),
            ReadPage {
                sender: self.id,
                requester,
                page,
                content,
            },
        );
    }

    /// Hand the page over to the requester and drop the local copy. When the requester is
    /// this node itself (it owned the page read-only and wrote it again), the page must not
    /// travel through the network back to its own sender: the handover is completed through
    /// the node's own response inbox, where the pending write call is blocked.
    fn handle_write_forward(&self, directive: WriteForward) {
        let WriteForward { requester, page } = directive;

        if requester == self.id {
            let content = {
                let state = self.state.lock().unwrap();
                state.content.get(&page).cloned().unwrap_or_default()
            };
            log::debug!(
                "node {} handing page {} over to itself, skipping the network",
                self.id,
                page
            );
            let _ = self.loopback.send(Response::WritePage(WritePage {
                sender: self.id,
                requester,
                page,
                content,
            }));
            return;
        }

        let content = {
            let mut state = self.state.lock().unwrap();
            state.access.remove(&page);
            state.content.get(&page).cloned().unwrap_or_default()
        };
        log::debug!(
            "node {} handing page {} over to node {}",
            self.id,
            page,
            requester
        );
        self.sender.send(
            Peer::Node(requester),
            WritePage {
                sender: self.id,
                requester,
                page,
                content,
            },
        );
    }

    /// Drop the local copy and acknowledge. A copy that is already gone (a failed-over
    /// manager may re-send invalidations it cannot know were already served) is
    /// acknowledged all the same.
    fn handle_invalidate(&self, directive: Invalidate) {
        let Invalidate { requester, page } = directive;
        let (had_copy, primary) = {
            let mut state = self.state.lock().unwrap();
            (state.access.remove(&page).is_some(), state.primary)
        };
        if had_copy {
            Event::Invalidated(InvalidatedEvent {
                timestamp: SystemTime::now(),
                node: self.id,
                page,
            })
            .publish(&self.event_publisher);
        }
        self.sender.send(
            Peer::Manager(primary),
            InvalidateAck {
                sender: self.id,
                requester,
                page,
            },
        );
    }

    /// Swap primary and backup. The signal names the dead manager; a node whose primary is
    /// already someone else has nothing to do, which makes redundant signals harmless.
    fn handle_failover(&self, signal: FailoverSignal) {
        let mut state = self.state.lock().unwrap();
        if state.primary != signal.dead {
            log::debug!(
                "node {} ignoring stale death notice for manager {}",
                self.id,
                signal.dead
            );
            return;
        }
        let old_primary = state.primary;
        state.primary = state.backup;
        state.backup = old_primary;
        let new_primary = state.primary;
        drop(state);
        log::info!(
            "node {} accepted manager {} as its new primary",
            self.id,
            new_primary
        );
        Event::PrimarySwapped(PrimarySwappedEvent {
            timestamp: SystemTime::now(),
            node: self.id,
            new_primary,
        })
        .publish(&self.event_publisher);
    }
}

/// The driver half of a node: the read and write entry points.
pub struct NodeHandle<N: Network> {
    id: NodeId,
    state: Arc<Mutex<NodeState>>,
    responses: ResponseStub,
    sender: SenderHandle<N>,
    request_timeout: Duration,
    max_request_attempts: u32,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network> NodeHandle<N> {
    pub(crate) fn new(
        id: NodeId,
        state: Arc<Mutex<NodeState>>,
        responses: Receiver<Response>,
        network: N,
        request_timeout: Duration,
        max_request_attempts: u32,
        event_publisher: Option<Sender<Event>>,
    ) -> NodeHandle<N> {
        NodeHandle {
            id,
            state,
            responses: ResponseStub::new(responses),
            sender: SenderHandle::new(network),
            request_timeout,
            max_request_attempts,
            event_publisher,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Read a page. A locally cached copy (of either permission) is served without
    /// contacting the manager; otherwise a read request is sent to the current primary and
    /// the call blocks until the copy is installed, the manager reports the page has no
    /// owner yet, or every attempt times out.
    pub fn read(&self, page: PageId) -> Result<(), RequestError> {
        {
            let state = self.state.lock().unwrap();
            if state.access.contains_key(&page) {
                let content = state.content.get(&page).cloned().unwrap_or_default();
                drop(state);
                log::debug!(
                    "node {} read page {} from its cache: {}",
                    self.id,
                    page,
                    content
                );
                Event::ReadCached(ReadCachedEvent {
                    timestamp: SystemTime::now(),
                    node: self.id,
                    page,
                })
                .publish(&self.event_publisher);
                return Ok(());
            }
        }

        for attempt in 1..=self.max_request_attempts {
            self.responses.drain();
            let primary = self.state.lock().unwrap().primary;
            self.sender.send(
                Peer::Manager(primary),
                ReadRequest {
                    requester: self.id,
                    page,
                },
            );

            let deadline = Instant::now() + self.request_timeout;
            let matches = |response: &Response| match response {
                Response::ReadOwnerNil(response) => response.page == page,
                Response::ReadPage(response) => response.page == page,
                _ => false,
            };
            match self.responses.recv_matching(deadline, matches) {
                Ok(Response::ReadOwnerNil(_)) => {
                    log::debug!("node {}: page {} has no owner yet", self.id, page);
                    self.send_read_ack(primary, page);
                    return Ok(());
                }
                Ok(Response::ReadPage(response)) => {
                    {
                        let mut state = self.state.lock().unwrap();
                        state.access.insert(page, Permission::ReadOnly);
                        state.content.insert(page, response.content.clone());
                    }
                    log::debug!(
                        "node {} installed page {} from node {}: {}",
                        self.id,
                        page,
                        response.sender,
                        response.content
                    );
                    Event::PageRead(PageReadEvent {
                        timestamp: SystemTime::now(),
                        node: self.id,
                        page,
                        content: response.content,
                    })
                    .publish(&self.event_publisher);
                    self.send_read_ack(primary, page);
                    return Ok(());
                }
                Ok(_) => unreachable!("response stub only returns matching replies"),
                Err(ResponseReceiveError::Timeout) => self.note_timeout(page, attempt),
                Err(ResponseReceiveError::Disconnected) => {
                    panic!("node {} lost its response inbox", self.id)
                }
            }
        }

        Err(RequestError::OwnerUnreachable)
    }

    /// Write a page. Holding the page read-write makes this a local operation: identical
    /// content is a complete no-op, and new content is installed without contacting the
    /// manager. Otherwise the intended content is parked in the node's scratch slot, a
    /// write request is sent to the current primary, and the call blocks until ownership
    /// arrives or every attempt times out.
    pub fn write(&self, page: PageId, content: &str) -> Result<(), RequestError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.access.get(&page) == Some(&Permission::ReadWrite) {
                if state.content.get(&page).map(String::as_str) == Some(content) {
                    log::debug!(
                        "node {}: page {} already holds this content",
                        self.id,
                        page
                    );
                    return Ok(());
                }
                state.content.insert(page, content.to_string());
                drop(state);
                log::debug!("node {} wrote its own page {}: {}", self.id, page, content);
                Event::PageWritten(PageWrittenEvent {
                    timestamp: SystemTime::now(),
                    node: self.id,
                    page,
                    content: content.to_string(),
                })
                .publish(&self.event_publisher);
                return Ok(());
            }
            state.pending_write = content.to_string();
        }

        for attempt in 1..=self.max_request_attempts {
            self.responses.drain();
            let primary = self.state.lock().unwrap().primary;
            self.sender.send(
                Peer::Manager(primary),
                WriteRequest {
                    requester: self.id,
                    page,
                },
            );

            let deadline = Instant::now() + self.request_timeout;
            let matches = |response: &Response| match response {
                Response::WriteOwnerNil(response) => response.page == page,
                Response::WritePage(response) => response.page == page,
                _ => false,
            };
            match self.responses.recv_matching(deadline, matches) {
                Ok(Response::WriteOwnerNil(_)) => {
                    log::debug!(
                        "node {} became the first owner of page {}",
                        self.id,
                        page
                    );
                    self.install_pending_write(page);
                    self.send_write_ack(primary, page);
                    return Ok(());
                }
                Ok(Response::WritePage(response)) => {
                    // The previous owner's copy rides along with the handover; the pending
                    // write supersedes it.
                    log::debug!(
                        "node {} took page {} over from node {}, superseding: {}",
                        self.id,
                        page,
                        response.sender,
                        response.content
                    );
                    self.install_pending_write(page);
                    self.send_write_ack(primary, page);
                    return Ok(());
                }
                Ok(_) => unreachable!("response stub only returns matching replies"),
                Err(ResponseReceiveError::Timeout) => self.note_timeout(page, attempt),
                Err(ResponseReceiveError::Disconnected) => {
                    panic!("node {} lost its response inbox", self.id)
                }
            }
        }

        Err(RequestError::OwnerUnreachable)
    }

    fn install_pending_write(&self, page: PageId) {
        let content = {
            let mut state = self.state.lock().unwrap();
            let content = state.pending_write.clone();
            state.access.insert(page, Permission::ReadWrite);
            state.content.insert(page, content.clone());
            content
        };
        log::debug!("node {} wrote page {}: {}", self.id, page, content);
        Event::PageWritten(PageWrittenEvent {
            timestamp: SystemTime::now(),
            node: self.id,
            page,
            content,
        })
        .publish(&self.event_publisher);
    }

    fn send_read_ack(&self, manager: ManagerId, page: PageId) {
        self.sender.send(
            Peer::Manager(manager),
            ReadAck {
                sender: self.id,
                requester: self.id,
                page,
            },
        );
    }

    fn send_write_ack(&self, manager: ManagerId, page: PageId) {
        self.sender.send(
            Peer::Manager(manager),
            WriteAck {
                sender: self.id,
                requester: self.id,
                page,
            },
        );
    }

    fn note_timeout(&self, page: PageId, attempt: u32) {
        log::warn!(
            "node {}: request for page {} timed out (attempt {} of {})",
            self.id,
            page,
            attempt,
            self.max_request_attempts
        );
        Event::RequestTimedOut(RequestTimedOutEvent {
            timestamp: SystemTime::now(),
            node: self.id,
            page,
            attempt,
        })
        .publish(&self.event_publisher);
    }
}

/// Read-only view of a node's cache state.
pub struct NodeCamera {
    id: NodeId,
    state: Arc<Mutex<NodeState>>,
}

impl NodeCamera {
    pub(crate) fn new(id: NodeId, state: Arc<Mutex<NodeState>>) -> NodeCamera {
        NodeCamera { id, state }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let state = self.state.lock().unwrap();
        NodeSnapshot {
            access: state.access.clone(),
            content: state.content.clone(),
            primary: state.primary,
            backup: state.backup,
        }
    }
}

/// A point-in-time copy of a node's cache state.
#[derive(Clone, Debug)]
pub struct NodeSnapshot {
    pub access: HashMap<PageId, Permission>,
    pub content: HashMap<PageId, String>,
    pub primary: ManagerId,
    pub backup: ManagerId,
}

impl NodeSnapshot {
    /// The node's permission on `page`, if it holds a valid copy.
    pub fn access(&self, page: PageId) -> Option<Permission> {
        self.access.get(&page).copied()
    }

    /// The node's cached content for `page`. Meaningful only while
    /// [`access`](Self::access) is present.
    pub fn content(&self, page: PageId) -> Option<&str> {
        self.content.get(&page).map(String::as_str)
    }
}
