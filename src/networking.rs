/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for the message transport between nodes and managers, the
//! in-process implementation used by the simulator, and the receiving stubs the protocol
//! threads block on.
//!
//! ## Routing
//!
//! Every node owns two inboxes (`directives`, `responses`) and every manager owns three
//! (`requests`, `acks`, `snapshots`). The message's own type determines the inbox it is
//! delivered to, so a sender only ever names the peer, never a channel.
//!
//! ## Delay simulation
//!
//! [`SimNetwork`] delivers each coherence message from a courier job on a thread pool that
//! first sleeps for a uniform random duration in `[0, max_delay)`. This exercises message
//! interleavings without ever blocking the sending thread. Metadata snapshots bypass the
//! couriers and are delivered directly, so the snapshot inbox stays FIFO across all
//! in-flight snapshots.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use threadpool::ThreadPool;

use crate::messages::{Ack, Directive, Message, MetaMessage, Request, Response};
use crate::types::{ManagerId, NodeId, Peer};

pub trait Network: Clone + Send + 'static {
    /// Send a message to the given peer without blocking the caller.
    fn send(&self, peer: Peer, message: Message);

    /// Push a metadata snapshot to the given manager without blocking the caller.
    /// Snapshots are delivered in FIFO order.
    fn send_snapshot(&self, manager: ManagerId, snapshot: MetaMessage);
}

/// Handle for sending messages of any type that converts [`Into<Message>`].
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<M: Into<Message>>(&self, peer: Peer, message: M) {
        self.network.send(peer, message.into())
    }
}

/// The inbound channel ends owned by one node.
pub(crate) struct NodeInboxes {
    pub(crate) directives: Receiver<Directive>,
    pub(crate) responses: Receiver<Response>,
    /// Sending end of the node's own `responses` inbox. The service loop uses it to
    /// complete a pending local call when the reply must not travel through the network
    /// (a page handover whose requester is the handing-over node itself).
    pub(crate) loopback: Sender<Response>,
}

/// The inbound channel ends owned by one manager.
pub(crate) struct ManagerInboxes {
    pub(crate) requests: Receiver<Request>,
    pub(crate) acks: Receiver<Ack>,
    pub(crate) snapshots: Receiver<MetaMessage>,
}

struct Routes {
    node_directives: HashMap<NodeId, Sender<Directive>>,
    node_responses: HashMap<NodeId, Sender<Response>>,
    manager_requests: HashMap<ManagerId, Sender<Request>>,
    manager_acks: HashMap<ManagerId, Sender<Ack>>,
    manager_snapshots: HashMap<ManagerId, Sender<MetaMessage>>,
}

/// An in-process network connecting a fixed set of nodes and managers, with a bounded
/// uniform random delay injected into every coherence message.
#[derive(Clone)]
pub struct SimNetwork {
    routes: Arc<Routes>,
    couriers: ThreadPool,
    max_delay: Duration,
}

impl SimNetwork {
    /// Wire up a network for the given peers. Returns the network together with the inbox
    /// ends each peer's threads will consume from.
    pub(crate) fn new(
        nodes: &[NodeId],
        managers: &[ManagerId],
        max_delay: Duration,
    ) -> (
        SimNetwork,
        HashMap<NodeId, NodeInboxes>,
        HashMap<ManagerId, ManagerInboxes>,
    ) {
        let mut routes = Routes {
            node_directives: HashMap::new(),
            node_responses: HashMap::new(),
            manager_requests: HashMap::new(),
            manager_acks: HashMap::new(),
            manager_snapshots: HashMap::new(),
        };

        let mut node_inboxes = HashMap::new();
        for node in nodes {
            let (directive_sender, directives) = mpsc::channel();
            let (response_sender, responses) = mpsc::channel();
            routes.node_directives.insert(*node, directive_sender);
            routes.node_responses.insert(*node, response_sender.clone());
            node_inboxes.insert(
                *node,
                NodeInboxes {
                    directives,
                    responses,
                    loopback: response_sender,
                },
            );
        }

        let mut manager_inboxes = HashMap::new();
        for manager in managers {
            let (request_sender, requests) = mpsc::channel();
            let (ack_sender, acks) = mpsc::channel();
            let (snapshot_sender, snapshots) = mpsc::channel();
            routes.manager_requests.insert(*manager, request_sender);
            routes.manager_acks.insert(*manager, ack_sender);
            routes.manager_snapshots.insert(*manager, snapshot_sender);
            manager_inboxes.insert(
                *manager,
                ManagerInboxes {
                    requests,
                    acks,
                    snapshots,
                },
            );
        }

        let couriers = ThreadPool::new((nodes.len() + managers.len()).max(4) * 2);
        let network = SimNetwork {
            routes: Arc::new(routes),
            couriers,
            max_delay,
        };
        (network, node_inboxes, manager_inboxes)
    }

    /// Hand the value to a courier that sleeps for a random delay before delivering it.
    /// A closed inbox is not an error: the receiving entity may have been torn down.
    fn deliver<T: Send + 'static>(&self, inbox: &Sender<T>, value: T) {
        let inbox = inbox.clone();
        let delay = self.random_delay();
        self.couriers.execute(move || {
            thread::sleep(delay);
            let _ = inbox.send(value);
        });
    }

    fn random_delay(&self) -> Duration {
        let max = self.max_delay.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max))
    }
}

impl Network for SimNetwork {
    fn send(&self, peer: Peer, message: Message) {
        match (peer, message) {
            (Peer::Manager(manager), Message::Request(request)) => {
                let inbox = self
                    .routes
                    .manager_requests
                    .get(&manager)
                    .unwrap_or_else(|| panic!("unknown manager {}", manager));
                self.deliver(inbox, request);
            }
            (Peer::Manager(manager), Message::Ack(ack)) => {
                let inbox = self
                    .routes
                    .manager_acks
                    .get(&manager)
                    .unwrap_or_else(|| panic!("unknown manager {}", manager));
                self.deliver(inbox, ack);
            }
            (Peer::Node(node), Message::Directive(directive)) => {
                let inbox = self
                    .routes
                    .node_directives
                    .get(&node)
                    .unwrap_or_else(|| panic!("unknown node {}", node));
                self.deliver(inbox, directive);
            }
            (Peer::Node(node), Message::Response(response)) => {
                let inbox = self
                    .routes
                    .node_responses
                    .get(&node)
                    .unwrap_or_else(|| panic!("unknown node {}", node));
                self.deliver(inbox, response);
            }
            (peer, _) => panic!("misaddressed message for {}", peer),
        }
    }

    fn send_snapshot(&self, manager: ManagerId, snapshot: MetaMessage) {
        let inbox = self
            .routes
            .manager_snapshots
            .get(&manager)
            .unwrap_or_else(|| panic!("unknown manager {}", manager));
        let _ = inbox.send(snapshot);
    }
}

/// A receiving end for acknowledgements at a manager. Waits for an acknowledgement the
/// current request is blocked on, dropping any stray acknowledgement that arrives in the
/// window.
pub(crate) struct AckStub {
    acks: Receiver<Ack>,
}

impl AckStub {
    pub(crate) fn new(acks: Receiver<Ack>) -> AckStub {
        AckStub { acks }
    }

    /// Receive an acknowledgement for which `matches` returns true, waiting until the
    /// deadline is reached.
    pub(crate) fn recv_matching(
        &self,
        deadline: Instant,
        matches: impl Fn(&Ack) -> bool,
    ) -> Result<Ack, AckReceiveError> {
        while Instant::now() < deadline {
            let window = deadline.saturating_duration_since(Instant::now());
            match self.acks.recv_timeout(window) {
                Ok(ack) if matches(&ack) => return Ok(ack),
                Ok(ack) => {
                    log::warn!(
                        "dropping stray {} for page {} from node {}",
                        ack.kind(),
                        ack.page(),
                        ack.sender()
                    );
                }
                Err(RecvTimeoutError::Timeout) => thread::yield_now(),
                Err(RecvTimeoutError::Disconnected) => return Err(AckReceiveError::Disconnected),
            }
        }

        Err(AckReceiveError::Timeout)
    }
}

#[derive(Debug)]
pub(crate) enum AckReceiveError {
    Timeout,
    Disconnected,
}

/// A receiving end for the replies that complete a node's pending read or write call.
///
/// The inbox is behind a mutex so the owning handle can be shared across driver threads;
/// the protocol itself never has more than one pending call per node.
pub(crate) struct ResponseStub {
    responses: Mutex<Receiver<Response>>,
}

impl ResponseStub {
    pub(crate) fn new(responses: Receiver<Response>) -> ResponseStub {
        ResponseStub {
            responses: Mutex::new(responses),
        }
    }

    /// Drop any replies left over from an abandoned attempt.
    pub(crate) fn drain(&self) {
        let responses = self.responses.lock().unwrap();
        while responses.try_recv().is_ok() {}
    }

    /// Receive a reply for which `matches` returns true, waiting until the deadline is
    /// reached. Stray replies arriving in the window are dropped.
    pub(crate) fn recv_matching(
        &self,
        deadline: Instant,
        matches: impl Fn(&Response) -> bool,
    ) -> Result<Response, ResponseReceiveError> {
        let responses = self.responses.lock().unwrap();
        while Instant::now() < deadline {
            let window = deadline.saturating_duration_since(Instant::now());
            match responses.recv_timeout(window) {
                Ok(response) if matches(&response) => return Ok(response),
                Ok(response) => {
                    log::warn!(
                        "dropping stray {} for page {}",
                        response.kind(),
                        response.page()
                    );
                }
                Err(RecvTimeoutError::Timeout) => thread::yield_now(),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ResponseReceiveError::Disconnected)
                }
            }
        }

        Err(ResponseReceiveError::Timeout)
    }
}

#[derive(Debug)]
pub(crate) enum ResponseReceiveError {
    Timeout,
    Disconnected,
}
