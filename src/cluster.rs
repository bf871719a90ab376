/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that build and keep alive a simulated cluster, as well as the driver-facing
//! operations on it.
//!
//! A [`Cluster`] owns every long-lived entity of the simulation: a fixed set of worker
//! nodes, the two central managers, the in-process network connecting them, and the
//! optional event bus. Entities address each other exclusively by id through the network;
//! the cluster is the only place where the id tables live.
//!
//! ## Driver API
//!
//! Benchmarks and tests drive the cluster with five operations:
//! [`read`](Cluster::read), [`write`](Cluster::write), [`kill`](Cluster::kill),
//! [`revive`](Cluster::revive), and [`print_state`](Cluster::print_state). State cameras
//! ([`node_camera`](Cluster::node_camera), [`manager_camera`](Cluster::manager_camera))
//! expose point-in-time snapshots for assertions.
//!
//! ## Building
//!
//! [`Cluster::start`] builds a cluster with no user-defined event handlers. To register
//! handlers, build through a [`ClusterSpec`]:
//!
//! ```ignore
//! let cluster = ClusterSpec::new(Configuration::default())
//!     .on_page_written(|event| println!("{} wrote page {}", event.node, event.page))
//!     .start();
//! ```

use std::fmt::Write as _;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::event_bus::{start_event_bus, EventHandlers, HandlerPtr};
use crate::events::{
    InvalidatedEvent, OwnerInstalledEvent, OwnershipTransferredEvent, PageReadEvent,
    PageWrittenEvent, PrimarySwappedEvent, ReadCachedEvent, RequestTimedOutEvent,
    RoleChangedEvent, SnapshotAppliedEvent,
};
use crate::failover::{FailoverSignal, ManagerHandle};
use crate::manager::protocol::{CentralManager, ManagerState};
use crate::manager::ManagerCamera;
use crate::networking::SimNetwork;
use crate::node::protocol::{NodeHandle, NodeService, NodeState};
use crate::node::{NodeCamera, RequestError};
use crate::types::{ManagerId, NodeId, PageId, Role};

/// The manager that nodes contact first after startup.
pub const PRIMARY: ManagerId = ManagerId::new(0);

/// The manager that starts out holding the replicated metadata in reserve.
pub const BACKUP: ManagerId = ManagerId::new(1);

/// Timing and sizing constants for a cluster. Kept as a value passed to
/// [`Cluster::start`] rather than as process-wide globals, so tests can vary them freely.
#[derive(Clone, Debug)]
pub struct Configuration {
    /// Number of worker nodes, fixed for the lifetime of the cluster.
    pub total_nodes: u32,
    /// Number of distinct pages the bundled benchmark workloads cycle through.
    pub total_pages: u32,
    /// How often an incumbent manager pushes its metadata to the peer.
    pub replication_interval: Duration,
    /// Upper bound on the uniform random delay injected into every message.
    pub max_network_delay: Duration,
    /// How long a node waits for the reply to one request attempt.
    pub request_timeout: Duration,
    /// How many times a node re-sends a request before giving up.
    pub max_request_attempts: u32,
    /// How long a manager waits for the acknowledgements of the request it is serving.
    pub ack_timeout: Duration,
    /// Install the default logging event handlers.
    pub log_events: bool,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder {
            configuration: Configuration::default(),
        }
    }
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration {
            total_nodes: 3,
            total_pages: 10,
            replication_interval: Duration::from_millis(100),
            max_network_delay: Duration::from_millis(50),
            request_timeout: Duration::from_secs(5),
            max_request_attempts: 3,
            ack_timeout: Duration::from_secs(5),
            log_events: false,
        }
    }
}

pub struct ConfigurationBuilder {
    configuration: Configuration,
}

impl ConfigurationBuilder {
    pub fn total_nodes(mut self, total_nodes: u32) -> Self {
        self.configuration.total_nodes = total_nodes;
        self
    }

    pub fn total_pages(mut self, total_pages: u32) -> Self {
        self.configuration.total_pages = total_pages;
        self
    }

    pub fn replication_interval(mut self, replication_interval: Duration) -> Self {
        self.configuration.replication_interval = replication_interval;
        self
    }

    pub fn max_network_delay(mut self, max_network_delay: Duration) -> Self {
        self.configuration.max_network_delay = max_network_delay;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.configuration.request_timeout = request_timeout;
        self
    }

    pub fn max_request_attempts(mut self, max_request_attempts: u32) -> Self {
        self.configuration.max_request_attempts = max_request_attempts;
        self
    }

    pub fn ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.configuration.ack_timeout = ack_timeout;
        self
    }

    pub fn log_events(mut self, log_events: bool) -> Self {
        self.configuration.log_events = log_events;
        self
    }

    pub fn build(self) -> Configuration {
        self.configuration
    }
}

/// Specification of a cluster: its configuration plus optional user-defined handlers for
/// each event type.
pub struct ClusterSpec {
    configuration: Configuration,
    on_read_cached: Option<HandlerPtr<ReadCachedEvent>>,
    on_page_read: Option<HandlerPtr<PageReadEvent>>,
    on_page_written: Option<HandlerPtr<PageWrittenEvent>>,
    on_invalidated: Option<HandlerPtr<InvalidatedEvent>>,
    on_primary_swapped: Option<HandlerPtr<PrimarySwappedEvent>>,
    on_request_timed_out: Option<HandlerPtr<RequestTimedOutEvent>>,
    on_owner_installed: Option<HandlerPtr<OwnerInstalledEvent>>,
    on_ownership_transferred: Option<HandlerPtr<OwnershipTransferredEvent>>,
    on_snapshot_applied: Option<HandlerPtr<SnapshotAppliedEvent>>,
    on_role_changed: Option<HandlerPtr<RoleChangedEvent>>,
}

impl ClusterSpec {
    pub fn new(configuration: Configuration) -> ClusterSpec {
        ClusterSpec {
            configuration,
            on_read_cached: None,
            on_page_read: None,
            on_page_written: None,
            on_invalidated: None,
            on_primary_swapped: None,
            on_request_timed_out: None,
            on_owner_installed: None,
            on_ownership_transferred: None,
            on_snapshot_applied: None,
            on_role_changed: None,
        }
    }

    pub fn on_read_cached(mut self, handler: impl Fn(&ReadCachedEvent) + Send + 'static) -> Self {
        self.on_read_cached = Some(Box::new(handler));
        self
    }

    pub fn on_page_read(mut self, handler: impl Fn(&PageReadEvent) + Send + 'static) -> Self {
        self.on_page_read = Some(Box::new(handler));
        self
    }

    pub fn on_page_written(
        mut self,
        handler: impl Fn(&PageWrittenEvent) + Send + 'static,
    ) -> Self {
        self.on_page_written = Some(Box::new(handler));
        self
    }

    pub fn on_invalidated(mut self, handler: impl Fn(&InvalidatedEvent) + Send + 'static) -> Self {
        self.on_invalidated = Some(Box::new(handler));
        self
    }

    pub fn on_primary_swapped(
        mut self,
        handler: impl Fn(&PrimarySwappedEvent) + Send + 'static,
    ) -> Self {
        self.on_primary_swapped = Some(Box::new(handler));
        self
    }

    pub fn on_request_timed_out(
        mut self,
        handler: impl Fn(&RequestTimedOutEvent) + Send + 'static,
    ) -> Self {
        self.on_request_timed_out = Some(Box::new(handler));
        self
    }

    pub fn on_owner_installed(
        mut self,
        handler: impl Fn(&OwnerInstalledEvent) + Send + 'static,
    ) -> Self {
        self.on_owner_installed = Some(Box::new(handler));
        self
    }

    pub fn on_ownership_transferred(
        mut self,
        handler: impl Fn(&OwnershipTransferredEvent) + Send + 'static,
    ) -> Self {
        self.on_ownership_transferred = Some(Box::new(handler));
        self
    }

    pub fn on_snapshot_applied(
        mut self,
        handler: impl Fn(&SnapshotAppliedEvent) + Send + 'static,
    ) -> Self {
        self.on_snapshot_applied = Some(Box::new(handler));
        self
    }

    pub fn on_role_changed(mut self, handler: impl Fn(&RoleChangedEvent) + Send + 'static) -> Self {
        self.on_role_changed = Some(Box::new(handler));
        self
    }

    /// Wire up the network, spawn every service thread, and hand back the running cluster.
    pub fn start(self) -> Cluster {
        let configuration = self.configuration;
        assert!(configuration.total_nodes > 0, "a cluster needs at least one node");

        let node_ids: Vec<NodeId> = (1..=configuration.total_nodes).map(NodeId::new).collect();
        let manager_ids = [PRIMARY, BACKUP];

        let (network, mut node_inboxes, mut manager_inboxes) = SimNetwork::new(
            &node_ids,
            &manager_ids,
            configuration.max_network_delay,
        );

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_read_cached,
            self.on_page_read,
            self.on_page_written,
            self.on_invalidated,
            self.on_primary_swapped,
            self.on_request_timed_out,
            self.on_owner_installed,
            self.on_ownership_transferred,
            self.on_snapshot_applied,
            self.on_role_changed,
        );
        let (event_publisher, event_bus) = if event_handlers.is_empty() {
            (None, None)
        } else {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (shutdown, shutdown_receiver) = mpsc::channel();
            let bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
            (Some(event_publisher), Some((bus, shutdown)))
        };

        let mut managers = Vec::new();
        for (id, peer, role) in [
            (PRIMARY, BACKUP, Role::Incumbent),
            (BACKUP, PRIMARY, Role::Overthrown),
        ] {
            let state = Arc::new(Mutex::new(ManagerState::new(role, node_ids.clone())));
            let manager = CentralManager::new(
                id,
                state.clone(),
                manager_inboxes.remove(&id).expect("manager inboxes were just wired"),
                network.clone(),
                configuration.ack_timeout,
                event_publisher.clone(),
            );
            managers.push(ManagerHandle::start(
                id,
                peer,
                state,
                manager,
                network.clone(),
                configuration.replication_interval,
            ));
        }

        let mut nodes = Vec::new();
        for id in &node_ids {
            let inboxes = node_inboxes.remove(id).expect("node inboxes were just wired");
            let state = Arc::new(Mutex::new(NodeState::new(PRIMARY, BACKUP)));
            let (failover_sender, failover_signals) = mpsc::channel();
            let (shutdown, shutdown_receiver) = mpsc::channel();
            let service = NodeService::new(
                *id,
                state.clone(),
                inboxes.directives,
                failover_signals,
                inboxes.loopback,
                network.clone(),
                event_publisher.clone(),
            )
            .start(shutdown_receiver);
            let handle = NodeHandle::new(
                *id,
                state.clone(),
                inboxes.responses,
                network.clone(),
                configuration.request_timeout,
                configuration.max_request_attempts,
                event_publisher.clone(),
            );
            nodes.push(ClusterNode {
                handle,
                camera: NodeCamera::new(*id, state),
                service: Some((service, shutdown)),
                failover: failover_sender,
            });
        }

        log::info!(
            "cluster up: {} nodes, manager {} primary, manager {} backup",
            configuration.total_nodes,
            PRIMARY,
            BACKUP
        );

        Cluster {
            configuration,
            nodes,
            managers,
            event_bus,
        }
    }
}

struct ClusterNode {
    handle: NodeHandle<SimNetwork>,
    camera: NodeCamera,
    service: Option<(JoinHandle<()>, Sender<()>)>,
    failover: Sender<FailoverSignal>,
}

/// A running simulated cluster. Dropping the cluster shuts every thread down.
pub struct Cluster {
    configuration: Configuration,
    nodes: Vec<ClusterNode>,
    managers: Vec<ManagerHandle<SimNetwork>>,
    event_bus: Option<(JoinHandle<()>, Sender<()>)>,
}

impl Cluster {
    /// Start a cluster with no user-defined event handlers.
    pub fn start(configuration: Configuration) -> Cluster {
        ClusterSpec::new(configuration).start()
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// The ids of all worker nodes, in ascending order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|node| node.handle.id()).collect()
    }

    /// Read a page at the given node. See [`NodeHandle::read`].
    pub fn read(&self, node: NodeId, page: PageId) -> Result<(), RequestError> {
        self.cluster_node(node).handle.read(page)
    }

    /// Write a page at the given node. See [`NodeHandle::write`].
    pub fn write(&self, node: NodeId, page: PageId, content: &str) -> Result<(), RequestError> {
        self.cluster_node(node).handle.write(page, content)
    }

    /// Kill a manager: halt its threads, then tell every node to fail over to the other
    /// manager. A no-op (with a warning) if the manager is already dead.
    pub fn kill(&mut self, manager: ManagerId) {
        let handle = self.manager_handle_mut(manager);
        if !handle.is_running() {
            log::warn!("manager {} is already dead", manager);
            return;
        }
        handle.halt();
        log::info!("manager {} killed; notifying every node", manager);
        for node in &self.nodes {
            let _ = node.failover.send(FailoverSignal { dead: manager });
        }
    }

    /// Revive a killed manager: respawn its service loop and replication thread. Queued
    /// snapshots from the incumbent are applied before any new request is taken. A no-op
    /// (with a warning) if the manager is already running.
    pub fn revive(&mut self, manager: ManagerId) {
        let handle = self.manager_handle_mut(manager);
        if handle.is_running() {
            log::warn!("manager {} is already running", manager);
            return;
        }
        handle.restart();
        log::info!("manager {} revived", manager);
    }

    /// Render a manager's metadata tables, together with each owner's actual access, into
    /// a printable dump.
    pub fn format_state(&self, manager: ManagerId) -> String {
        let snapshot = self.manager_camera(manager).snapshot();
        let mut out = String::new();
        let _ = writeln!(out, "central manager {} ({})", manager, snapshot.role);
        for (page, owner) in &snapshot.page_owner {
            let access = match self.node_camera(*owner).snapshot().access(*page) {
                Some(permission) => permission.to_string(),
                None => String::from("absent"),
            };
            let copies: Vec<String> = snapshot
                .copies(*page)
                .iter()
                .map(|node| node.to_string())
                .collect();
            let _ = writeln!(
                out,
                "> page {}: owner {} ({}), copies [{}]",
                page,
                owner,
                access,
                copies.join(", ")
            );
        }
        out
    }

    /// Dump a manager's metadata tables to stdout.
    pub fn print_state(&self, manager: ManagerId) {
        print!("{}", self.format_state(manager));
    }

    pub fn node_camera(&self, node: NodeId) -> &NodeCamera {
        &self.cluster_node(node).camera
    }

    pub fn manager_camera(&self, manager: ManagerId) -> ManagerCamera {
        self.manager_handle(manager).camera()
    }

    fn cluster_node(&self, node: NodeId) -> &ClusterNode {
        self.nodes
            .iter()
            .find(|candidate| candidate.handle.id() == node)
            .unwrap_or_else(|| panic!("unknown node {}", node))
    }

    fn manager_handle(&self, manager: ManagerId) -> &ManagerHandle<SimNetwork> {
        self.managers
            .iter()
            .find(|candidate| candidate.id() == manager)
            .unwrap_or_else(|| panic!("unknown manager {}", manager))
    }

    fn manager_handle_mut(&mut self, manager: ManagerId) -> &mut ManagerHandle<SimNetwork> {
        self.managers
            .iter_mut()
            .find(|candidate| candidate.id() == manager)
            .unwrap_or_else(|| panic!("unknown manager {}", manager))
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        // Managers first: their loops may still be waiting on acknowledgements that the
        // node threads deliver. The event bus goes last, after every publisher has gone
        // quiet.
        for manager in &mut self.managers {
            manager.halt();
        }
        for node in &mut self.nodes {
            if let Some((service, shutdown)) = node.service.take() {
                let _ = shutdown.send(());
                let _ = service.join();
            }
        }
        if let Some((bus, shutdown)) = self.event_bus.take() {
            let _ = shutdown.send(());
            let _ = bus.join();
        }
    }
}
