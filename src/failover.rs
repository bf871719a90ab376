/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Crash and revive signalling for managers, and the thread lifecycle that backs it.
//!
//! Killing a manager halts its service loop and replication thread; the manager value
//! itself (with all of its inbox ends) is parked inside its [`ManagerHandle`] so that a
//! later revive can respawn both threads. While a manager is parked, messages sent to it
//! simply queue in its inboxes; the service loop drains queued snapshots first thing after
//! a revive.
//!
//! The counterpart signal to the nodes is [`FailoverSignal`]: the driver broadcasts it
//! after every kill, and each node that still considered the dead manager its primary
//! swaps its primary and backup references.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::manager::protocol::{CentralManager, ManagerCamera, ManagerState};
use crate::networking::Network;
use crate::replication::start_replicator;
use crate::types::ManagerId;

/// Broadcast to every node when a manager is killed. `dead` names the manager being taken
/// out; a node swaps its primary and backup only when its primary matches, which makes
/// delivering the signal to an already-swapped node a no-op.
#[derive(Clone, Copy, Debug)]
pub struct FailoverSignal {
    pub dead: ManagerId,
}

/// Owns one manager's threads and its parked value between a kill and a revive.
pub(crate) struct ManagerHandle<N: Network> {
    id: ManagerId,
    peer: ManagerId,
    state: Arc<Mutex<ManagerState>>,
    network: N,
    replication_interval: Duration,
    service: Option<(JoinHandle<CentralManager<N>>, Sender<()>)>,
    replicator: Option<(JoinHandle<()>, Sender<()>)>,
    // Behind a mutex only so the handle (and with it the whole cluster) stays shareable
    // across driver threads; halting and restarting still require exclusive access.
    parked: Mutex<Option<CentralManager<N>>>,
}

impl<N: Network> ManagerHandle<N> {
    /// Take ownership of a freshly built manager and start its service loop and
    /// replication thread.
    pub(crate) fn start(
        id: ManagerId,
        peer: ManagerId,
        state: Arc<Mutex<ManagerState>>,
        manager: CentralManager<N>,
        network: N,
        replication_interval: Duration,
    ) -> ManagerHandle<N> {
        let mut handle = ManagerHandle {
            id,
            peer,
            state,
            network,
            replication_interval,
            service: None,
            replicator: None,
            parked: Mutex::new(Some(manager)),
        };
        handle.restart();
        handle
    }

    pub(crate) fn id(&self) -> ManagerId {
        self.id
    }

    pub(crate) fn is_running(&self) -> bool {
        self.service.is_some()
    }

    pub(crate) fn camera(&self) -> ManagerCamera {
        ManagerCamera::new(self.id, self.state.clone())
    }

    /// Terminate the service loop and the replication thread, parking the manager for a
    /// later revive. Waits for the loop to finish the request it is on. A no-op if the
    /// manager is already halted.
    pub(crate) fn halt(&mut self) {
        if let Some((service, shutdown)) = self.service.take() {
            shutdown
                .send(())
                .expect("manager service loop hung up before its shutdown signal");
            let manager = service
                .join()
                .expect("manager service loop panicked");
            *self.parked.lock().unwrap() = Some(manager);
        }
        if let Some((replicator, shutdown)) = self.replicator.take() {
            shutdown
                .send(())
                .expect("replicator hung up before its shutdown signal");
            replicator.join().expect("replicator panicked");
        }
    }

    /// (Re)spawn the service loop and the replication thread from the parked manager. A
    /// no-op if the manager is already running.
    pub(crate) fn restart(&mut self) {
        if let Some(manager) = self.parked.lock().unwrap().take() {
            let (service_shutdown, service_shutdown_receiver) = mpsc::channel();
            let service = manager.start(service_shutdown_receiver);
            self.service = Some((service, service_shutdown));

            let (replicator_shutdown, replicator_shutdown_receiver) = mpsc::channel();
            let replicator = start_replicator(
                self.id,
                self.peer,
                self.state.clone(),
                self.network.clone(),
                self.replication_interval,
                replicator_shutdown_receiver,
            );
            self.replicator = Some((replicator, replicator_shutdown));
        }
    }
}
