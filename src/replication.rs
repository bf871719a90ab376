/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The periodic metadata push from the incumbent manager to its peer.
//!
//! Every manager runs one replication thread alongside its service loop. On each tick the
//! thread checks the manager's role: an incumbent snapshots its metadata tables and pushes
//! them to the peer; an overthrown manager does nothing and waits for snapshots to flow
//! the other way.
//!
//! Replication is best effort. A snapshot taken while the service loop is in the middle of
//! a write reflects the tables as of the last committed request, so after a failover the
//! new incumbent may re-issue invalidations that were already served; nodes acknowledge
//! those regardless.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::manager::protocol::ManagerState;
use crate::networking::Network;
use crate::types::{ManagerId, Role};

pub(crate) fn start_replicator<N: Network>(
    id: ManagerId,
    peer: ManagerId,
    state: Arc<Mutex<ManagerState>>,
    network: N,
    interval: Duration,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("replicator for manager {} disconnected from its controller", id)
            }
        }

        let snapshot = {
            let state = state.lock().unwrap();
            if state.role == Role::Incumbent {
                Some(state.snapshot(id))
            } else {
                None
            }
        };
        match snapshot {
            Some(snapshot) => {
                log::trace!("manager {} pushing metadata to manager {}", id, peer);
                network.send_snapshot(peer, snapshot);
            }
            None => log::trace!("manager {} waiting for metadata from manager {}", id, peer),
        }

        thread::sleep(interval);
    })
}
