#![allow(dead_code)]

pub(crate) mod logging;

use std::thread;
use std::time::{Duration, Instant};

use ivy_rs::{Cluster, Configuration, NodeId, PageId, Permission};

/// A configuration with short timing constants, so tests converge quickly and a genuinely
/// lost request fails fast instead of hanging the suite.
pub(crate) fn fast_configuration(total_nodes: u32) -> Configuration {
    Configuration::builder()
        .total_nodes(total_nodes)
        .max_network_delay(Duration::from_millis(5))
        .replication_interval(Duration::from_millis(20))
        .request_timeout(Duration::from_millis(500))
        .max_request_attempts(4)
        .ack_timeout(Duration::from_millis(500))
        .build()
}

pub(crate) fn fast_cluster(total_nodes: u32) -> Cluster {
    Cluster::start(fast_configuration(total_nodes))
}

/// Poll `condition` until it holds or the timeout passes.
pub(crate) fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Give in-flight acknowledgements and a few replication ticks time to land.
pub(crate) fn settle(cluster: &Cluster) {
    thread::sleep(cluster.configuration().replication_interval * 5);
}

/// Check the coherence invariants on the given manager's metadata against the actual node
/// caches, for every page in the given range.
pub(crate) fn assert_invariants(cluster: &Cluster, manager: ivy_rs::ManagerId, pages: u32) {
    let snapshot = cluster.manager_camera(manager).snapshot();

    for page in (1..=pages).map(PageId::new) {
        let owner = snapshot.owner(page);
        let copies = snapshot.copies(page);

        match owner {
            Some(owner) => {
                // The owner always holds a valid copy.
                let owner_view = cluster.node_camera(owner).snapshot();
                assert!(
                    owner_view.access(page).is_some(),
                    "page {}: owner {} holds no copy",
                    page,
                    owner
                );

                // The owner never appears in its own copy-set, and the copy-set holds no
                // duplicates.
                assert!(
                    !copies.contains(&owner),
                    "page {}: owner {} is in the copy-set",
                    page,
                    owner
                );
                let mut deduplicated = copies.clone();
                deduplicated.sort();
                deduplicated.dedup();
                assert_eq!(
                    deduplicated.len(),
                    copies.len(),
                    "page {}: duplicate entries in the copy-set",
                    page
                );

                // Every copy holder has a read-only copy with the owner's content.
                for holder in &copies {
                    let holder_view = cluster.node_camera(*holder).snapshot();
                    assert_eq!(
                        holder_view.access(page),
                        Some(Permission::ReadOnly),
                        "page {}: copy holder {} does not hold it read-only",
                        page,
                        holder
                    );
                    assert_eq!(
                        holder_view.content(page),
                        owner_view.content(page),
                        "page {}: copy holder {} disagrees with owner {}",
                        page,
                        holder,
                        owner
                    );
                }
            }
            None => {
                // A page that has never been written is cached nowhere.
                for node in cluster.nodes() {
                    assert!(
                        cluster.node_camera(node).snapshot().access(page).is_none(),
                        "page {}: node {} caches a page that has no owner",
                        page,
                        node
                    );
                }
            }
        }

        // At most one node holds the page read-write.
        let writers: Vec<NodeId> = cluster
            .nodes()
            .into_iter()
            .filter(|node| {
                cluster.node_camera(*node).snapshot().access(page) == Some(Permission::ReadWrite)
            })
            .collect();
        assert!(
            writers.len() <= 1,
            "page {}: multiple read-write holders: {:?}",
            page,
            writers
        );
    }
}
