use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::LevelFilter;

use ivy_rs::{ClusterSpec, NodeId, PageId, Permission, PRIMARY};

mod common;

use crate::common::{
    assert_invariants, eventually, fast_cluster, fast_configuration, logging::setup_logger, settle,
};

#[test]
fn write_then_read_shares_the_page() {
    setup_logger(LevelFilter::Debug);

    let cluster = fast_cluster(3);
    let (n1, n2, n3) = (NodeId::new(1), NodeId::new(2), NodeId::new(3));
    let page = PageId::new(5);

    // 1. Node 1 writes the page and becomes its first owner.
    cluster.write(n1, page, "A").unwrap();
    let writer = cluster.node_camera(n1).snapshot();
    assert_eq!(writer.access(page), Some(Permission::ReadWrite));
    assert_eq!(writer.content(page), Some("A"));

    // 2. Node 2 reads the page: it receives a read-only copy of node 1's content, and the
    //    manager records it in the page's copy-set once the acknowledgement lands.
    cluster.read(n2, page).unwrap();
    let reader = cluster.node_camera(n2).snapshot();
    assert_eq!(reader.access(page), Some(Permission::ReadOnly));
    assert_eq!(reader.content(page), Some("A"));
    assert!(eventually(Duration::from_secs(2), || {
        let manager = cluster.manager_camera(PRIMARY).snapshot();
        manager.owner(page) == Some(n1) && manager.copies(page) == vec![n2]
    }));

    // 3. Node 3 writes the page: every other copy is invalidated, and ownership moves.
    cluster.write(n3, page, "B").unwrap();
    let new_owner = cluster.node_camera(n3).snapshot();
    assert_eq!(new_owner.access(page), Some(Permission::ReadWrite));
    assert_eq!(new_owner.content(page), Some("B"));
    assert!(cluster.node_camera(n1).snapshot().access(page).is_none());
    assert!(cluster.node_camera(n2).snapshot().access(page).is_none());
    assert!(eventually(Duration::from_secs(2), || {
        let manager = cluster.manager_camera(PRIMARY).snapshot();
        manager.owner(page) == Some(n3) && manager.copies(page).is_empty()
    }));
}

#[test]
fn rewriting_identical_content_stays_local() {
    setup_logger(LevelFilter::Debug);

    // Count how often the manager installs or moves an owner, to show that the repeated
    // write never reaches it.
    let installs = Arc::new(AtomicUsize::new(0));
    let transfers = Arc::new(AtomicUsize::new(0));
    let cluster = {
        let installs = installs.clone();
        let transfers = transfers.clone();
        ClusterSpec::new(fast_configuration(3))
            .on_owner_installed(move |_| {
                installs.fetch_add(1, Ordering::SeqCst);
            })
            .on_ownership_transferred(move |_| {
                transfers.fetch_add(1, Ordering::SeqCst);
            })
            .start()
    };
    let n1 = NodeId::new(1);
    let page = PageId::new(7);

    // 1. The first write installs node 1 as the page's owner.
    cluster.write(n1, page, "X").unwrap();
    assert!(eventually(Duration::from_secs(2), || {
        installs.load(Ordering::SeqCst) == 1
    }));

    // 2. Writing the same bytes again is a complete no-op.
    cluster.write(n1, page, "X").unwrap();
    settle(&cluster);
    assert_eq!(installs.load(Ordering::SeqCst), 1);
    assert_eq!(transfers.load(Ordering::SeqCst), 0);

    let writer = cluster.node_camera(n1).snapshot();
    assert_eq!(writer.access(page), Some(Permission::ReadWrite));
    assert_eq!(writer.content(page), Some("X"));
    let manager = cluster.manager_camera(PRIMARY).snapshot();
    assert_eq!(manager.owner(page), Some(n1));
    assert!(manager.copies(page).is_empty());
}

#[test]
fn reading_an_unowned_page_installs_nothing() {
    setup_logger(LevelFilter::Debug);

    let cluster = fast_cluster(3);
    let n1 = NodeId::new(1);
    let page = PageId::new(9);

    cluster.read(n1, page).unwrap();

    settle(&cluster);
    assert!(cluster.node_camera(n1).snapshot().access(page).is_none());
    assert_eq!(cluster.manager_camera(PRIMARY).snapshot().owner(page), None);

    // A write afterwards still establishes the first owner normally.
    cluster.write(n1, page, "first").unwrap();
    assert_eq!(
        cluster.node_camera(n1).snapshot().access(page),
        Some(Permission::ReadWrite)
    );
    assert!(eventually(Duration::from_secs(2), || {
        cluster.manager_camera(PRIMARY).snapshot().owner(page) == Some(n1)
    }));
}

#[test]
fn downgraded_owner_can_write_again() {
    setup_logger(LevelFilter::Debug);

    let cluster = fast_cluster(3);
    let (n1, n2) = (NodeId::new(1), NodeId::new(2));
    let page = PageId::new(4);

    // 1. Node 1 owns the page; node 2's read downgrades node 1 to a read-only copy.
    cluster.write(n1, page, "v1").unwrap();
    cluster.read(n2, page).unwrap();
    assert_eq!(
        cluster.node_camera(n1).snapshot().access(page),
        Some(Permission::ReadOnly)
    );

    // 2. Node 1 writes again. It still owns the page, so the handover must complete
    //    without the page travelling through the network back to node 1.
    cluster.write(n1, page, "v2").unwrap();
    let owner = cluster.node_camera(n1).snapshot();
    assert_eq!(owner.access(page), Some(Permission::ReadWrite));
    assert_eq!(owner.content(page), Some("v2"));
    assert!(cluster.node_camera(n2).snapshot().access(page).is_none());
    assert!(eventually(Duration::from_secs(2), || {
        let manager = cluster.manager_camera(PRIMARY).snapshot();
        manager.owner(page) == Some(n1) && manager.copies(page).is_empty()
    }));
}

#[test]
fn invariants_hold_after_a_mixed_workload() {
    setup_logger(LevelFilter::Debug);

    let cluster = fast_cluster(3);
    let pages = cluster.configuration().total_pages;

    // Every node writes its own page, reads its neighbours', and one page is fought over
    // by everyone.
    for node in cluster.nodes() {
        let own = PageId::new(node.int());
        cluster
            .write(node, own, &format!("written by {}", node))
            .unwrap();
    }
    for node in cluster.nodes() {
        for other in cluster.nodes() {
            cluster.read(node, PageId::new(other.int())).unwrap();
        }
    }
    let contested = PageId::new(8);
    for node in cluster.nodes() {
        cluster
            .write(node, contested, &format!("{} was here", node))
            .unwrap();
    }

    settle(&cluster);
    assert_invariants(&cluster, PRIMARY, pages);
}

#[test]
fn concurrent_writers_leave_a_single_owner() {
    setup_logger(LevelFilter::Debug);

    let cluster = fast_cluster(3);
    let page = PageId::new(2);

    // All three nodes hammer the same page from their own driver threads; the manager
    // serializes them.
    thread::scope(|scope| {
        for node in cluster.nodes() {
            let cluster = &cluster;
            scope.spawn(move || {
                for round in 0..5 {
                    cluster
                        .write(node, page, &format!("node {} round {}", node, round))
                        .unwrap();
                    cluster.read(node, page).unwrap();
                }
            });
        }
    });

    // Let any abandoned duplicate requests run out before judging quiescence.
    thread::sleep(Duration::from_secs(1));
    settle(&cluster);
    assert_invariants(&cluster, PRIMARY, cluster.configuration().total_pages);

    // The last write won: its owner holds the page read-write, everyone else at most
    // read-only.
    let manager = cluster.manager_camera(PRIMARY).snapshot();
    let owner = manager.owner(page).expect("the page was written");
    assert!(cluster.node_camera(owner).snapshot().access(page).is_some());
}
