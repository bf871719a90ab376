use std::time::Duration;

use log::LevelFilter;

use ivy_rs::{NodeId, PageId, Permission, Role, BACKUP, PRIMARY};

mod common;

use crate::common::{eventually, fast_cluster, logging::setup_logger, settle};

#[test]
fn failover_preserves_ownership() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = fast_cluster(3);
    let (n1, n2, n3) = (NodeId::new(1), NodeId::new(2), NodeId::new(3));
    let page = PageId::new(5);

    // 1. Build up some ownership history: node 1 writes, node 2 reads, node 3 takes the
    //    page over.
    cluster.write(n1, page, "A").unwrap();
    cluster.read(n2, page).unwrap();
    cluster.write(n3, page, "B").unwrap();

    // 2. Let the metadata replicate, then kill the primary.
    settle(&cluster);
    cluster.kill(PRIMARY);

    // 3. Every node fails over to the backup.
    assert!(eventually(Duration::from_secs(2), || {
        cluster
            .nodes()
            .into_iter()
            .all(|node| cluster.node_camera(node).snapshot().primary == BACKUP)
    }));

    // 4. A read served by the new primary still reaches the page's owner.
    cluster.read(n1, page).unwrap();
    let reader = cluster.node_camera(n1).snapshot();
    assert_eq!(reader.access(page), Some(Permission::ReadOnly));
    assert_eq!(reader.content(page), Some("B"));
    assert!(eventually(Duration::from_secs(2), || {
        let manager = cluster.manager_camera(BACKUP).snapshot();
        manager.role == Role::Incumbent
            && manager.owner(page) == Some(n3)
            && manager.copies(page) == vec![n1]
    }));
}

#[test]
fn failing_back_moves_ownership_again() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = fast_cluster(3);
    let (n1, n2, n3) = (NodeId::new(1), NodeId::new(2), NodeId::new(3));
    let page = PageId::new(5);

    // 1. Same history as the single-failover test, then a failover to the backup.
    cluster.write(n1, page, "A").unwrap();
    cluster.read(n2, page).unwrap();
    cluster.write(n3, page, "B").unwrap();
    settle(&cluster);
    cluster.kill(PRIMARY);
    assert!(eventually(Duration::from_secs(2), || {
        cluster
            .nodes()
            .into_iter()
            .all(|node| cluster.node_camera(node).snapshot().primary == BACKUP)
    }));
    cluster.read(n1, page).unwrap();

    // 2. Bring the original primary back. It rejoins as the standby and catches up on the
    //    snapshots that queued up while it was dead.
    cluster.revive(PRIMARY);
    settle(&cluster);
    assert!(eventually(Duration::from_secs(2), || {
        let manager = cluster.manager_camera(PRIMARY).snapshot();
        manager.owner(page) == Some(n3) && manager.copies(page) == vec![n1]
    }));

    // 3. Kill the stand-in: the nodes swing back to the original primary.
    cluster.kill(BACKUP);
    assert!(eventually(Duration::from_secs(2), || {
        cluster
            .nodes()
            .into_iter()
            .all(|node| cluster.node_camera(node).snapshot().primary == PRIMARY)
    }));

    // 4. A write after the double failover invalidates the read copy and moves ownership
    //    one more time.
    cluster.write(n2, page, "C").unwrap();
    let new_owner = cluster.node_camera(n2).snapshot();
    assert_eq!(new_owner.access(page), Some(Permission::ReadWrite));
    assert_eq!(new_owner.content(page), Some("C"));
    assert!(cluster.node_camera(n1).snapshot().access(page).is_none());
    assert!(cluster.node_camera(n3).snapshot().access(page).is_none());
    assert!(eventually(Duration::from_secs(2), || {
        let manager = cluster.manager_camera(PRIMARY).snapshot();
        manager.owner(page) == Some(n2) && manager.copies(page).is_empty()
    }));
}

#[test]
fn snapshots_replicate_the_metadata() {
    setup_logger(LevelFilter::Debug);

    let cluster = fast_cluster(3);
    let (n1, n2, n3) = (NodeId::new(1), NodeId::new(2), NodeId::new(3));

    cluster.write(n1, PageId::new(1), "one").unwrap();
    cluster.write(n2, PageId::new(2), "two").unwrap();
    cluster.read(n3, PageId::new(1)).unwrap();
    cluster.read(n1, PageId::new(2)).unwrap();

    // After a few replication ticks the backup's tables are a faithful copy of the
    // primary's, and the backup knows it is not the one in charge.
    assert!(eventually(Duration::from_secs(2), || {
        let primary = cluster.manager_camera(PRIMARY).snapshot();
        let backup = cluster.manager_camera(BACKUP).snapshot();
        primary.page_owner == backup.page_owner
            && primary.page_copies == backup.page_copies
            && primary.nodes == backup.nodes
            && !primary.page_owner.is_empty()
    }));
    assert_eq!(cluster.manager_camera(BACKUP).snapshot().role, Role::Overthrown);
}

#[test]
fn revived_manager_catches_up_from_its_peer() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = fast_cluster(3);
    let (n1, n2) = (NodeId::new(1), NodeId::new(2));

    // 1. Kill the primary before any page has an owner; all the history accumulates on
    //    the backup.
    cluster.kill(PRIMARY);
    assert!(eventually(Duration::from_secs(2), || {
        cluster
            .nodes()
            .into_iter()
            .all(|node| cluster.node_camera(node).snapshot().primary == BACKUP)
    }));
    cluster.write(n1, PageId::new(3), "after the crash").unwrap();
    cluster.read(n2, PageId::new(3)).unwrap();

    // 2. The revived manager drains the snapshots that queued while it was dead and ends
    //    up with its peer's view of the world, without being contacted by any node.
    cluster.revive(PRIMARY);
    assert!(eventually(Duration::from_secs(2), || {
        let revived = cluster.manager_camera(PRIMARY).snapshot();
        let incumbent = cluster.manager_camera(BACKUP).snapshot();
        revived.role == Role::Overthrown
            && revived.page_owner == incumbent.page_owner
            && revived.page_copies == incumbent.page_copies
    }));

    // 3. Nodes still route requests to the manager they failed over to.
    assert_eq!(cluster.node_camera(n1).snapshot().primary, BACKUP);
    cluster.write(n2, PageId::new(3), "still served").unwrap();
    assert_eq!(
        cluster.node_camera(n2).snapshot().access(PageId::new(3)),
        Some(Permission::ReadWrite)
    );
}

#[test]
fn stale_death_notice_is_ignored() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = fast_cluster(3);
    let n1 = NodeId::new(1);
    let page = PageId::new(6);

    // 1. Fail over to the backup, then bring the old primary back as the standby.
    cluster.kill(PRIMARY);
    assert!(eventually(Duration::from_secs(2), || {
        cluster.node_camera(n1).snapshot().primary == BACKUP
    }));
    cluster.revive(PRIMARY);

    // 2. Killing the standby again broadcasts a death notice for a manager nobody uses as
    //    primary; every node must ignore it and keep routing to the incumbent.
    cluster.kill(PRIMARY);
    settle(&cluster);
    assert_eq!(cluster.node_camera(n1).snapshot().primary, BACKUP);

    cluster.write(n1, page, "still writable").unwrap();
    let writer = cluster.node_camera(n1).snapshot();
    assert_eq!(writer.access(page), Some(Permission::ReadWrite));
    assert_eq!(writer.content(page), Some("still writable"));

    // 3. Killing an already-dead manager is a warning, not a broadcast.
    cluster.kill(PRIMARY);
    settle(&cluster);
    assert_eq!(cluster.node_camera(n1).snapshot().primary, BACKUP);
}
