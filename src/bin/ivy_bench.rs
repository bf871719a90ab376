/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Interactive benchmark driver for the simulated cluster.
//!
//! Presents a character menu on stdin. Each scenario drives the same read/write workload
//! over the cluster while injecting a different sequence of manager faults, then dumps the
//! final state of both managers and the wall-clock time taken.

use std::io::{self, BufRead};
use std::thread;
use std::time::{Duration, Instant};

use log::LevelFilter;

use ivy_rs::{Cluster, Configuration, NodeId, PageId, BACKUP, PRIMARY};

fn main() {
    setup_logger(LevelFilter::Info);

    let configuration = Configuration::builder().log_events(true).build();
    let mut cluster = Cluster::start(configuration);

    banner("FAULT TOLERANT IVY PROTOCOL");
    println!(
        "The network has {} nodes and 2 central managers; manager 0 is primary and manager 1 is backup.",
        cluster.configuration().total_nodes
    );
    println!();
    println!("Type 1 and hit ENTER to run the fault-free baseline benchmark");
    println!("or 2 to kill the primary manager mid-benchmark");
    println!("or 3 to kill and restart the primary manager mid-benchmark");
    println!("or 4 to inject multiple primary manager faults");
    println!("or 5 to inject multiple faults on both managers");
    println!("or EXIT to quit.");
    println!();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        match line.trim() {
            "1" => {
                banner("BASELINE FAULT FREE BENCHMARK");
                let started = Instant::now();
                read_own_pages(&cluster);
                write_own_pages(&cluster);
                read_next_pages(&cluster);
                write_next_pages(&cluster);
                conclude(&cluster, started);
                break;
            }
            "2" => {
                banner("PRIMARY MANAGER FAULT (DEAD) BENCHMARK");
                let started = Instant::now();
                read_own_pages(&cluster);
                write_own_pages(&cluster);
                banner("KILLING PRIMARY MANAGER");
                cluster.kill(PRIMARY);
                thread::sleep(SETTLE);
                read_next_pages(&cluster);
                write_next_pages(&cluster);
                conclude(&cluster, started);
                break;
            }
            "3" => {
                banner("PRIMARY MANAGER FAULT (DEAD AND RESTART) BENCHMARK");
                let started = Instant::now();
                read_own_pages(&cluster);
                write_own_pages(&cluster);
                fail_over_and_back(&mut cluster);
                read_next_pages(&cluster);
                write_next_pages(&cluster);
                conclude(&cluster, started);
                break;
            }
            "4" => {
                banner("MULTIPLE PRIMARY MANAGER FAULT (DEAD AND RESTART) BENCHMARK");
                let started = Instant::now();
                read_own_pages(&cluster);
                write_own_pages(&cluster);
                fail_over_and_back(&mut cluster);
                read_next_pages(&cluster);
                banner("KILLING PRIMARY MANAGER AGAIN");
                cluster.kill(PRIMARY);
                thread::sleep(SETTLE);
                cluster.revive(PRIMARY);
                write_next_pages(&cluster);
                conclude(&cluster, started);
                break;
            }
            "5" => {
                banner("MULTIPLE PRIMARY AND BACKUP MANAGER FAULT BENCHMARK");
                let started = Instant::now();
                read_own_pages(&cluster);
                write_own_pages(&cluster);
                fail_over_and_back(&mut cluster);
                read_next_pages(&cluster);
                fail_over_and_back(&mut cluster);
                write_next_pages(&cluster);
                conclude(&cluster, started);
                break;
            }
            "EXIT" => break,
            other => println!("unrecognized input: {}", other),
        }
    }
}

/// Pause between fault injections, long enough for a replication tick to land.
const SETTLE: Duration = Duration::from_millis(200);

/// Kill the primary (nodes fail over to the backup), bring it back, then kill and revive
/// the backup so the nodes swing back to the original primary.
fn fail_over_and_back(cluster: &mut Cluster) {
    banner("KILLING PRIMARY MANAGER");
    cluster.kill(PRIMARY);
    thread::sleep(SETTLE);
    banner("REVIVING PRIMARY MANAGER, FAILING BACK");
    cluster.revive(PRIMARY);
    thread::sleep(SETTLE);
    cluster.kill(BACKUP);
    thread::sleep(SETTLE);
    cluster.revive(BACKUP);
}

fn read_own_pages(cluster: &Cluster) {
    for node in cluster.nodes() {
        let page = PageId::new(node.int());
        if let Err(error) = cluster.read(node, page) {
            log::error!("node {} failed to read page {}: {:?}", node, page, error);
        }
    }
}

fn write_own_pages(cluster: &Cluster) {
    for node in cluster.nodes() {
        let page = PageId::new(node.int());
        let content = format!("This is written by node id {}", node);
        if let Err(error) = cluster.write(node, page, &content) {
            log::error!("node {} failed to write page {}: {:?}", node, page, error);
        }
    }
}

fn read_next_pages(cluster: &Cluster) {
    for node in cluster.nodes() {
        let page = next_page(node, cluster.configuration().total_pages);
        if let Err(error) = cluster.read(node, page) {
            log::error!("node {} failed to read page {}: {:?}", node, page, error);
        }
    }
}

fn write_next_pages(cluster: &Cluster) {
    for node in cluster.nodes() {
        let page = next_page(node, cluster.configuration().total_pages);
        let content = format!("This is written by pid {}", node);
        if let Err(error) = cluster.write(node, page, &content) {
            log::error!("node {} failed to write page {}: {:?}", node, page, error);
        }
    }
}

/// The page after the node's own, wrapping within the configured page range and skipping
/// the unused page 0.
fn next_page(node: NodeId, total_pages: u32) -> PageId {
    let mut next = (node.int() + 1) % (total_pages + 1);
    if next == 0 {
        next = 1;
    }
    PageId::new(next)
}

fn conclude(cluster: &Cluster, started: Instant) {
    banner("CONCLUSION");
    cluster.print_state(PRIMARY);
    cluster.print_state(BACKUP);
    println!("Time taken = {:.2} seconds", started.elapsed().as_secs_f64());
}

fn banner(title: &str) {
    println!("**************************************************");
    println!(" {}", title);
    println!("**************************************************");
}

fn setup_logger(level: LevelFilter) {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}", record.level(), message))
        })
        .level(level)
        .chain(io::stdout())
        .apply()
        .expect("failed to set up the logger");
}
