/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the cluster's
//! [config](crate::cluster::Configuration).
//!
//! Logging goes through the [log](https://docs.rs/log/latest/log/) crate. To get these
//! messages printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two
//! values are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following
//! snippet is how a [PageRead](crate::events::PageReadEvent) is printed:
//!
//! ```text
//! PageRead, 1701329264, 2, 5, hello
//! ```
//!
//! In the snippet, the third value is the reading node, the fourth is the page, and the
//! fifth is the content that was installed.

use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const READ_CACHED: &str = "ReadCached";
pub const PAGE_READ: &str = "PageRead";
pub const PAGE_WRITTEN: &str = "PageWritten";
pub const INVALIDATED: &str = "Invalidated";
pub const PRIMARY_SWAPPED: &str = "PrimarySwapped";
pub const REQUEST_TIMED_OUT: &str = "RequestTimedOut";

pub const OWNER_INSTALLED: &str = "OwnerInstalled";
pub const OWNERSHIP_TRANSFERRED: &str = "OwnershipTransferred";
pub const SNAPSHOT_APPLIED: &str = "SnapshotApplied";
pub const ROLE_CHANGED: &str = "RoleChanged";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for ReadCachedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ReadCachedEvent| {
            log::info!(
                "{}, {}, {}, {}",
                READ_CACHED,
                secs_since_unix_epoch(event.timestamp),
                event.node,
                event.page
            )
        };
        Box::new(logger)
    }
}

impl Logger for PageReadEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &PageReadEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PAGE_READ,
                secs_since_unix_epoch(event.timestamp),
                event.node,
                event.page,
                event.content
            )
        };
        Box::new(logger)
    }
}

impl Logger for PageWrittenEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &PageWrittenEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PAGE_WRITTEN,
                secs_since_unix_epoch(event.timestamp),
                event.node,
                event.page,
                event.content
            )
        };
        Box::new(logger)
    }
}

impl Logger for InvalidatedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &InvalidatedEvent| {
            log::info!(
                "{}, {}, {}, {}",
                INVALIDATED,
                secs_since_unix_epoch(event.timestamp),
                event.node,
                event.page
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrimarySwappedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &PrimarySwappedEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PRIMARY_SWAPPED,
                secs_since_unix_epoch(event.timestamp),
                event.node,
                event.new_primary
            )
        };
        Box::new(logger)
    }
}

impl Logger for RequestTimedOutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &RequestTimedOutEvent| {
            log::warn!(
                "{}, {}, {}, {}, {}",
                REQUEST_TIMED_OUT,
                secs_since_unix_epoch(event.timestamp),
                event.node,
                event.page,
                event.attempt
            )
        };
        Box::new(logger)
    }
}

impl Logger for OwnerInstalledEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &OwnerInstalledEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                OWNER_INSTALLED,
                secs_since_unix_epoch(event.timestamp),
                event.manager,
                event.page,
                event.owner
            )
        };
        Box::new(logger)
    }
}

impl Logger for OwnershipTransferredEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &OwnershipTransferredEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                OWNERSHIP_TRANSFERRED,
                secs_since_unix_epoch(event.timestamp),
                event.manager,
                event.page,
                event.from,
                event.to,
                event.invalidated
            )
        };
        Box::new(logger)
    }
}

impl Logger for SnapshotAppliedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &SnapshotAppliedEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SNAPSHOT_APPLIED,
                secs_since_unix_epoch(event.timestamp),
                event.manager,
                event.sender,
                event.pages
            )
        };
        Box::new(logger)
    }
}

impl Logger for RoleChangedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &RoleChangedEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ROLE_CHANGED,
                secs_since_unix_epoch(event.timestamp),
                event.manager,
                event.role
            )
        };
        Box::new(logger)
    }
}

pub(crate) fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}
