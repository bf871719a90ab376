/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives events emitted by the node and manager threads and passes them to
//! event handlers.
//!
//! When the thread receives a message containing an [event](crate::events::Event), it
//! triggers the execution of all handlers defined for the contained event type, where the
//! handlers for each event type are stored in [`EventHandlers`].
//!
//! When no handlers are present in a cluster's instance of `EventHandlers` this thread is
//! not started.
//!
//! ## Event Handlers
//!
//! A cluster's instance of `EventHandlers` contains:
//! 1. The handlers provided upon building the cluster via [`ClusterSpec`](crate::cluster::ClusterSpec),
//!    and
//! 2. If logging is enabled via the cluster's [config](crate::cluster::Configuration) then
//!    also the default logging handlers defined in [logging](crate::logging).

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread,
    thread::JoinHandle,
};

use crate::{events::*, logging::Logger};

/// Pointer to a handler closure, parametrised by the argument (for our use case, event) type.
pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Stores the two optional handlers enabled for an event type that implements the
/// [`Logger`] trait, namely one logging handler, defined in [`logging`](crate::logging),
/// and one user-defined handler, passed to [`ClusterSpec`](crate::cluster::ClusterSpec).
pub(crate) struct HandlerPair<T: Logger> {
    pub(crate) user_defined_handler: Option<HandlerPtr<T>>,
    pub(crate) logging_handler: Option<HandlerPtr<T>>,
}

impl<T: Logger> HandlerPair<T> {
    // Checks if no event handlers are defined for this event.
    pub(crate) fn is_empty(&self) -> bool {
        self.user_defined_handler.is_none() && self.logging_handler.is_none()
    }

    /// Creates a new `HandlerPair` with the user-defined handler, and the default logging
    /// handler if logging is enabled.
    pub(crate) fn new(log: bool, user_defined_handler: Option<HandlerPtr<T>>) -> HandlerPair<T> {
        HandlerPair {
            user_defined_handler,
            logging_handler: if log { Some(T::get_logger()) } else { None },
        }
    }

    fn fire(&self, event: &T) {
        self.user_defined_handler
            .iter()
            .for_each(|handler| handler(event));
        self.logging_handler
            .iter()
            .for_each(|handler| handler(event));
    }
}

/// Stores the `HandlerPair` of user-defined and optional logging handlers for each
/// pre-defined event type from [events](crate::events).
pub(crate) struct EventHandlers {
    pub(crate) read_cached_handlers: HandlerPair<ReadCachedEvent>,
    pub(crate) page_read_handlers: HandlerPair<PageReadEvent>,
    pub(crate) page_written_handlers: HandlerPair<PageWrittenEvent>,
    pub(crate) invalidated_handlers: HandlerPair<InvalidatedEvent>,
    pub(crate) primary_swapped_handlers: HandlerPair<PrimarySwappedEvent>,
    pub(crate) request_timed_out_handlers: HandlerPair<RequestTimedOutEvent>,
    pub(crate) owner_installed_handlers: HandlerPair<OwnerInstalledEvent>,
    pub(crate) ownership_transferred_handlers: HandlerPair<OwnershipTransferredEvent>,
    pub(crate) snapshot_applied_handlers: HandlerPair<SnapshotAppliedEvent>,
    pub(crate) role_changed_handlers: HandlerPair<RoleChangedEvent>,
}

impl EventHandlers {
    /// Creates the [handler pairs](HandlerPair) for all pre-defined event types from
    /// [events](crate::events) given the user-defined handlers, and information on whether
    /// logging is enabled.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log: bool,
        read_cached_handler: Option<HandlerPtr<ReadCachedEvent>>,
        page_read_handler: Option<HandlerPtr<PageReadEvent>>,
        page_written_handler: Option<HandlerPtr<PageWrittenEvent>>,
        invalidated_handler: Option<HandlerPtr<InvalidatedEvent>>,
        primary_swapped_handler: Option<HandlerPtr<PrimarySwappedEvent>>,
        request_timed_out_handler: Option<HandlerPtr<RequestTimedOutEvent>>,
        owner_installed_handler: Option<HandlerPtr<OwnerInstalledEvent>>,
        ownership_transferred_handler: Option<HandlerPtr<OwnershipTransferredEvent>>,
        snapshot_applied_handler: Option<HandlerPtr<SnapshotAppliedEvent>>,
        role_changed_handler: Option<HandlerPtr<RoleChangedEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            read_cached_handlers: HandlerPair::new(log, read_cached_handler),
            page_read_handlers: HandlerPair::new(log, page_read_handler),
            page_written_handlers: HandlerPair::new(log, page_written_handler),
            invalidated_handlers: HandlerPair::new(log, invalidated_handler),
            primary_swapped_handlers: HandlerPair::new(log, primary_swapped_handler),
            request_timed_out_handlers: HandlerPair::new(log, request_timed_out_handler),
            owner_installed_handlers: HandlerPair::new(log, owner_installed_handler),
            ownership_transferred_handlers: HandlerPair::new(log, ownership_transferred_handler),
            snapshot_applied_handlers: HandlerPair::new(log, snapshot_applied_handler),
            role_changed_handlers: HandlerPair::new(log, role_changed_handler),
        }
    }

    /// Checks if no handlers at all are registered, in which case the event bus thread does
    /// not need to be started.
    pub(crate) fn is_empty(&self) -> bool {
        self.read_cached_handlers.is_empty()
            && self.page_read_handlers.is_empty()
            && self.page_written_handlers.is_empty()
            && self.invalidated_handlers.is_empty()
            && self.primary_swapped_handlers.is_empty()
            && self.request_timed_out_handlers.is_empty()
            && self.owner_installed_handlers.is_empty()
            && self.ownership_transferred_handlers.is_empty()
            && self.snapshot_applied_handlers.is_empty()
            && self.role_changed_handlers.is_empty()
    }

    fn fire_handlers(&self, event: Event) {
        match event {
            Event::ReadCached(event) => self.read_cached_handlers.fire(&event),
            Event::PageRead(event) => self.page_read_handlers.fire(&event),
            Event::PageWritten(event) => self.page_written_handlers.fire(&event),
            Event::Invalidated(event) => self.invalidated_handlers.fire(&event),
            Event::PrimarySwapped(event) => self.primary_swapped_handlers.fire(&event),
            Event::RequestTimedOut(event) => self.request_timed_out_handlers.fire(&event),
            Event::OwnerInstalled(event) => self.owner_installed_handlers.fire(&event),
            Event::OwnershipTransferred(event) => self.ownership_transferred_handlers.fire(&event),
            Event::SnapshotApplied(event) => self.snapshot_applied_handlers.fire(&event),
            Event::RoleChanged(event) => self.role_changed_handlers.fire(&event),
        }
    }
}

/// Starts the event bus thread, which runs an infinite loop until a shutdown signal is
/// received from the parent thread. In each iteration of the loop, the thread checks if it
/// received any event notifications, and if so, then triggers the execution of the handlers
/// defined for the event.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread lost all of its event publishers")
            }
        }
    })
}
