/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the structured messages exchanged between nodes and central managers.
//!
//! ## Message
//!
//! [`Message`] groups the twelve coherence message types by the inbound channel that consumes
//! them, which is also how the network routes them:
//!
//! 1. [`Request`]: sent by a node to a manager to obtain a page (`requests` inbox).
//! 2. [`Ack`]: sent by a node to release a manager that is blocked on the completion of a
//!    request it is serializing (`acks` inbox).
//! 3. [`Directive`]: sent by a manager to a node's service loop, instructing it to forward a
//!    page to a requester or to drop a read copy (`directives` inbox).
//! 4. [`Response`]: delivered to the requesting node's `responses` inbox, where a blocked
//!    read or write call is waiting. Owner-nil replies come from the manager; page transfers
//!    come directly from the owning node.
//!
//! Every message preserves the id of the node that initiated the request (`requester`) across
//! all hops, so the owner and the manager can correlate the messages belonging to one request.
//!
//! ## MetaMessage
//!
//! [`MetaMessage`] is not part of the coherence protocol: it is the periodic metadata snapshot
//! an incumbent manager pushes to its peer, delivered on a dedicated per-manager inbox.

use indexmap::{IndexMap, IndexSet};

use crate::types::{ManagerId, NodeId, PageId};

#[derive(Clone, Debug)]
pub enum Message {
    Request(Request),
    Ack(Ack),
    Directive(Directive),
    Response(Response),
}

/// A node's request for a page, serialized by the receiving manager.
#[derive(Clone, Debug)]
pub enum Request {
    Read(ReadRequest),
    Write(WriteRequest),
}

impl Request {
    pub fn requester(&self) -> NodeId {
        match self {
            Request::Read(ReadRequest { requester, .. }) => *requester,
            Request::Write(WriteRequest { requester, .. }) => *requester,
        }
    }

    pub fn page(&self) -> PageId {
        match self {
            Request::Read(ReadRequest { page, .. }) => *page,
            Request::Write(WriteRequest { page, .. }) => *page,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReadRequest {
    pub requester: NodeId,
    pub page: PageId,
}

#[derive(Clone, Debug)]
pub struct WriteRequest {
    pub requester: NodeId,
    pub page: PageId,
}

/// An acknowledgement that releases the manager's serialization of the current request.
#[derive(Clone, Debug)]
pub enum Ack {
    Read(ReadAck),
    Write(WriteAck),
    Invalidate(InvalidateAck),
}

impl Ack {
    pub fn sender(&self) -> NodeId {
        match self {
            Ack::Read(ReadAck { sender, .. }) => *sender,
            Ack::Write(WriteAck { sender, .. }) => *sender,
            Ack::Invalidate(InvalidateAck { sender, .. }) => *sender,
        }
    }

    pub fn page(&self) -> PageId {
        match self {
            Ack::Read(ReadAck { page, .. }) => *page,
            Ack::Write(WriteAck { page, .. }) => *page,
            Ack::Invalidate(InvalidateAck { page, .. }) => *page,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Ack::Read(_) => "READACK",
            Ack::Write(_) => "WRITEACK",
            Ack::Invalidate(_) => "INVALIDATEACK",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReadAck {
    pub sender: NodeId,
    pub requester: NodeId,
    pub page: PageId,
}

#[derive(Clone, Debug)]
pub struct WriteAck {
    pub sender: NodeId,
    pub requester: NodeId,
    pub page: PageId,
}

#[derive(Clone, Debug)]
pub struct InvalidateAck {
    pub sender: NodeId,
    pub requester: NodeId,
    pub page: PageId,
}

/// An instruction from a manager to a node's service loop.
#[derive(Clone, Debug)]
pub enum Directive {
    ReadForward(ReadForward),
    WriteForward(WriteForward),
    Invalidate(Invalidate),
}

/// Forward a read copy of `page` to `requester`, downgrading the local permission to
/// read-only if the receiver held the page read-write.
#[derive(Clone, Debug)]
pub struct ReadForward {
    pub requester: NodeId,
    pub page: PageId,
}

/// Hand `page` over to `requester` and drop the local copy. The receiver is losing
/// ownership of the page.
#[derive(Clone, Debug)]
pub struct WriteForward {
    pub requester: NodeId,
    pub page: PageId,
}

/// Drop the local read copy of `page` because `requester` is about to write it.
#[derive(Clone, Debug)]
pub struct Invalidate {
    pub requester: NodeId,
    pub page: PageId,
}

/// A reply that completes a node's pending read or write call.
#[derive(Clone, Debug)]
pub enum Response {
    ReadOwnerNil(ReadOwnerNil),
    WriteOwnerNil(WriteOwnerNil),
    ReadPage(ReadPage),
    WritePage(WritePage),
}

impl Response {
    pub fn page(&self) -> PageId {
        match self {
            Response::ReadOwnerNil(ReadOwnerNil { page, .. }) => *page,
            Response::WriteOwnerNil(WriteOwnerNil { page, .. }) => *page,
            Response::ReadPage(ReadPage { page, .. }) => *page,
            Response::WritePage(WritePage { page, .. }) => *page,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Response::ReadOwnerNil(_) => "READOWNERNIL",
            Response::WriteOwnerNil(_) => "WRITEOWNERNIL",
            Response::ReadPage(_) => "READPG",
            Response::WritePage(_) => "WRITEPG",
        }
    }
}

/// The manager's reply to a read of a page that has never been written: there is nothing
/// to install.
#[derive(Clone, Debug)]
pub struct ReadOwnerNil {
    pub requester: NodeId,
    pub page: PageId,
}

/// The manager's reply to a write of a page that has never been written: the requester
/// becomes the page's first owner.
#[derive(Clone, Debug)]
pub struct WriteOwnerNil {
    pub requester: NodeId,
    pub page: PageId,
}

/// A read copy of a page, sent by its owner directly to the requester.
#[derive(Clone, Debug)]
pub struct ReadPage {
    pub sender: NodeId,
    pub requester: NodeId,
    pub page: PageId,
    pub content: String,
}

/// Ownership of a page, sent by the previous owner directly to the requester. The content
/// is the previous owner's copy, which the requester's pending write supersedes.
#[derive(Clone, Debug)]
pub struct WritePage {
    pub sender: NodeId,
    pub requester: NodeId,
    pub page: PageId,
    pub content: String,
}

impl From<ReadRequest> for Message {
    fn from(value: ReadRequest) -> Self {
        Message::Request(Request::Read(value))
    }
}

impl From<WriteRequest> for Message {
    fn from(value: WriteRequest) -> Self {
        Message::Request(Request::Write(value))
    }
}

impl From<ReadAck> for Message {
    fn from(value: ReadAck) -> Self {
        Message::Ack(Ack::Read(value))
    }
}

impl From<WriteAck> for Message {
    fn from(value: WriteAck) -> Self {
        Message::Ack(Ack::Write(value))
    }
}

impl From<InvalidateAck> for Message {
    fn from(value: InvalidateAck) -> Self {
        Message::Ack(Ack::Invalidate(value))
    }
}

impl From<ReadForward> for Message {
    fn from(value: ReadForward) -> Self {
        Message::Directive(Directive::ReadForward(value))
    }
}

impl From<WriteForward> for Message {
    fn from(value: WriteForward) -> Self {
        Message::Directive(Directive::WriteForward(value))
    }
}

impl From<Invalidate> for Message {
    fn from(value: Invalidate) -> Self {
        Message::Directive(Directive::Invalidate(value))
    }
}

impl From<ReadOwnerNil> for Message {
    fn from(value: ReadOwnerNil) -> Self {
        Message::Response(Response::ReadOwnerNil(value))
    }
}

impl From<WriteOwnerNil> for Message {
    fn from(value: WriteOwnerNil) -> Self {
        Message::Response(Response::WriteOwnerNil(value))
    }
}

impl From<ReadPage> for Message {
    fn from(value: ReadPage) -> Self {
        Message::Response(Response::ReadPage(value))
    }
}

impl From<WritePage> for Message {
    fn from(value: WritePage) -> Self {
        Message::Response(Response::WritePage(value))
    }
}

/// A full snapshot of an incumbent manager's protocol metadata, pushed periodically to the
/// peer manager. The receiver replaces its own tables wholesale and considers itself
/// overthrown.
#[derive(Clone, Debug)]
pub struct MetaMessage {
    pub sender: ManagerId,
    pub nodes: Vec<NodeId>,
    pub page_owner: IndexMap<PageId, NodeId>,
    pub page_copies: IndexMap<PageId, IndexSet<NodeId>>,
}
