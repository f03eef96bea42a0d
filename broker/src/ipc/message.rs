//! IPC Message format and handling.
//!
//! A message is built by the sender, then frozen: the coordinator stamps
//! the sender id and sequence number while routing it, and the receiver
//! gets the only copy.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use super::capability::{CapabilityToken, Interface};
use super::channel::EndpointId;
use crate::error::Result;
use crate::process::ProcessId;

/// Method identifier: an interface plus the method's ordinal within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId {
    pub interface: Interface,
    pub ordinal: u32,
}

impl MethodId {
    /// Create a method id.
    pub const fn new(interface: Interface, ordinal: u32) -> Self {
        MethodId { interface, ordinal }
    }
}

/// Message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Method being invoked.
    pub method: MethodId,
    /// Capability presented by the sender.
    pub token: Option<CapabilityToken>,
    /// Endpoint the receiver should reply on.
    pub reply_to: Option<EndpointId>,
    /// Sending process (stamped by the coordinator).
    pub sender: ProcessId,
    /// Per-coordinator sequence number (stamped by the coordinator).
    pub sequence: u64,
}

/// An IPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: MessageHeader,
    payload: Vec<u8>,
}

impl Message {
    /// Create a message with a raw payload.
    pub fn new(method: MethodId, payload: Vec<u8>) -> Self {
        Message {
            header: MessageHeader {
                method,
                token: None,
                reply_to: None,
                sender: ProcessId::COORDINATOR,
                sequence: 0,
            },
            payload,
        }
    }

    /// Create a message whose payload is `value` encoded with postcard.
    pub fn encode<T: Serialize>(method: MethodId, value: &T) -> Result<Self> {
        let payload = postcard::to_allocvec(value)?;
        Ok(Self::new(method, payload))
    }

    /// Decode the payload.
    pub fn decode<'a, T: Deserialize<'a>>(&'a self) -> Result<T> {
        Ok(postcard::from_bytes(&self.payload)?)
    }

    /// Attach a capability token.
    pub fn with_token(mut self, token: CapabilityToken) -> Self {
        self.header.token = Some(token);
        self
    }

    /// Attach a reply endpoint. Ownership of it moves to the receiver.
    pub fn with_reply(mut self, endpoint: EndpointId) -> Self {
        self.header.reply_to = Some(endpoint);
        self
    }

    pub(crate) fn stamp(&mut self, sender: ProcessId, sequence: u64) {
        self.header.sender = sender;
        self.header.sequence = sequence;
    }

    /// Get the message header.
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Method being invoked.
    pub fn method(&self) -> MethodId {
        self.header.method
    }

    /// Attached token.
    pub fn token(&self) -> Option<CapabilityToken> {
        self.header.token
    }

    /// Reply endpoint.
    pub fn reply_to(&self) -> Option<EndpointId> {
        self.header.reply_to
    }

    /// Sending process.
    pub fn sender(&self) -> ProcessId {
        self.header.sender
    }

    /// Sequence number.
    pub fn sequence(&self) -> u64 {
        self.header.sequence
    }

    /// Get the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
