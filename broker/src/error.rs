//! Broker error types

use core::fmt;

/// Resource whose ceiling was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Live process count.
    Processes,
    /// Open channel count.
    Channels,
    /// Accounted memory (process footprints plus shared buffers).
    Memory,
}

/// Broker error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    /// A process, channel or memory ceiling would be exceeded.
    ResourceExhausted(Resource),
    /// The caller does not hold the capability or right it used.
    PermissionDenied,
    /// The channel is draining or closed.
    ChannelClosed,
    /// The receiver's queue is full; retry later.
    Backpressure,
    /// No such process.
    UnknownProcess,
    /// No such channel.
    UnknownChannel,
    /// No such shared buffer.
    UnknownBuffer,
    /// The caller does not own the endpoint it used.
    NotEndpointOwner,
    /// The process has already been terminated.
    ProcessTerminated,
    /// Payload exceeds the configured maximum.
    MessageTooLarge,
    /// Read or write outside a shared buffer.
    OutOfBounds,
    /// Payload could not be encoded or decoded.
    Codec,
}

impl BrokerError {
    /// Whether the caller is expected to retry the same operation later.
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Backpressure)
    }

    /// Stable kebab-case name, used by tooling to match expected failures.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::ResourceExhausted(_) => "resource-exhausted",
            BrokerError::PermissionDenied => "permission-denied",
            BrokerError::ChannelClosed => "channel-closed",
            BrokerError::Backpressure => "backpressure",
            BrokerError::UnknownProcess => "unknown-process",
            BrokerError::UnknownChannel => "unknown-channel",
            BrokerError::UnknownBuffer => "unknown-buffer",
            BrokerError::NotEndpointOwner => "not-endpoint-owner",
            BrokerError::ProcessTerminated => "process-terminated",
            BrokerError::MessageTooLarge => "message-too-large",
            BrokerError::OutOfBounds => "out-of-bounds",
            BrokerError::Codec => "codec",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Processes => write!(f, "process count"),
            Resource::Channels => write!(f, "channel count"),
            Resource::Memory => write!(f, "memory"),
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ResourceExhausted(r) => write!(f, "resource exhausted: {}", r),
            BrokerError::PermissionDenied => write!(f, "permission denied"),
            BrokerError::ChannelClosed => write!(f, "channel closed"),
            BrokerError::Backpressure => write!(f, "receiver queue full, retry later"),
            BrokerError::UnknownProcess => write!(f, "unknown process"),
            BrokerError::UnknownChannel => write!(f, "unknown channel"),
            BrokerError::UnknownBuffer => write!(f, "unknown shared buffer"),
            BrokerError::NotEndpointOwner => write!(f, "endpoint not owned by caller"),
            BrokerError::ProcessTerminated => write!(f, "process terminated"),
            BrokerError::MessageTooLarge => write!(f, "message too large"),
            BrokerError::OutOfBounds => write!(f, "access outside shared buffer"),
            BrokerError::Codec => write!(f, "payload encoding error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BrokerError {}

impl From<postcard::Error> for BrokerError {
    fn from(_: postcard::Error) -> Self {
        BrokerError::Codec
    }
}

/// Result type for broker operations
pub type Result<T> = core::result::Result<T, BrokerError>;
