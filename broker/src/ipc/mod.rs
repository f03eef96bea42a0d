//! Inter-Process Communication (IPC) primitives.
//!
//! Channels, messages, capability tokens and negotiated shared buffers.
//! These types hold no locks of their own; the coordinator owns every
//! instance and serializes access to them.

pub mod capability;
pub mod channel;
pub mod message;
pub mod shm;

pub use capability::{
    CapabilityRights, CapabilityToken, Interface, TokenId, TokenRecord, TokenTable,
};
pub use channel::{Channel, ChannelId, ChannelPair, ChannelState, EndpointId, Side};
pub use message::{Message, MessageHeader, MethodId};
pub use shm::{BufferId, BufferRights, SharedBuffer};

/// Maximum message payload size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KB

/// Default receiver queue depth before senders see backpressure.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;
