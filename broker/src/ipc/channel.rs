//! IPC Channel implementation.
//!
//! A channel is an ordered, bidirectional pipe between exactly two
//! endpoints. Each endpoint has its own inbound queue, so ordering is
//! FIFO per direction and nothing is ever broadcast.

use alloc::collections::VecDeque;
use serde::Serialize;

use super::message::Message;
use crate::error::{BrokerError, Result};
use crate::process::ProcessId;

/// Unique channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ChannelId(pub u64);

/// One of the two ends of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    /// The other end.
    pub fn peer(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

/// Handle to one end of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EndpointId {
    /// Channel the endpoint belongs to.
    pub channel: ChannelId,
    /// Which end.
    pub side: Side,
}

impl EndpointId {
    /// Create an endpoint handle.
    pub fn new(channel: ChannelId, side: Side) -> Self {
        EndpointId { channel, side }
    }
}

/// Both endpoints of a freshly created channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelPair {
    pub a: EndpointId,
    pub b: EndpointId,
}

impl ChannelPair {
    fn new(channel: ChannelId) -> Self {
        ChannelPair {
            a: EndpointId::new(channel, Side::A),
            b: EndpointId::new(channel, Side::B),
        }
    }

    /// Channel id shared by both ends.
    pub fn channel(&self) -> ChannelId {
        self.a.channel
    }
}

/// Channel state.
///
/// `Open -> Draining -> Closed`; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    /// Messages can be sent and received.
    Open,
    /// Close was requested: queued messages are still delivered, sends fail.
    Draining,
    /// Both queues are empty and nothing more will flow.
    Closed,
}

#[derive(Debug)]
struct End {
    owner: ProcessId,
    inbound: VecDeque<Message>,
}

/// A communication channel.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    state: ChannelState,
    ends: [End; 2],
    /// End that implements interfaces; messages arriving there are validated.
    host: Option<Side>,
    /// Receiver queue depth.
    depth: usize,
}

impl Channel {
    /// Create an open channel. `owner_a`/`owner_b` own sides A and B.
    pub fn new(
        id: ChannelId,
        owner_a: ProcessId,
        owner_b: ProcessId,
        host: Option<Side>,
        depth: usize,
    ) -> Self {
        Channel {
            id,
            state: ChannelState::Open,
            ends: [
                End {
                    owner: owner_a,
                    inbound: VecDeque::new(),
                },
                End {
                    owner: owner_b,
                    inbound: VecDeque::new(),
                },
            ],
            host,
            depth,
        }
    }

    /// Get this channel's ID.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Both endpoint handles.
    pub fn pair(&self) -> ChannelPair {
        ChannelPair::new(self.id)
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Check if the channel is open.
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Check if the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.state == ChannelState::Closed
    }

    /// Owner of one end.
    pub fn owner(&self, side: Side) -> ProcessId {
        self.ends[side.index()].owner
    }

    /// Move one end to a new owner.
    pub fn set_owner(&mut self, side: Side, owner: ProcessId) {
        self.ends[side.index()].owner = owner;
    }

    /// Whether messages arriving at `side` need a capability check.
    pub fn is_host(&self, side: Side) -> bool {
        self.host == Some(side)
    }

    /// Whether a message sent from `from` would fit in the receiver's queue.
    pub fn has_room(&self, from: Side) -> bool {
        self.ends[from.peer().index()].inbound.len() < self.depth
    }

    /// Queue a message sent from `from` for delivery at the other end.
    pub fn enqueue(&mut self, from: Side, message: Message) -> Result<()> {
        if self.state != ChannelState::Open {
            return Err(BrokerError::ChannelClosed);
        }
        if !self.has_room(from) {
            return Err(BrokerError::Backpressure);
        }

        self.ends[from.peer().index()].inbound.push_back(message);
        Ok(())
    }

    /// Take the next message queued for `at`.
    ///
    /// `Ok(None)` means nothing is queued yet. Once close was requested and
    /// this end's queue is empty the result is `ChannelClosed`.
    pub fn dequeue(&mut self, at: Side) -> Result<Option<Message>> {
        let message = self.ends[at.index()].inbound.pop_front();
        self.settle();

        match message {
            Some(m) => Ok(Some(m)),
            None if self.state == ChannelState::Open => Ok(None),
            None => Err(BrokerError::ChannelClosed),
        }
    }

    /// Request close. Returns true if this call changed the state.
    pub fn close(&mut self) -> bool {
        if self.state != ChannelState::Open {
            return false;
        }

        self.state = ChannelState::Draining;
        self.settle();
        true
    }

    /// Drop everything queued for `side`, e.g. because its owner is gone.
    pub fn discard(&mut self, side: Side) -> usize {
        let dropped = self.ends[side.index()].inbound.len();
        self.ends[side.index()].inbound.clear();
        self.settle();
        dropped
    }

    /// Messages queued for `side`.
    pub fn queue_len(&self, side: Side) -> usize {
        self.ends[side.index()].inbound.len()
    }

    /// Messages queued in both directions.
    pub fn queued(&self) -> usize {
        self.ends.iter().map(|e| e.inbound.len()).sum()
    }

    fn settle(&mut self) {
        if self.state == ChannelState::Draining && self.queued() == 0 {
            self.state = ChannelState::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{Interface, MethodId};
    use alloc::vec;

    fn channel(depth: usize) -> Channel {
        Channel::new(ChannelId(1), ProcessId(1), ProcessId(2), None, depth)
    }

    fn msg(n: u8) -> Message {
        Message::new(MethodId::new(Interface::Network, 1), vec![n])
    }

    #[test]
    fn test_fifo_per_direction() {
        let mut ch = channel(16);
        for n in 0..5 {
            ch.enqueue(Side::A, msg(n)).unwrap();
        }
        ch.enqueue(Side::B, msg(100)).unwrap();

        for n in 0..5 {
            let m = ch.dequeue(Side::B).unwrap().unwrap();
            assert_eq!(m.payload(), &[n]);
        }
        assert!(ch.dequeue(Side::B).unwrap().is_none());
        assert_eq!(ch.dequeue(Side::A).unwrap().unwrap().payload(), &[100]);
    }

    #[test]
    fn test_backpressure_at_depth() {
        let mut ch = channel(2);
        ch.enqueue(Side::A, msg(0)).unwrap();
        ch.enqueue(Side::A, msg(1)).unwrap();
        assert_eq!(ch.enqueue(Side::A, msg(2)), Err(BrokerError::Backpressure));

        // The other direction has its own queue.
        ch.enqueue(Side::B, msg(3)).unwrap();

        ch.dequeue(Side::B).unwrap();
        ch.enqueue(Side::A, msg(2)).unwrap();
    }

    #[test]
    fn test_draining_delivers_then_closes() {
        let mut ch = channel(8);
        ch.enqueue(Side::A, msg(0)).unwrap();
        ch.enqueue(Side::A, msg(1)).unwrap();

        assert!(ch.close());
        assert_eq!(ch.state(), ChannelState::Draining);
        assert_eq!(ch.enqueue(Side::B, msg(9)), Err(BrokerError::ChannelClosed));

        // Side A has nothing in flight for it.
        assert_eq!(ch.dequeue(Side::A), Err(BrokerError::ChannelClosed));

        assert_eq!(ch.dequeue(Side::B).unwrap().unwrap().payload(), &[0]);
        assert_eq!(ch.dequeue(Side::B).unwrap().unwrap().payload(), &[1]);
        assert_eq!(ch.state(), ChannelState::Closed);
        assert_eq!(ch.dequeue(Side::B), Err(BrokerError::ChannelClosed));
    }

    #[test]
    fn test_close_empty_goes_straight_to_closed() {
        let mut ch = channel(8);
        assert!(ch.close());
        assert!(ch.is_closed());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut ch = channel(8);
        ch.enqueue(Side::A, msg(0)).unwrap();
        assert!(ch.close());
        assert!(!ch.close());
        assert_eq!(ch.queue_len(Side::B), 1);

        ch.dequeue(Side::B).unwrap();
        assert!(!ch.close());
        assert!(ch.is_closed());
    }

    #[test]
    fn test_discard_settles_draining_channel() {
        let mut ch = channel(8);
        ch.enqueue(Side::B, msg(0)).unwrap();
        ch.close();
        assert_eq!(ch.discard(Side::A), 1);
        assert!(ch.is_closed());
    }
}
