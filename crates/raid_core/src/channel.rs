//! Deploy-event transport seam.
//!
//! The core never talks to sockets. A networked attacker pushes each
//! accepted deploy into a [`DeployChannel`]; a spectating client pulls
//! them out and applies them to its own simulator. The transport behind
//! the trait is the host's business.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::catalog::UnitKind;
use crate::math::Vec2Fixed;

/// A deploy as it travels between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployMessage {
    /// Frame on the sender's simulator when the deploy was accepted.
    pub frame: u32,
    /// Troop type.
    pub unit: UnitKind,
    /// Scene position.
    pub position: Vec2Fixed,
}

/// Abstract send/receive channel for deploy events.
pub trait DeployChannel {
    /// Queue a message for the remote peer.
    fn send(&mut self, message: DeployMessage);

    /// Take the next message from the remote peer, if any arrived.
    fn try_recv(&mut self) -> Option<DeployMessage>;
}

/// In-process channel with explicit inbound and outbound queues.
///
/// The host shuttles messages between two of these (or to a real socket)
/// with [`LocalDeployChannel::drain_outgoing`] and
/// [`LocalDeployChannel::push_incoming`].
#[derive(Debug, Clone, Default)]
pub struct LocalDeployChannel {
    outgoing: VecDeque<DeployMessage>,
    incoming: VecDeque<DeployMessage>,
}

impl LocalDeployChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message as if it came from the remote peer.
    pub fn push_incoming(&mut self, message: DeployMessage) {
        self.incoming.push_back(message);
    }

    /// Take everything sent so far, oldest first.
    pub fn drain_outgoing(&mut self) -> Vec<DeployMessage> {
        self.outgoing.drain(..).collect()
    }
}

impl DeployChannel for LocalDeployChannel {
    fn send(&mut self, message: DeployMessage) {
        self.outgoing.push_back(message);
    }

    fn try_recv(&mut self) -> Option<DeployMessage> {
        self.incoming.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(frame: u32) -> DeployMessage {
        DeployMessage {
            frame,
            unit: UnitKind::Goblin,
            position: Vec2Fixed::from_int(10, 20),
        }
    }

    #[test]
    fn test_outgoing_is_fifo() {
        let mut channel = LocalDeployChannel::new();
        channel.send(msg(1));
        channel.send(msg(2));
        let sent = channel.drain_outgoing();
        assert_eq!(sent, vec![msg(1), msg(2)]);
        assert!(channel.drain_outgoing().is_empty());
    }

    #[test]
    fn test_incoming_is_fifo() {
        let mut channel = LocalDeployChannel::new();
        assert_eq!(channel.try_recv(), None);
        channel.push_incoming(msg(5));
        channel.push_incoming(msg(6));
        assert_eq!(channel.try_recv(), Some(msg(5)));
        assert_eq!(channel.try_recv(), Some(msg(6)));
        assert_eq!(channel.try_recv(), None);
    }
}
