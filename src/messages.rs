//! # Protocol Messages
//!
//! | Message | Purpose | Hop accounting |
//! |---------|---------|----------------|
//! | [`IndexMessage`] | "sender holds or forwards `data_id`" | `hops` +1 per relay |
//! | [`LookupMessage`] | search for `data_id` | `forward_hops` while forward, `backward_hops` after the first jump |
//!
//! Messages are immutable. Relaying never edits a message in place; it builds
//! a new one whose `from` is the relaying node.

use serde::{Deserialize, Serialize};

use crate::identity::Identifier;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMessage {
    data_id: Identifier,
    from: Identifier,
    hops: u32,
}

impl IndexMessage {
    pub fn new(data_id: Identifier, origin: Identifier) -> Self {
        Self {
            data_id,
            from: origin,
            hops: 1,
        }
    }

    pub fn relay(&self, local: Identifier) -> Self {
        Self {
            data_id: self.data_id,
            from: local,
            hops: self.hops + 1,
        }
    }

    pub fn data_id(&self) -> Identifier {
        self.data_id
    }

    pub fn from(&self) -> Identifier {
        self.from
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupMessage {
    data_id: Identifier,
    from: Identifier,
    forward_hops: u32,
    backward_hops: u32,
    direction: Direction,
}

impl LookupMessage {
    pub fn new(data_id: Identifier, from: Identifier) -> Self {
        Self {
            data_id,
            from,
            forward_hops: 1,
            backward_hops: 0,
            direction: Direction::Forward,
        }
    }

    /// Next forward hop. Backward messages keep their direction.
    pub fn forward(&self, local: Identifier) -> Self {
        match self.direction {
            Direction::Forward => Self {
                from: local,
                forward_hops: self.forward_hops + 1,
                ..*self
            },
            Direction::Backward => Self {
                from: local,
                backward_hops: self.backward_hops + 1,
                ..*self
            },
        }
    }

    /// Jump backward along an index trail; `forward_hops` is frozen from here on.
    pub fn backward(&self, local: Identifier) -> Self {
        Self {
            from: local,
            backward_hops: self.backward_hops + 1,
            direction: Direction::Backward,
            ..*self
        }
    }

    pub fn data_id(&self) -> Identifier {
        self.data_id
    }

    pub fn from(&self) -> Identifier {
        self.from
    }

    pub fn forward_hops(&self) -> u32 {
        self.forward_hops
    }

    pub fn backward_hops(&self) -> u32 {
        self.backward_hops
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_forward(&self) -> bool {
        self.direction == Direction::Forward
    }

    pub fn total_hops(&self) -> u32 {
        self.forward_hops + self.backward_hops
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Lookup(LookupMessage),
    Index(IndexMessage),
}

impl Message {
    pub fn data_id(&self) -> Identifier {
        match self {
            Message::Lookup(msg) => msg.data_id(),
            Message::Index(msg) => msg.data_id(),
        }
    }

    pub fn sender(&self) -> Identifier {
        match self {
            Message::Lookup(msg) => msg.from(),
            Message::Index(msg) => msg.from(),
        }
    }
}

impl From<LookupMessage> for Message {
    fn from(msg: LookupMessage) -> Self {
        Message::Lookup(msg)
    }
}

impl From<IndexMessage> for Message {
    fn from(msg: IndexMessage) -> Self {
        Message::Index(msg)
    }
}

/// A message addressed to a peer, produced by a node for the driver to deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub to: Identifier,
    pub message: Message,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: u64) -> Identifier {
        Identifier::from_u64(value)
    }

    #[test]
    fn index_relay_increments_hops_and_rewrites_origin() {
        let original = IndexMessage::new(id(42), id(1));
        assert_eq!(original.hops(), 1);

        let relayed = original.relay(id(2));
        assert_eq!(relayed.hops(), 2);
        assert_eq!(relayed.from(), id(2));
        assert_eq!(relayed.data_id(), id(42));
        assert_eq!(original.from(), id(1));
    }

    #[test]
    fn lookup_forward_counts_forward_hops() {
        let msg = LookupMessage::new(id(42), id(1));
        let next = msg.forward(id(2)).forward(id(3));
        assert_eq!(next.forward_hops(), 3);
        assert_eq!(next.backward_hops(), 0);
        assert!(next.is_forward());
    }

    #[test]
    fn backward_jump_freezes_forward_hops_and_flips_direction() {
        let msg = LookupMessage::new(id(42), id(1)).forward(id(2)).forward(id(3));
        let back = msg.backward(id(4));
        assert_eq!(back.direction(), Direction::Backward);
        assert_eq!(back.forward_hops(), 3);
        assert_eq!(back.backward_hops(), 1);

        let further = back.backward(id(5)).forward(id(6));
        assert_eq!(further.direction(), Direction::Backward);
        assert_eq!(further.forward_hops(), 3);
        assert_eq!(further.backward_hops(), 3);
        assert_eq!(further.total_hops(), 6);
    }

    #[test]
    fn message_accessors_dispatch_by_kind() {
        let lookup: Message = LookupMessage::new(id(9), id(1)).into();
        let index: Message = IndexMessage::new(id(8), id(2)).into();
        assert_eq!(lookup.data_id(), id(9));
        assert_eq!(lookup.sender(), id(1));
        assert_eq!(index.data_id(), id(8));
        assert_eq!(index.sender(), id(2));
    }
}
