//! Membership Wire Protocol
//!
//! A small framed protocol against the external membership service: a
//! persistent, hierarchical namespace with ephemeral children,
//! children-changed watches, and session-based liveness. Every request
//! carries a `request_id` so the client's reader task can route the
//! matching response back to the caller awaiting it, independent of any
//! unsolicited `ChildrenChanged` pushes interleaved on the same connection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Connect,
    ConnectAck { session_id: u64 },
    CreateGroup { path: String },
    CreateGroupAck { created: bool },
    JoinGroup { path: String, member_id: String },
    JoinGroupAck,
    ListMembers { path: String },
    ListMembersResponse { members: Vec<String> },
    AddWatch { path: String },
    AddWatchAck,
    RemoveWatch { path: String },
    RemoveWatchAck,
    /// Unsolicited push: children of `path` changed. At-least-once; a
    /// watch may see spurious repeats of the same membership snapshot.
    ChildrenChanged { path: String, members: Vec<String> },
    Close,
    CloseAck,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub request_id: u64,
    pub message: Message,
}

impl Envelope {
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Length-prefixed, checksummed frame header, identical in shape to the
/// teacher's inter-node wire framing.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
    pub checksum: u32,
}

impl FrameHeader {
    pub const SIZE: usize = 8;

    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            length: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            checksum: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_bincode() {
        let envelope = Envelope {
            request_id: 7,
            message: Message::JoinGroup {
                path: "namenode-prod".into(),
                member_id: "42".into(),
            },
        };
        let bytes = envelope.serialize().unwrap();
        let restored = Envelope::deserialize(&bytes).unwrap();
        assert_eq!(restored.request_id, 7);
        match restored.message {
            Message::JoinGroup { path, member_id } => {
                assert_eq!(path, "namenode-prod");
                assert_eq!(member_id, "42");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn frame_header_round_trips() {
        let data = b"some envelope bytes";
        let header = FrameHeader::new(data);
        let bytes = header.to_bytes();
        let restored = FrameHeader::from_bytes(&bytes);
        assert_eq!(header.length, restored.length);
        assert_eq!(header.checksum, restored.checksum);
    }
}
