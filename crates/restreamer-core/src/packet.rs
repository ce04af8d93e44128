// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The TS packet: a fixed 188-byte, sync-byte-prefixed, immutable blob.
//!
//! Cloning is a refcount bump (`bytes::Bytes`) so the distributor can fan a
//! single packet out to many per-connection queues without copying.

use bytes::Bytes;

/// Size in bytes of one MPEG-2 Transport Stream packet.
pub const TS_PACKET_LEN: usize = 188;

/// MPEG-TS sync byte that must prefix every packet.
pub const TS_SYNC_BYTE: u8 = 0x47;

/// An immutable, reference-counted 188-byte TS packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsPacket(Bytes);

impl TsPacket {
    /// Build a packet from an owned 188-byte buffer.
    ///
    /// Panics if `buf` is not exactly [`TS_PACKET_LEN`] bytes or does not
    /// start with [`TS_SYNC_BYTE`] — both are guaranteed by every producer
    /// in this crate (`framer`, `rtp_bridge`) before construction.
    pub fn new(buf: [u8; TS_PACKET_LEN]) -> Self {
        debug_assert_eq!(buf[0], TS_SYNC_BYTE);
        Self(Bytes::copy_from_slice(&buf))
    }

    /// Build a packet from a `Vec<u8>`, validating length and sync byte.
    pub fn from_vec(buf: Vec<u8>) -> Option<Self> {
        if buf.len() != TS_PACKET_LEN || buf[0] != TS_SYNC_BYTE {
            return None;
        }
        Some(Self(Bytes::from(buf)))
    }

    /// Borrow the raw 188 bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Cheap shared clone for fan-out delivery.
    pub fn share(&self) -> Bytes {
        self.0.clone()
    }
}
