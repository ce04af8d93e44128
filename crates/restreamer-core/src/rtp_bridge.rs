// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RTP Bridge (spec.md 4.D).
//!
//! Turns a reordered RTP stream of MPEG2-TS payloads into a TS byte stream:
//! a small sliding reorder window absorbs jitter, stale/duplicate slots are
//! reported as events (never errors) and do not stop the stream.

use std::collections::VecDeque;

use crate::rtp::{RtpPacket, PAYLOAD_TYPE_MP2T};

/// Observability events emitted by the bridge. These are not failures —
/// the caller logs them and continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A reorder-buffer slot was discarded because the window advanced
    /// past it without ever receiving that sequence number.
    Drop { sequence_number: u16 },
    /// A newly arrived packet displaced one already occupying its slot.
    Dup { sequence_number: u16 },
    /// Packet rejected before it ever reached the window.
    Rejected { sequence_number: u16, reason: RejectReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    WrongPayloadType,
    PayloadTooShort,
}

/// Fixed-capacity ring of slots indexed by a sliding base sequence number.
struct ReorderBuffer {
    slots: VecDeque<Option<Vec<u8>>>,
    capacity: usize,
}

impl ReorderBuffer {
    fn new(capacity: usize) -> Self {
        let mut slots = VecDeque::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, capacity }
    }

    /// Insert at `pos`, returning any displaced payload.
    fn insert(&mut self, pos: usize, payload: Vec<u8>) -> Option<Vec<u8>> {
        debug_assert!(pos < self.capacity);
        std::mem::replace(&mut self.slots[pos], Some(payload))
    }

    /// Pop the base slot and advance the window by one.
    fn pop_front(&mut self) -> Option<Vec<u8>> {
        let front = self.slots.pop_front()?;
        self.slots.push_back(None);
        front
    }

    fn peek_front_is_some(&self) -> bool {
        matches!(self.slots.front(), Some(Some(_)))
    }

    /// Advance the base by `n` slots, returning the discarded payloads
    /// (non-empty slots pushed out of the window).
    fn advance(&mut self, n: usize) -> Vec<Option<Vec<u8>>> {
        let mut discarded = Vec::with_capacity(n);
        for _ in 0..n {
            discarded.push(self.slots.pop_front());
            self.slots.push_back(None);
        }
        discarded
    }
}

/// Forward distance from `a` to `b` in modulo-2^16 arithmetic, treating
/// distances past the half-range as backward (stale).
fn forward_distance(a: u16, b: u16) -> Option<u16> {
    let dist = b.wrapping_sub(a);
    if dist > i16::MAX as u16 {
        None
    } else {
        Some(dist)
    }
}

/// Reorders an incoming RTP stream (payload type 33) and emits TS bytes.
pub struct RtpBridge {
    base_seq: Option<u16>,
    window: ReorderBuffer,
    out: VecDeque<u8>,
}

/// Raised by [`RtpBridge::emit`] when the next slot hasn't arrived yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitingForMore;

impl RtpBridge {
    pub fn new(lookahead: usize) -> Self {
        assert!(lookahead > 0, "lookahead must be positive");
        Self {
            base_seq: None,
            window: ReorderBuffer::new(lookahead),
            out: VecDeque::new(),
        }
    }

    /// Feed one parsed RTP packet into the bridge.
    pub fn push(&mut self, pkt: &RtpPacket<'_>) -> Vec<BridgeEvent> {
        let mut events = Vec::new();

        if pkt.payload_type != PAYLOAD_TYPE_MP2T {
            events.push(BridgeEvent::Rejected {
                sequence_number: pkt.sequence_number,
                reason: RejectReason::WrongPayloadType,
            });
            return events;
        }
        if pkt.payload.len() < crate::packet::TS_PACKET_LEN {
            events.push(BridgeEvent::Rejected {
                sequence_number: pkt.sequence_number,
                reason: RejectReason::PayloadTooShort,
            });
            return events;
        }

        let seq = pkt.sequence_number;
        let payload = pkt.payload.to_vec();

        let Some(base) = self.base_seq else {
            self.base_seq = Some(seq);
            self.window.insert(0, payload);
            return events;
        };

        let Some(pos) = forward_distance(base, seq) else {
            // Stale packet, far enough behind the base to be backward —
            // silently dropped, consistent with "most recent copy wins".
            return events;
        };
        let pos = pos as usize;

        if pos >= self.window.capacity {
            let advance_by = pos - (self.window.capacity - 1);
            for discarded in self.window.advance(advance_by) {
                if let Some(_payload) = discarded {
                    // A slot that had data was pushed out unconsumed.
                }
            }
            // Report a drop per displaced sequence number that fell out of
            // the window while still empty (never arrived in time).
            let new_base = base.wrapping_add(advance_by as u16);
            for i in 0..advance_by {
                events.push(BridgeEvent::Drop {
                    sequence_number: base.wrapping_add(i as u16),
                });
            }
            self.base_seq = Some(new_base);
            let new_pos = pos - advance_by;
            if let Some(_displaced) = self.window.insert(new_pos, payload) {
                events.push(BridgeEvent::Dup { sequence_number: seq });
            }
        } else if let Some(_displaced) = self.window.insert(pos, payload) {
            events.push(BridgeEvent::Dup { sequence_number: seq });
        }

        events
    }

    /// Pop the next in-order TS payload into the internal byte buffer, if
    /// available.
    pub fn advance(&mut self) -> Result<(), WaitingForMore> {
        if !self.window.peek_front_is_some() {
            return Err(WaitingForMore);
        }
        if let Some(payload) = self.window.pop_front() {
            self.out.extend(payload);
            if let Some(base) = self.base_seq.as_mut() {
                *base = base.wrapping_add(1);
            }
        }
        Ok(())
    }

    /// Bytes of emitted TS payload currently buffered and ready to read.
    pub fn available(&self) -> usize {
        self.out.len()
    }

    /// Read up to `dst.len()` bytes of emitted TS payload.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.out.len());
        for slot in dst.iter_mut().take(n) {
            *slot = self.out.pop_front().unwrap();
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp;

    fn rtp_bytes(seq: u16) -> Vec<u8> {
        let mut h = vec![0u8; 12];
        h[0] = 0x80;
        h[1] = PAYLOAD_TYPE_MP2T;
        h[2..4].copy_from_slice(&seq.to_be_bytes());
        h.extend_from_slice(&[seq as u8; 188]);
        h
    }

    fn drain_all(bridge: &mut RtpBridge) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            match bridge.advance() {
                Ok(()) => {
                    let mut buf = [0u8; 188];
                    let n = bridge.read(&mut buf);
                    out.extend_from_slice(&buf[..n]);
                }
                Err(WaitingForMore) => break,
            }
        }
        out
    }

    /// Feeds packets one at a time, draining everything available after
    /// each arrival -- the way a live caller retries emission on every
    /// incoming packet rather than batching the whole stream up front.
    fn push_and_drain(bridge: &mut RtpBridge, seqs: &[u16]) -> Vec<u8> {
        let mut out = Vec::new();
        for &seq in seqs {
            let bytes = rtp_bytes(seq);
            let pkt = rtp::parse(&bytes).unwrap();
            bridge.push(&pkt);
            out.extend(drain_all(bridge));
        }
        out
    }

    #[test]
    fn in_order_sequence_emits_identical_payload() {
        let mut bridge = RtpBridge::new(4);
        let out = push_and_drain(&mut bridge, &[1, 2, 3, 4, 5]);
        let mut expected = Vec::new();
        for seq in [1u16, 2, 3, 4, 5] {
            expected.extend_from_slice(&[seq as u8; 188]);
        }
        assert_eq!(out, expected);
    }

    #[test]
    fn single_swap_within_lookahead_reorders_correctly() {
        let mut bridge = RtpBridge::new(4);
        let out = push_and_drain(&mut bridge, &[1, 3, 2, 4, 5]);
        let mut expected = Vec::new();
        for seq in [1u16, 2, 3, 4, 5] {
            expected.extend_from_slice(&[seq as u8; 188]);
        }
        assert_eq!(out, expected);
    }

    #[test]
    fn reorder_at_tail_of_window() {
        let mut bridge = RtpBridge::new(4);
        for seq in [1u16, 2, 5, 3, 4] {
            let bytes = rtp_bytes(seq);
            let pkt = rtp::parse(&bytes).unwrap();
            bridge.push(&pkt);
            let _ = drain_all(&mut bridge);
        }
        // Nothing left pending once all five have arrived and drained.
        assert!(bridge.advance().is_err());
    }

    #[test]
    fn out_of_window_packet_is_dropped_with_event() {
        let mut bridge = RtpBridge::new(4);
        let seqs = [1u16, 100, 2];
        let mut all_events = Vec::new();
        for seq in seqs {
            let bytes = rtp_bytes(seq);
            let pkt = rtp::parse(&bytes).unwrap();
            all_events.extend(bridge.push(&pkt));
        }
        assert!(all_events
            .iter()
            .any(|e| matches!(e, BridgeEvent::Drop { .. })));
    }

    #[test]
    fn wrong_payload_type_is_rejected_without_entering_window() {
        let mut bridge = RtpBridge::new(4);
        let mut bytes = rtp_bytes(1);
        bytes[1] = 96; // some other dynamic payload type
        let pkt = rtp::parse(&bytes).unwrap();
        let events = bridge.push(&pkt);
        assert_eq!(
            events,
            vec![BridgeEvent::Rejected {
                sequence_number: 1,
                reason: RejectReason::WrongPayloadType
            }]
        );
        assert!(bridge.advance().is_err());
    }

    #[test]
    fn short_payload_is_rejected() {
        let mut bridge = RtpBridge::new(4);
        let mut h = vec![0u8; 12];
        h[0] = 0x80;
        h[1] = PAYLOAD_TYPE_MP2T;
        h[2..4].copy_from_slice(&1u16.to_be_bytes());
        h.extend_from_slice(&[0u8; 10]); // far short of 188
        let pkt = rtp::parse(&h).unwrap();
        let events = bridge.push(&pkt);
        assert_eq!(
            events,
            vec![BridgeEvent::Rejected {
                sequence_number: 1,
                reason: RejectReason::PayloadTooShort
            }]
        );
    }
}
