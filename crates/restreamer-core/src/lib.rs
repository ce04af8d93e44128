// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ingest -> packetise -> fan-out pipeline for an MPEG-TS stream multiplier.
//!
//! This crate is payload-opaque past framing: it never re-multiplexes,
//! re-timestamps or transcodes transport-stream content. It reads one
//! upstream byte stream, normalises it into 188-byte TS packets, and fans
//! each packet out to every currently connected downstream consumer.

pub mod broker;
pub mod datagram;
pub mod distributor;
pub mod events;
pub mod fork;
pub mod framer;
pub mod packet;
pub mod rtp;
pub mod rtp_bridge;
pub mod stats;
pub mod upstream;

pub use packet::TsPacket;
