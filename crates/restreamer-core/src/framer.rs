// SPDX-License-Identifier: Apache-2.0 OR MIT

//! TS Packet Framer (spec.md 4.A).
//!
//! Reads one 188-byte TS packet from a byte stream, resynchronising on the
//! `0x47` sync byte when the stream desyncs. Desync is expected only at
//! startup; the two-read resync path below is intentionally simple rather
//! than fast.

use std::io::{self, Read};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::packet::{TsPacket, TS_PACKET_LEN, TS_SYNC_BYTE};

/// Read exactly one TS packet from `source`.
///
/// Returns `Ok(None)` ("no-packet") when a full 188-byte window contains no
/// sync byte at all — the caller should retry, this is not an error. I/O
/// errors from the underlying reader propagate unchanged.
pub fn read_ts_packet<R: Read>(source: &mut R) -> io::Result<Option<TsPacket>> {
    let mut buf = [0u8; TS_PACKET_LEN];
    source.read_exact(&mut buf)?;

    if buf[0] == TS_SYNC_BYTE {
        return Ok(Some(TsPacket::new(buf)));
    }

    let Some(k) = buf[1..].iter().position(|&b| b == TS_SYNC_BYTE).map(|i| i + 1) else {
        return Ok(None);
    };

    let mut resynced = [0u8; TS_PACKET_LEN];
    let tail_len = TS_PACKET_LEN - k;
    resynced[..tail_len].copy_from_slice(&buf[k..]);
    source.read_exact(&mut resynced[tail_len..])?;

    Ok(Some(TsPacket::new(resynced)))
}

/// Async twin of [`read_ts_packet`] for sources that are natively
/// `AsyncRead` (HTTP response bodies, UDP/fork/file streams) rather than
/// wrapped onto a blocking thread. Same resync contract.
pub async fn read_ts_packet_async<R: AsyncRead + Unpin>(
    source: &mut R,
) -> io::Result<Option<TsPacket>> {
    let mut buf = [0u8; TS_PACKET_LEN];
    source.read_exact(&mut buf).await?;

    if buf[0] == TS_SYNC_BYTE {
        return Ok(Some(TsPacket::new(buf)));
    }

    let Some(k) = buf[1..].iter().position(|&b| b == TS_SYNC_BYTE).map(|i| i + 1) else {
        return Ok(None);
    };

    let mut resynced = [0u8; TS_PACKET_LEN];
    let tail_len = TS_PACKET_LEN - k;
    resynced[..tail_len].copy_from_slice(&buf[k..]);
    source.read_exact(&mut resynced[tail_len..]).await?;

    Ok(Some(TsPacket::new(resynced)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn packet(fill: u8) -> [u8; TS_PACKET_LEN] {
        let mut buf = [fill; TS_PACKET_LEN];
        buf[0] = TS_SYNC_BYTE;
        buf
    }

    #[test]
    fn reads_aligned_packet() {
        let data = packet(1);
        let mut cursor = Cursor::new(data.to_vec());
        let p = read_ts_packet(&mut cursor).unwrap().unwrap();
        assert_eq!(p.as_bytes(), &data[..]);
    }

    #[test]
    fn resyncs_past_leading_junk() {
        let junk_len = 50;
        let mut data = vec![0xAAu8; junk_len];
        data.extend_from_slice(&packet(2));
        let mut cursor = Cursor::new(data.clone());
        let p = read_ts_packet(&mut cursor).unwrap().unwrap();
        assert_eq!(p.as_bytes(), &packet(2)[..]);
    }

    #[test]
    fn no_sync_byte_returns_none_not_error() {
        let data = vec![0xAAu8; TS_PACKET_LEN];
        let mut cursor = Cursor::new(data);
        let result = read_ts_packet(&mut cursor).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn round_trip_concatenated_stream_with_leading_junk() {
        let mut data = vec![0x00u8; 37];
        let packets: Vec<_> = (0..5u8).map(packet).collect();
        for p in &packets {
            data.extend_from_slice(p);
        }
        let mut cursor = Cursor::new(data);

        let mut decoded = Vec::new();
        loop {
            match read_ts_packet(&mut cursor) {
                Ok(Some(p)) => decoded.push(p),
                Ok(None) => continue,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
            if decoded.len() == packets.len() {
                break;
            }
        }

        for (got, want) in decoded.iter().zip(packets.iter()) {
            assert_eq!(got.as_bytes(), &want[..]);
        }
    }

    #[test]
    fn propagates_io_errors() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "boom"))
            }
        }
        let mut r = Failing;
        let err = read_ts_packet(&mut r).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[tokio::test]
    async fn async_variant_resyncs_past_leading_junk() {
        let junk_len = 12;
        let mut data = vec![0xAAu8; junk_len];
        data.extend_from_slice(&packet(3));
        let mut cursor = std::io::Cursor::new(data);
        let p = read_ts_packet_async(&mut cursor).await.unwrap().unwrap();
        assert_eq!(p.as_bytes(), &packet(3)[..]);
    }
}
