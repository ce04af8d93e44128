// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fixed-Datagram Reader (spec.md 4.B).
//!
//! Adapts a datagram-oriented source (one full datagram per underlying
//! read) into a [`std::io::Read`] byte stream, the shape A expects.

use std::io::{self, Read};

/// A source that yields one complete datagram per call, capped at
/// `max_len` bytes.
pub trait DatagramSource {
    fn recv(&mut self, max_len: usize) -> io::Result<Vec<u8>>;
}

/// Adapts a [`DatagramSource`] into [`Read`].
pub struct DatagramReader<D: DatagramSource> {
    source: D,
    packet_size: usize,
    buffered: Vec<u8>,
    pos: usize,
    pending_err: Option<io::Error>,
}

impl<D: DatagramSource> DatagramReader<D> {
    pub fn new(source: D, packet_size: usize) -> Self {
        Self {
            source,
            packet_size,
            buffered: Vec::new(),
            pos: 0,
            pending_err: None,
        }
    }

    fn remaining(&self) -> usize {
        self.buffered.len() - self.pos
    }

    fn fill(&mut self) -> io::Result<()> {
        if self.remaining() > 0 {
            return Ok(());
        }
        match self.source.recv(self.packet_size) {
            Ok(datagram) => {
                self.buffered = datagram;
                self.pos = 0;
                Ok(())
            }
            Err(e) => {
                // Surface the error only after the caller has drained
                // whatever was already buffered.
                self.pending_err = Some(e);
                Ok(())
            }
        }
    }
}

impl<D: DatagramSource> Read for DatagramReader<D> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.fill()?;

        if self.remaining() == 0 {
            if let Some(e) = self.pending_err.take() {
                return Err(e);
            }
            return Ok(0);
        }

        let n = dst.len().min(self.remaining());
        dst[..n].copy_from_slice(&self.buffered[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeSource {
        datagrams: VecDeque<io::Result<Vec<u8>>>,
    }

    impl DatagramSource for FakeSource {
        fn recv(&mut self, _max_len: usize) -> io::Result<Vec<u8>> {
            self.datagrams
                .pop_front()
                .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no more")))
        }
    }

    #[test]
    fn reads_one_datagram_across_multiple_small_reads() {
        let source = FakeSource {
            datagrams: VecDeque::from([Ok(vec![1, 2, 3, 4, 5])]),
        };
        let mut reader = DatagramReader::new(source, 188);

        let mut out = [0u8; 2];
        assert_eq!(reader.read(&mut out).unwrap(), 2);
        assert_eq!(out, [1, 2]);
        assert_eq!(reader.read(&mut out).unwrap(), 2);
        assert_eq!(out, [3, 4]);
        assert_eq!(reader.read(&mut out).unwrap(), 1);
        assert_eq!(out[0], 5);
    }

    #[test]
    fn moves_to_next_datagram_once_drained() {
        let source = FakeSource {
            datagrams: VecDeque::from([Ok(vec![1, 2]), Ok(vec![3, 4])]),
        };
        let mut reader = DatagramReader::new(source, 188);
        let mut out = [0u8; 4];
        assert_eq!(reader.read(&mut out).unwrap(), 2);
        assert_eq!(reader.read(&mut out).unwrap(), 2);
        assert_eq!(&out[..2], &[3, 4]);
    }

    #[test]
    fn flushes_buffered_bytes_before_surfacing_error() {
        let source = FakeSource {
            datagrams: VecDeque::from([
                Ok(vec![9, 9]),
                Err(io::Error::new(io::ErrorKind::Other, "socket closed")),
            ]),
        };
        let mut reader = DatagramReader::new(source, 188);
        let mut out = [0u8; 2];
        assert_eq!(reader.read(&mut out).unwrap(), 2);
        assert_eq!(out, [9, 9]);

        let err = reader.read(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }
}
