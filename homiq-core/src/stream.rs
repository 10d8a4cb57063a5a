//! Stream reassembly: accumulate arbitrary byte chunks, yield complete frames.

use tracing::trace;

use crate::protocol::Frame;
use crate::wire::{self, END, START};

/// Default cap used by hosts that want one. [`Reassembler::new`] is unbounded.
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024;

/// Buffers link bytes and extracts `<; ... ;>` frames from them.
///
/// Output does not depend on how the stream was chunked. Garbage before a
/// start marker is dropped when the next complete frame is taken; a slice
/// that fails to decode is dropped and scanning continues.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: String,
    limit: Option<usize>,
    overflowed: u64,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassembler that resynchronises once more than `max_bytes` are held
    /// without a complete frame.
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            limit: Some(max_bytes),
            ..Self::default()
        }
    }

    /// Feed one chunk. Non-ASCII bytes are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer
            .extend(chunk.iter().filter(|b| b.is_ascii()).map(|&b| char::from(b)));

        let mut out = Vec::new();
        while let Some(begin) = self.buffer.find(START) {
            let Some(end) = self.buffer[begin..].find(END).map(|i| begin + i) else {
                break;
            };
            let taken = end + END.len();
            match wire::decode_frame(&self.buffer[begin..taken]) {
                Some(frame) => out.push(frame),
                None => trace!(slice = &self.buffer[begin..taken], "dropping malformed frame"),
            }
            self.buffer.drain(..taken);
        }
        self.enforce_limit();
        out
    }

    fn enforce_limit(&mut self) {
        let Some(limit) = self.limit else {
            return;
        };
        if self.buffer.len() <= limit {
            return;
        }
        let before = self.buffer.len();
        let keep_from = match self.buffer.rfind(START) {
            Some(i) if before - i <= limit => i,
            _ if self.buffer.ends_with('<') => before - 1,
            _ => before,
        };
        self.buffer.drain(..keep_from);
        self.overflowed += keep_from as u64;
        trace!(dropped = keep_from, kept = self.buffer.len(), "reassembly buffer overflow");
    }

    /// Bytes currently held.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes discarded by the overflow policy.
    pub fn overflowed_bytes(&self) -> u64 {
        self.overflowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Top;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sample_frames() -> Vec<Frame> {
        vec![
            Frame::solicit("O.3", "1", "0", "0H", "5"),
            Frame::new("O.3", "1", "0H", "0", "5", Top::Ack),
            Frame::solicit("UD", "u", "05", "0", "17"),
            Frame::solicit("IM.7", "", "0", "0A.2", "511"),
        ]
    }

    fn wire_bytes(frames: &[Frame]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.encode().into_bytes()).collect()
    }

    #[test]
    fn single_push_yields_all_frames() {
        let frames = sample_frames();
        let mut r = Reassembler::new();
        assert_eq!(r.push(&wire_bytes(&frames)), frames);
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let f = Frame::solicit("O.3", "1", "0", "0H", "5");
        let bytes = f.encode().into_bytes();
        let mut r = Reassembler::new();
        assert!(r.push(&bytes[..7]).is_empty());
        assert_eq!(r.buffered(), 7);
        assert_eq!(r.push(&bytes[7..]), vec![f]);
    }

    #[test]
    fn every_split_point_yields_same_frames() {
        let frames = sample_frames();
        let bytes = wire_bytes(&frames);
        for a in 0..=bytes.len() {
            for b in a..=bytes.len() {
                let mut r = Reassembler::new();
                let mut got = r.push(&bytes[..a]);
                got.extend(r.push(&bytes[a..b]));
                got.extend(r.push(&bytes[b..]));
                assert_eq!(got, frames, "split at {a}/{b}");
            }
        }
    }

    #[test]
    fn byte_at_a_time() {
        let frames = sample_frames();
        let mut r = Reassembler::new();
        let got: Vec<Frame> = wire_bytes(&frames).iter().flat_map(|b| r.push(&[*b])).collect();
        assert_eq!(got, frames);
    }

    #[test]
    fn garbage_is_skipped() {
        let frames = sample_frames();
        let mut bytes = b"\x00\xffnoise<".to_vec();
        for f in &frames {
            bytes.extend_from_slice(f.encode().as_bytes());
            bytes.extend_from_slice(b"junk;>\xc3\xa9>>");
        }
        bytes.extend_from_slice(b"trailing <");
        let mut r = Reassembler::new();
        assert_eq!(r.push(&bytes), frames);
    }

    #[test]
    fn random_garbage_and_chunking() {
        let frames = sample_frames();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let mut bytes = Vec::new();
            for f in &frames {
                let noise = rng.gen_range(0..12);
                // Noise never forms a start marker, so it cannot swallow a frame.
                bytes.extend((0..noise).map(|_| match rng.gen_range(0..4) {
                    0 => b'>',
                    1 => 0xAA,
                    2 => b'x',
                    _ => b'\n',
                }));
                bytes.extend_from_slice(f.encode().as_bytes());
            }
            let mut r = Reassembler::new();
            let mut got = Vec::new();
            let mut pos = 0;
            while pos < bytes.len() {
                let n = rng.gen_range(1..=16).min(bytes.len() - pos);
                got.extend(r.push(&bytes[pos..pos + n]));
                pos += n;
            }
            assert_eq!(got, frames);
        }
    }

    #[test]
    fn malformed_slice_does_not_stop_stream() {
        let good = Frame::solicit("O.3", "1", "0", "0H", "5");
        let mut bytes = b"<;too;short;>\r\n<;O.3;1;0;0H;5;q;1;>\r\n".to_vec();
        bytes.extend_from_slice(good.encode().as_bytes());
        let mut r = Reassembler::new();
        assert_eq!(r.push(&bytes), vec![good]);
        assert_eq!(r.buffered(), 2);
    }

    #[test]
    fn checksum_mismatch_is_still_yielded() {
        let mut r = Reassembler::new();
        let got = r.push(b"<;O.3;1;0;0H;5;s;999;>\r\n");
        assert_eq!(got.len(), 1);
        assert!(!got[0].is_valid());
    }

    #[test]
    fn unbounded_by_default() {
        let mut r = Reassembler::new();
        r.push(b"<;");
        r.push(&vec![b'x'; DEFAULT_MAX_BUFFER * 2]);
        assert_eq!(r.buffered(), DEFAULT_MAX_BUFFER * 2 + 2);
        assert_eq!(r.overflowed_bytes(), 0);
    }

    #[test]
    fn limit_resynchronises_on_newest_start_marker() {
        let mut r = Reassembler::with_limit(32);
        r.push(b"<;");
        r.push(&[b'x'; 40]);
        // Unterminated frame larger than the cap: nothing can be kept.
        assert_eq!(r.buffered(), 0);
        assert_eq!(r.overflowed_bytes(), 42);

        r.push(&[b'y'; 40]);
        r.push(b"<;O.3;1;0;");
        assert_eq!(r.buffered(), 10);

        let f = Frame::solicit("O.3", "1", "0", "0H", "5");
        let tail = &f.encode()[10..];
        assert_eq!(r.push(tail.as_bytes()), vec![f]);
    }

    #[test]
    fn limit_keeps_trailing_partial_marker() {
        let mut r = Reassembler::with_limit(8);
        r.push(b"garbage-garbage<");
        assert_eq!(r.buffered(), 1);
        let f = Frame::solicit("GI", "0", "0", "05", "1");
        let tail = &f.encode()[1..];
        assert_eq!(r.push(tail.as_bytes()), vec![f]);
    }
}
