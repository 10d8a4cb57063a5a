//! Passive link statistics: frame counts, checksum failures, busiest
//! sources and commands. One aggregator per session.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::protocol::Frame;

/// Occurrence counter that remembers first-seen order for tie-breaking.
#[derive(Debug, Default, Clone)]
struct Tally {
    counts: HashMap<String, (u64, usize)>,
}

impl Tally {
    fn record(&mut self, key: &str) {
        let next = self.counts.len();
        self.counts.entry(key.to_string()).or_insert((0, next)).0 += 1;
    }

    fn get(&self, key: &str) -> u64 {
        self.counts.get(key).map(|(n, _)| *n).unwrap_or(0)
    }

    /// `k` most frequent keys, count descending, ties in first-seen order.
    fn most_common(&self, k: usize) -> Vec<(String, u64)> {
        let mut all: Vec<(&String, &(u64, usize))> = self.counts.iter().collect();
        all.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        all.into_iter().take(k).map(|(key, (n, _))| (key.clone(), *n)).collect()
    }
}

/// Accumulates statistics over `(frame, crc_valid)` observations.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    frames: u64,
    crc_bad: u64,
    by_top: Tally,
    by_src: Tally,
    by_cmd: Tally,
}

/// Point-in-time view of a [`Diagnostics`] aggregator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub frame_count: u64,
    pub crc_bad_count: u64,
    pub crc_bad_rate: f64,
    pub counts_by_top: BTreeMap<String, u64>,
    pub counts_by_src: Vec<(String, u64)>,
    pub counts_by_cmd: Vec<(String, u64)>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one decoded frame and whether its checksum held.
    pub fn record(&mut self, frame: &Frame, crc_valid: bool) {
        self.frames += 1;
        if !crc_valid {
            self.crc_bad += 1;
        }
        self.by_top.record(frame.top.as_str());
        self.by_src.record(&frame.src);
        self.by_cmd.record(&frame.cmd);
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Frames seen with the given type letter (`s` or `a`).
    pub fn top_count(&self, top: &str) -> u64 {
        self.by_top.get(top)
    }

    /// Fraction of frames with a bad checksum; 0.0 before any frame.
    pub fn crc_bad_rate(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.crc_bad as f64 / self.frames as f64
        }
    }

    /// Snapshot with the `src_k` busiest sources and `cmd_k` busiest commands.
    pub fn snapshot(&self, src_k: usize, cmd_k: usize) -> Snapshot {
        Snapshot {
            frame_count: self.frames,
            crc_bad_count: self.crc_bad,
            crc_bad_rate: self.crc_bad_rate(),
            counts_by_top: self
                .by_top
                .counts
                .iter()
                .map(|(k, (n, _))| (k.clone(), *n))
                .collect(),
            counts_by_src: self.by_src.most_common(src_k),
            counts_by_cmd: self.by_cmd.most_common(cmd_k),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Top;

    fn frame(cmd: &str, src: &str, top: Top) -> Frame {
        Frame::new(cmd, "1", src, "0", "1", top)
    }

    #[test]
    fn empty_snapshot() {
        let s = Diagnostics::new().snapshot(10, 10);
        assert_eq!(s.frame_count, 0);
        assert_eq!(s.crc_bad_rate, 0.0);
        assert!(s.counts_by_top.is_empty());
        assert!(s.counts_by_src.is_empty());
    }

    #[test]
    fn counts_and_rate() {
        let mut d = Diagnostics::new();
        d.record(&frame("O.3", "05", Top::Solicit), true);
        d.record(&frame("O.3", "05", Top::Ack), false);
        d.record(&frame("UD", "0H", Top::Solicit), true);
        d.record(&frame("GI", "0H", Top::Solicit), true);
        let s = d.snapshot(10, 10);
        assert_eq!(s.frame_count, 4);
        assert_eq!(s.crc_bad_count, 1);
        assert_eq!(s.crc_bad_rate, 0.25);
        assert_eq!(s.counts_by_top.get("s"), Some(&3));
        assert_eq!(s.counts_by_top.get("a"), Some(&1));
        assert_eq!(d.top_count("a"), 1);
        assert_eq!(d.top_count("x"), 0);
    }

    #[test]
    fn top_k_orders_by_count_then_first_seen() {
        let mut d = Diagnostics::new();
        for (cmd, src) in [("A", "1"), ("B", "2"), ("B", "2"), ("C", "3"), ("A", "3"), ("D", "4")] {
            d.record(&frame(cmd, src, Top::Solicit), true);
        }
        let s = d.snapshot(2, 3);
        assert_eq!(s.counts_by_src, vec![("2".to_string(), 2), ("3".to_string(), 2)]);
        assert_eq!(
            s.counts_by_cmd,
            vec![("A".to_string(), 2), ("B".to_string(), 2), ("C".to_string(), 1)]
        );
    }

    #[test]
    fn aggregators_are_independent() {
        let mut a = Diagnostics::new();
        let b = Diagnostics::new();
        a.record(&frame("O.3", "05", Top::Solicit), true);
        assert_eq!(a.frame_count(), 1);
        assert_eq!(b.frame_count(), 0);
    }
}
