//! Output formats for `sniff` and `doctor`.

use std::collections::BTreeMap;
use std::time::Duration;

use homiq_core::{Diagnostics, Frame, Snapshot};
use serde::Serialize;

use crate::transport::Endpoint;

/// CRC failure rate above which the doctor flags the link.
const CRC_BAD_RATE_HINT: f64 = 0.05;

/// One human-readable sniff line.
pub fn frame_line(f: &Frame, crc_ok: bool) -> String {
    let flag = if crc_ok { "OK" } else { "CRC_BAD" };
    format!(
        "{:>4} -> {:<4} top={} pkt={:>3} {:<6} val={} {}",
        f.src,
        f.dst,
        f.top,
        f.pkt,
        f.cmd,
        quote(&f.val),
        flag
    )
}

/// Quote a value the way the legacy sniffer did: single quotes, switching
/// to double quotes when the value holds a `'` and no `"`.
fn quote(val: &str) -> String {
    let delim = if val.contains('\'') && !val.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(val.len() + 2);
    out.push(delim);
    for c in val.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if c == delim => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(delim);
    out
}

#[derive(Serialize)]
struct FrameRecord<'a> {
    #[serde(flatten)]
    frame: &'a Frame,
    crc_ok: bool,
}

/// One JSON sniff line: the frame's fields plus `crc_ok`.
pub fn frame_json(f: &Frame, crc_ok: bool) -> serde_json::Result<String> {
    serde_json::to_string(&FrameRecord { frame: f, crc_ok })
}

/// Summary printed when `sniff` ends.
#[derive(Debug, Serialize)]
pub struct SniffSummary {
    pub frames: u64,
    pub crc_bad: u64,
    pub crc_bad_rate: f64,
    pub top_counts: BTreeMap<String, u64>,
    pub top_src: Vec<(String, u64)>,
    pub top_cmd: Vec<(String, u64)>,
    /// Bytes dropped by the reassembly buffer cap.
    pub overflowed_bytes: u64,
    pub duration_s: f64,
}

impl SniffSummary {
    pub fn new(diag: &Diagnostics, overflowed_bytes: u64, elapsed: Duration) -> Self {
        let s = diag.snapshot(10, 20);
        Self {
            frames: s.frame_count,
            crc_bad: s.crc_bad_count,
            crc_bad_rate: s.crc_bad_rate,
            top_counts: s.counts_by_top,
            top_src: s.counts_by_src,
            top_cmd: s.counts_by_cmd,
            overflowed_bytes,
            duration_s: elapsed.as_secs_f64(),
        }
    }
}

/// Report written by `doctor`.
#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub tool: &'static str,
    pub duration_s: f64,
    pub transport: Endpoint,
    pub frames: u64,
    pub crc_bad: u64,
    pub crc_bad_rate: f64,
    pub top_counts: BTreeMap<String, u64>,
    pub top_src: Vec<(String, u64)>,
    pub top_cmd: Vec<(String, u64)>,
    pub overflowed_bytes: u64,
    pub hints: Vec<String>,
}

impl DoctorReport {
    pub fn new(
        transport: Endpoint,
        diag: &Diagnostics,
        overflowed_bytes: u64,
        elapsed: Duration,
        auto_ack: bool,
    ) -> Self {
        let s = diag.snapshot(20, 30);
        let mut hints = hints(&s, auto_ack);
        if overflowed_bytes > 0 {
            hints.push(format!(
                "Dropped {overflowed_bytes} bytes without a frame terminator: wrong baud rate or a non-Homiq device?"
            ));
        }
        Self {
            tool: "homiq_doctor",
            duration_s: elapsed.as_secs_f64(),
            transport,
            frames: s.frame_count,
            crc_bad: s.crc_bad_count,
            crc_bad_rate: s.crc_bad_rate,
            top_counts: s.counts_by_top,
            top_src: s.counts_by_src,
            top_cmd: s.counts_by_cmd,
            overflowed_bytes,
            hints,
        }
    }
}

/// Likely causes for what the snapshot shows.
pub fn hints(s: &Snapshot, auto_ack: bool) -> Vec<String> {
    let count = |top: &str| s.counts_by_top.get(top).copied().unwrap_or(0);
    let mut out = Vec::new();
    if s.frame_count == 0 {
        out.push("No frames received: check wiring/port/host:port and whether the bus is active.".to_string());
    }
    if s.frame_count > 0 && s.crc_bad_rate > CRC_BAD_RATE_HINT {
        out.push(
            "High CRC mismatch rate: possible wrong CRC variant, truncated frames, or wrong serial settings."
                .to_string(),
        );
    }
    if count("s") > 0 && !auto_ack {
        out.push("You observed TOP=s frames but auto-ACK was disabled; devices may retry and flood.".to_string());
    }
    if s.frame_count > 0 && count("a") == 0 {
        out.push("No ACK frames observed: could be one-way traffic or gateway not acknowledging.".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use homiq_core::Top;

    #[test]
    fn sniff_line_layout() {
        let f = Frame::solicit("O.3", "1", "0", "0H", "5");
        assert_eq!(frame_line(&f, true), "   0 -> 0H   top=s pkt=  5 O.3    val='1' OK");
        assert!(frame_line(&f, false).ends_with("CRC_BAD"));
    }

    #[test]
    fn values_are_quoted_like_the_legacy_sniffer() {
        assert_eq!(quote(""), "''");
        assert_eq!(quote("u"), "'u'");
        assert_eq!(quote("it's"), "\"it's\"");
        assert_eq!(quote("a'\"b"), "'a\\'\"b'");
        assert_eq!(quote("a\\b"), "'a\\\\b'");
        assert_eq!(quote("\x01"), "'\\x01'");
    }

    #[test]
    fn sniff_json_flattens_frame() {
        let f = Frame::new("UD", "u", "05", "0", "3", Top::Ack);
        let v: serde_json::Value = serde_json::from_str(&frame_json(&f, false).unwrap()).unwrap();
        assert_eq!(v["cmd"], "UD");
        assert_eq!(v["top"], "a");
        assert_eq!(v["crc_ok"], false);
    }

    #[test]
    fn silent_bus_hint() {
        let s = Diagnostics::new().snapshot(10, 10);
        let h = hints(&s, false);
        assert_eq!(h.len(), 1);
        assert!(h[0].starts_with("No frames received"));
    }

    #[test]
    fn busy_bus_hints() {
        let mut d = Diagnostics::new();
        d.record(&Frame::solicit("I.3", "1", "05", "0", "1"), false);
        d.record(&Frame::solicit("I.3", "1", "05", "0", "2"), true);
        let h = hints(&d.snapshot(10, 10), false);
        assert_eq!(h.len(), 3);
        assert!(h[0].starts_with("High CRC"));
        assert!(h[1].contains("auto-ACK was disabled"));
        assert!(h[2].starts_with("No ACK frames"));

        assert_eq!(hints(&d.snapshot(10, 10), true).len(), 2);
    }

    #[test]
    fn doctor_report_json_shape() {
        let mut d = Diagnostics::new();
        d.record(&Frame::new("O.3", "1", "0H", "0", "5", Top::Ack), true);
        let endpoint: Endpoint = "10.10.20.201:4001".parse().unwrap();
        let report = DoctorReport::new(endpoint, &d, 0, Duration::from_secs(30), true);
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["tool"], "homiq_doctor");
        assert_eq!(v["transport"]["type"], "tcp");
        assert_eq!(v["frames"], 1);
        assert_eq!(v["top_src"], serde_json::json!([["0H", 1]]));
        assert_eq!(v["overflowed_bytes"], 0);
        assert_eq!(v["hints"], serde_json::json!([]));
    }

    #[test]
    fn overflow_shows_in_reports() {
        let d = Diagnostics::new();
        let summary = SniffSummary::new(&d, 4096, Duration::from_secs(1));
        let summary = serde_json::to_value(summary).unwrap();
        assert_eq!(summary["overflowed_bytes"], 4096);

        let endpoint = Endpoint::Serial {
            path: "/dev/ttyR00".into(),
            baud: 115_200,
        };
        let report = DoctorReport::new(endpoint, &d, 4096, Duration::from_secs(1), false);
        assert_eq!(report.overflowed_bytes, 4096);
        assert!(report.hints.last().is_some_and(|h| h.starts_with("Dropped 4096 bytes")));
    }
}
