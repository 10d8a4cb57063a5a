//! Framing: `<;CMD;VAL;SRC;DST;PKT;TOP;CRC;>` + CRLF, ASCII text.

use crate::checksum;
use crate::protocol::{Frame, Top, FIELD_SEP, GATEWAY_ADDR};

/// Frame start marker.
pub const START: &str = "<;";
/// Frame end marker.
pub const END: &str = ";>";
/// Line terminator appended after every encoded frame.
pub const TERMINATOR: &str = "\r\n";

/// Number of fields between the markers that decode uses.
const FIELD_COUNT: usize = 7;

/// Encode a frame from its parts. `crc` is written as decimal.
pub fn encode_frame(
    cmd: &str,
    val: &str,
    src: &str,
    dst: &str,
    pkt: &str,
    top: Top,
    crc: u8,
) -> String {
    format!("{START}{cmd};{val};{src};{dst};{pkt};{top};{crc}{END}{TERMINATOR}")
}

/// Decode one frame from `raw`. Surrounding whitespace is ignored.
///
/// Returns `None` unless the markers are present, there are at least seven
/// fields and the type letter is known. Fields past the seventh are ignored.
pub fn decode_frame(raw: &str) -> Option<Frame> {
    let body = raw.trim().strip_prefix(START)?.strip_suffix(END)?;
    let mut parts = body.split(FIELD_SEP);
    let mut fields: [&str; FIELD_COUNT] = [""; FIELD_COUNT];
    for slot in fields.iter_mut() {
        *slot = parts.next()?;
    }
    let [cmd, val, src, dst, pkt, top, crc] = fields;
    let top = top.parse::<Top>().ok()?;
    Some(Frame {
        cmd: cmd.to_string(),
        val: val.to_string(),
        src: src.to_string(),
        dst: dst.to_string(),
        pkt: pkt.to_string(),
        top,
        crc: crc.to_string(),
    })
}

/// Canonical checksum payload: fields concatenated without separators.
pub fn crc_payload(cmd: &str, val: &str, src: &str, dst: &str, pkt: &str, top: Top) -> String {
    let mut out =
        String::with_capacity(cmd.len() + val.len() + src.len() + dst.len() + pkt.len() + 1);
    for part in [cmd, val, src, dst, pkt, top.as_str()] {
        out.push_str(part);
    }
    out
}

/// Checksum over the canonical payload of the given fields.
pub fn compute_crc(cmd: &str, val: &str, src: &str, dst: &str, pkt: &str, top: Top) -> u8 {
    checksum::checksum(crc_payload(cmd, val, src, dst, pkt, top).as_bytes())
}

/// Whether `frame.crc` is a decimal number matching the computed checksum
/// (compared modulo 256). Unparsable checksum text is invalid.
pub fn validate(frame: &Frame) -> bool {
    let Ok(got) = frame.crc.trim().parse::<i64>() else {
        return false;
    };
    let expected =
        compute_crc(&frame.cmd, &frame.val, &frame.src, &frame.dst, &frame.pkt, frame.top);
    (got & 0xFF) as u8 == expected
}

/// Acknowledgement for a received solicit frame, sent from the gateway
/// address back to the frame's source.
pub fn make_ack(request: &Frame) -> Frame {
    Frame::new(
        request.cmd.clone(),
        request.val.clone(),
        GATEWAY_ADDR,
        request.src.clone(),
        request.pkt.clone(),
        Top::Ack,
    )
}
