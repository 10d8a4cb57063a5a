//! Homiq bus protocol: frame value, frame type and addressing constants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::wire;

/// Address of the controller/gateway on the bus. Acknowledgements we build
/// are always sent from here.
pub const GATEWAY_ADDR: &str = "0";

/// Field separator inside a frame.
pub const FIELD_SEP: char = ';';

/// Frame type flag: an outgoing command or its acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Top {
    #[serde(rename = "s")]
    Solicit,
    #[serde(rename = "a")]
    Ack,
}

impl Top {
    /// Wire letter (`s` or `a`).
    pub fn as_str(self) -> &'static str {
        match self {
            Top::Solicit => "s",
            Top::Ack => "a",
        }
    }
}

impl fmt::Display for Top {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Top {
    type Err = ParseTopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s" => Ok(Top::Solicit),
            "a" => Ok(Top::Ack),
            other => Err(ParseTopError(other.to_string())),
        }
    }
}

/// Frame type letter was neither `s` nor `a`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown frame type {0:?} (expected \"s\" or \"a\")")]
pub struct ParseTopError(pub String);

/// One protocol message. Fields are kept as the text seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    pub cmd: String,
    pub val: String,
    pub src: String,
    pub dst: String,
    pub pkt: String,
    pub top: Top,
    pub crc: String,
}

impl Frame {
    /// Build a frame with its checksum computed over the canonical payload.
    pub fn new(
        cmd: impl Into<String>,
        val: impl Into<String>,
        src: impl Into<String>,
        dst: impl Into<String>,
        pkt: impl Into<String>,
        top: Top,
    ) -> Self {
        let (cmd, val, src, dst, pkt) =
            (cmd.into(), val.into(), src.into(), dst.into(), pkt.into());
        let crc = wire::compute_crc(&cmd, &val, &src, &dst, &pkt, top).to_string();
        Self {
            cmd,
            val,
            src,
            dst,
            pkt,
            top,
            crc,
        }
    }

    /// A command frame (`top = s`).
    pub fn solicit(
        cmd: impl Into<String>,
        val: impl Into<String>,
        src: impl Into<String>,
        dst: impl Into<String>,
        pkt: impl Into<String>,
    ) -> Self {
        Self::new(cmd, val, src, dst, pkt, Top::Solicit)
    }

    /// `cmd‖val‖src‖dst‖pkt‖top`, the bytes the checksum covers.
    pub fn crc_payload(&self) -> String {
        wire::crc_payload(&self.cmd, &self.val, &self.src, &self.dst, &self.pkt, self.top)
    }

    /// Wire text of this frame, CRLF-terminated. `crc` is rendered verbatim.
    pub fn encode(&self) -> String {
        format!(
            "<;{};{};{};{};{};{};{};>\r\n",
            self.cmd, self.val, self.src, self.dst, self.pkt, self.top, self.crc
        )
    }

    /// Whether the stored checksum matches the fields.
    pub fn is_valid(&self) -> bool {
        wire::validate(self)
    }

    /// Whether `self` is the acknowledgement of `command`.
    ///
    /// Addresses are mirrored and the packet counter must match. The value is
    /// not compared: modules may ack with a different value than requested.
    pub fn acknowledges(&self, command: &Frame) -> bool {
        self.top == Top::Ack
            && self.cmd == command.cmd
            && self.src == command.dst
            && self.dst == command.src
            && self.pkt == command.pkt
    }
}

/// Packet counter text could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("packet counter {0:?} is not a decimal number")]
    NotDecimal(String),
}

/// Canonical decimal form of a packet counter (`"007"` becomes `"7"`).
/// Signed values are kept; anything outside `i64` is rejected.
pub fn normalize_pkt(text: &str) -> Result<String, PacketError> {
    text.trim()
        .parse::<i64>()
        .map(|n| n.to_string())
        .map_err(|_| PacketError::NotDecimal(text.to_string()))
}
