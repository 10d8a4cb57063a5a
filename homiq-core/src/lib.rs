//! Homiq bus protocol engine.
//! Host-driven: no I/O; host feeds link bytes and events, receives frames and effects.

pub mod checksum;
pub mod command;
pub mod diagnostics;
pub mod protocol;
pub mod stream;
pub mod wire;

pub use command::{CommandEngine, CommandState, Effect, Event, Outcome, PendingCommand, RetryPolicy};
pub use diagnostics::{Diagnostics, Snapshot};
pub use protocol::{normalize_pkt, Frame, PacketError, ParseTopError, Top, GATEWAY_ADDR};
pub use stream::Reassembler;
pub use wire::{compute_crc, decode_frame, encode_frame, make_ack, validate};
