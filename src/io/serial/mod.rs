// src/io/serial/mod.rs
//
// Serial line protocol: framing, validation, resync and integer parsing.
//
// Wire format: ASCII lines of `;`-separated decimal integers, `\n`-terminated,
// with an optional `\r` before the line feed.

pub mod codec;
pub mod framer;
pub mod reader;
pub mod resync;
pub(crate) mod utils;

pub use codec::{IntegerLineCodec, ParseFailure};
pub use framer::{is_valid_stream, PendingBuffer, DEFAULT_MAX_BUFFER_LEN};
pub use reader::{
    list_serial_ports, EngineState, EngineStats, LineEngine, ResyncReason, SerialConfig,
    SerialPortInfo, SerialSource, TickOutcome,
};
pub use resync::{resync, resync_until, ResyncPolicy, ResyncReport};
pub use utils::Parity;
