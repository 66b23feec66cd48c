// src/lib.rs
//
// Serial-to-bus bridge: frames semicolon-separated integer lines from a
// serial device and publishes each line as a message.

#[macro_use]
mod logging;

pub mod bridge;
pub mod io;
pub mod settings;

pub use bridge::run;
pub use io::serial::{list_serial_ports, EngineStats, LineEngine, SerialConfig};
pub use io::{ByteSource, IoError, MessageSink, ParsedMessage};
pub use logging::{init_file_logging, stop_file_logging};
pub use settings::{BridgeSettings, SinkKind};
