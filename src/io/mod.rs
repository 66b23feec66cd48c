// src/io/mod.rs
//
// Device and bus boundaries for the serial bridge.
// The line engine reads from a `ByteSource` and writes to a `MessageSink`;
// concrete serial, MQTT and stdout implementations live in the submodules.

mod error;
mod types;

pub mod mqtt;
pub mod serial;
pub mod sink;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::IoError;
pub use types::{
    max_payload_len, MultiArrayDimension, MultiArrayLayout, MultiArrayPayload, ParsedMessage,
};

// ============================================================================
// Boundary Traits
// ============================================================================

/// Byte provider the line engine drains.
pub trait ByteSource {
    /// Label used in log lines and errors, e.g. `serial(/dev/ttyACM0)`.
    fn device(&self) -> &str;

    /// Bytes ready to read without blocking.
    fn available(&mut self) -> Result<usize, IoError>;

    /// Read up to `count` bytes without blocking.
    fn read_available(&mut self, count: usize) -> Result<Vec<u8>, IoError>;

    /// Read a single byte, waiting at most the source's read timeout.
    /// `Ok(None)` means nothing arrived in time.
    fn read_one(&mut self) -> Result<Option<u8>, IoError>;
}

/// Downstream consumer of parsed lines. Fire-and-forget: no acknowledgement.
pub trait MessageSink {
    fn emit(&mut self, message: ParsedMessage);
}

impl<T: MessageSink + ?Sized> MessageSink for Box<T> {
    fn emit(&mut self, message: ParsedMessage) {
        (**self).emit(message);
    }
}

impl MessageSink for Vec<ParsedMessage> {
    fn emit(&mut self, message: ParsedMessage) {
        self.push(message);
    }
}
