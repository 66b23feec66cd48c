// src/io/serial/framer.rs
//
// Line framing for the integer-line protocol.
// Accumulates raw serial bytes, checks the whole pending buffer against the
// protocol alphabet, and extracts newline-terminated lines.

// =============================================================================
// Constants
// =============================================================================

/// Line terminator.
pub const LINE_FEED: u8 = 0x0A;
const CARRIAGE_RETURN: u8 = 0x0D;
const SEPARATOR: u8 = b';';

/// Pending bytes allowed before the stream is treated as corrupt.
pub const DEFAULT_MAX_BUFFER_LEN: usize = 50_000;

// =============================================================================
// Validation
// =============================================================================

/// Bytes that may legally appear on the wire.
fn is_stream_byte(byte: u8) -> bool {
    byte.is_ascii_digit() || matches!(byte, SEPARATOR | LINE_FEED | CARRIAGE_RETURN)
}

/// Check a byte stream against the length bound and the protocol alphabet
/// (digits, `;`, `\n`, `\r`). One bad byte anywhere fails the whole stream.
pub fn is_valid_stream(bytes: &[u8], max_len: usize) -> bool {
    bytes.len() <= max_len && bytes.iter().all(|&b| is_stream_byte(b))
}

// =============================================================================
// Pending Buffer
// =============================================================================

/// Bytes read from the device but not yet consumed as complete lines.
#[derive(Debug)]
pub struct PendingBuffer {
    buffer: Vec<u8>,
    max_len: usize,
}

impl Default for PendingBuffer {
    fn default() -> Self {
        PendingBuffer::new(DEFAULT_MAX_BUFFER_LEN)
    }
}

impl PendingBuffer {
    pub fn new(max_len: usize) -> Self {
        PendingBuffer {
            buffer: Vec::with_capacity(max_len.min(4096)),
            max_len,
        }
    }

    /// Append newly read bytes. Bounds are checked by `is_valid`, not here.
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Validate everything currently pending, not just the last append.
    pub fn is_valid(&self) -> bool {
        is_valid_stream(&self.buffer, self.max_len)
    }

    /// Drop all pending bytes, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        discarded
    }

    /// Remove the first complete line from the front of the buffer.
    ///
    /// The returned line excludes its line feed; the line feed is consumed too.
    /// Returns `None` while no line feed is pending.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|&b| b == LINE_FEED)?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        Some(line)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALPHABET: &[u8] = b"0123456789;\n\r";

    #[test]
    fn test_append_accumulates() {
        let mut buf = PendingBuffer::default();
        buf.append(b"12;");
        buf.append(b"34");
        assert_eq!(buf.as_bytes(), b"12;34");
        assert!(buf.next_line().is_none());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_next_line_trims_exactly() {
        let mut buf = PendingBuffer::default();
        buf.append(b"1;2\n3;4\n5;");

        assert_eq!(buf.next_line(), Some(b"1;2".to_vec()));
        assert_eq!(buf.as_bytes(), b"3;4\n5;");
        assert_eq!(buf.next_line(), Some(b"3;4".to_vec()));
        assert_eq!(buf.as_bytes(), b"5;");
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.as_bytes(), b"5;");
    }

    #[test]
    fn test_next_line_empty_line() {
        let mut buf = PendingBuffer::default();
        buf.append(b"\n\n");
        assert_eq!(buf.next_line(), Some(Vec::new()));
        assert_eq!(buf.next_line(), Some(Vec::new()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_invalid_byte_poisons_earlier_content() {
        let mut buf = PendingBuffer::default();
        buf.append(b"1;2\n3;4\n");
        assert!(buf.is_valid());
        buf.append(b"x");
        assert!(!buf.is_valid());
    }

    #[test]
    fn test_length_bound_is_inclusive() {
        let mut buf = PendingBuffer::new(DEFAULT_MAX_BUFFER_LEN);
        buf.append(&vec![b'7'; DEFAULT_MAX_BUFFER_LEN]);
        assert!(buf.is_valid());
        buf.append(b"7");
        assert!(!buf.is_valid());
    }

    #[test]
    fn test_clear_reports_discarded() {
        let mut buf = PendingBuffer::new(16);
        buf.append(b"12;3");
        assert_eq!(buf.clear(), 4);
        assert!(buf.is_empty());
        assert_eq!(buf.max_len(), 16);
    }

    fn alphabet_bytes(max: usize) -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(proptest::sample::select(ALPHABET.to_vec()), 0..max)
    }

    proptest! {
        #[test]
        fn prop_alphabet_within_bound_is_valid(bytes in alphabet_bytes(2048)) {
            prop_assert!(is_valid_stream(&bytes, DEFAULT_MAX_BUFFER_LEN));
        }

        #[test]
        fn prop_foreign_byte_is_invalid(
            bytes in alphabet_bytes(512),
            bad in any::<u8>().prop_filter("outside alphabet", |b| !ALPHABET.contains(b)),
            at in any::<proptest::sample::Index>(),
        ) {
            let mut bytes = bytes;
            let pos = at.index(bytes.len() + 1);
            bytes.insert(pos, bad);
            prop_assert!(!is_valid_stream(&bytes, DEFAULT_MAX_BUFFER_LEN));
        }

        #[test]
        fn prop_over_bound_is_invalid(bytes in alphabet_bytes(64), max in 0usize..32) {
            prop_assume!(bytes.len() > max);
            prop_assert!(!is_valid_stream(&bytes, max));
        }
    }
}
