// src/io/types.rs
//
// Message types handed from the line engine to the sinks.

use serde::Serialize;

/// Payload bytes around the values: the layout object (with a `size` of up
/// to 10 digits), the `data` key and the brackets.
const PAYLOAD_ENVELOPE_LEN: usize = 128;

// ============================================================================
// Parsed Messages
// ============================================================================

/// One decoded line: the integers in wire order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    pub data: Vec<i32>,
}

impl ParsedMessage {
    pub fn new(data: Vec<i32>) -> Self {
        Self { data }
    }

    /// Number of values, published as the `length` dimension size.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bus payload view of this message.
    pub fn payload(&self) -> MultiArrayPayload<'_> {
        MultiArrayPayload {
            layout: MultiArrayLayout {
                dim: vec![MultiArrayDimension {
                    label: "length",
                    size: self.len() as u32,
                    stride: 1,
                }],
                data_offset: 0,
            },
            data: &self.data,
        }
    }
}

/// Largest JSON payload a line of at most `max_line_len` bytes can produce.
///
/// A value never prints longer than its wire token (no sign or leading zeros
/// are added) and `,` replaces `;` one for one.
pub fn max_payload_len(max_line_len: usize) -> usize {
    max_line_len + PAYLOAD_ENVELOPE_LEN
}

// ============================================================================
// Bus Payload Types
// ============================================================================

/// Multi-array payload: a single `length` dimension plus the values.
///
/// ```json
/// {"layout":{"dim":[{"label":"length","size":3,"stride":1}],"data_offset":0},"data":[1,2,3]}
/// ```
#[derive(Debug, Serialize)]
pub struct MultiArrayPayload<'a> {
    pub layout: MultiArrayLayout,
    pub data: &'a [i32],
}

#[derive(Debug, Serialize)]
pub struct MultiArrayLayout {
    pub dim: Vec<MultiArrayDimension>,
    pub data_offset: u32,
}

#[derive(Debug, Serialize)]
pub struct MultiArrayDimension {
    pub label: &'static str,
    pub size: u32,
    pub stride: u32,
}
