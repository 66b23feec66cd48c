// src/io/test_support.rs
//
// In-memory ByteSource for engine and resync tests.

use std::collections::VecDeque;

use super::{ByteSource, IoError};

/// Replays scripted arrivals. Each arrival is what `available()` reports on
/// one poll; `read_one()` drains arrivals byte by byte.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    arrivals: VecDeque<Vec<u8>>,
    /// `read_one` calls that found nothing.
    pub empty_reads: usize,
    /// When set, `available` fails this many times before recovering.
    pub fail_available: usize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arrivals<I, B>(arrivals: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut source = Self::new();
        for chunk in arrivals {
            source.push(chunk.as_ref());
        }
        source
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.arrivals.push_back(chunk.to_vec());
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> Vec<u8> {
        self.arrivals.iter().flatten().copied().collect()
    }

    fn drop_empty_front(&mut self) {
        while matches!(self.arrivals.front(), Some(chunk) if chunk.is_empty()) {
            self.arrivals.pop_front();
        }
    }
}

impl ByteSource for ScriptedSource {
    fn device(&self) -> &str {
        "scripted"
    }

    fn available(&mut self) -> Result<usize, IoError> {
        if self.fail_available > 0 {
            self.fail_available -= 1;
            return Err(IoError::read("scripted", "device unplugged"));
        }
        self.drop_empty_front();
        Ok(self.arrivals.front().map_or(0, Vec::len))
    }

    fn read_available(&mut self, count: usize) -> Result<Vec<u8>, IoError> {
        self.drop_empty_front();
        let Some(chunk) = self.arrivals.front_mut() else {
            return Ok(Vec::new());
        };
        let take = count.min(chunk.len());
        Ok(chunk.drain(..take).collect())
    }

    fn read_one(&mut self) -> Result<Option<u8>, IoError> {
        self.drop_empty_front();
        match self.arrivals.front_mut() {
            Some(chunk) => Ok(Some(chunk.remove(0))),
            None => {
                self.empty_reads += 1;
                Ok(None)
            }
        }
    }
}
