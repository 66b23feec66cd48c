// src/io/sink.rs
//
// MessageSink implementations used by the bridge.

use std::io::Write;

use tokio::sync::mpsc;

use super::{MessageSink, ParsedMessage};

// ============================================================================
// Channel Sink
// ============================================================================

/// Hands messages from the blocking engine thread to an async consumer.
///
/// Never blocks: when the channel is full the message is dropped, and when
/// the consumer is gone every message is dropped. Each condition is logged
/// once per run.
pub struct ChannelSink {
    tx: mpsc::Sender<ParsedMessage>,
    dropped: u64,
    closed: bool,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ParsedMessage>) -> Self {
        Self {
            tx,
            dropped: 0,
            closed: false,
        }
    }

    /// Messages dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl MessageSink for ChannelSink {
    fn emit(&mut self, message: ParsedMessage) {
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                if self.dropped == 0 {
                    tlog!("[bridge] Downstream queue full, dropping messages");
                }
                self.dropped += 1;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                if !self.closed {
                    tlog!("[bridge] Downstream consumer has gone away");
                    self.closed = true;
                }
                self.dropped += 1;
            }
        }
    }
}

// ============================================================================
// JSON Lines Sink
// ============================================================================

/// Writes one JSON payload per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
    failed: bool,
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        JsonLinesSink::new(std::io::stdout())
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, failed: false }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_message(&mut self, message: &ParsedMessage) -> Result<(), super::IoError> {
        serde_json::to_writer(&mut self.out, &message.payload())?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> MessageSink for JsonLinesSink<W> {
    fn emit(&mut self, message: ParsedMessage) {
        if let Err(e) = self.write_message(&message) {
            if !self.failed {
                tlog!("[bridge] Failed to write message: {}", e);
                self.failed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = ChannelSink::new(tx);
        sink.emit(ParsedMessage::new(vec![1, 2]));
        sink.emit(ParsedMessage::new(vec![3, 4]));

        assert_eq!(rx.try_recv().unwrap().data, vec![1, 2]);
        assert_eq!(rx.try_recv().unwrap().data, vec![3, 4]);
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);
        sink.emit(ParsedMessage::new(vec![1]));
        sink.emit(ParsedMessage::new(vec![2]));

        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().data, vec![1]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        sink.emit(ParsedMessage::new(vec![1]));
        sink.emit(ParsedMessage::new(vec![2]));
        assert_eq!(sink.dropped(), 2);
    }

    #[test]
    fn test_json_lines_sink_output() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(ParsedMessage::new(vec![7]));
        sink.emit(ParsedMessage::default());

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(r#""data":[7]}"#));
        assert!(lines[1].contains(r#""size":0"#));
    }
}
