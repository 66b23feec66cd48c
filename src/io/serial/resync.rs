// src/io/serial/resync.rs
//
// Stream realignment after corruption or at startup.
//
// The protocol has no checksum, so a bad byte cannot be located within its
// line. Recovery drops everything pending and skips ahead to the next line
// feed; the byte after it starts a fresh line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use super::framer::{PendingBuffer, LINE_FEED};
use crate::io::{ByteSource, IoError};

// =============================================================================
// Policy
// =============================================================================

/// Timing and retry bounds for a resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResyncPolicy {
    /// Pause before scanning so the device can settle after a reset.
    pub settle_delay: Duration,
    /// Pause after a read that produced no byte.
    pub backoff: Duration,
    /// Give up after this many single-byte reads. `None` waits forever.
    pub max_attempts: Option<u64>,
}

impl Default for ResyncPolicy {
    fn default() -> Self {
        ResyncPolicy {
            settle_delay: Duration::from_millis(1),
            backoff: Duration::from_micros(1),
            max_attempts: None,
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// What a resync threw away and whether it found a line boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// A line feed was consumed; the next byte begins a line.
    pub aligned: bool,
    /// Buffered bytes dropped on entry.
    pub discarded_pending: usize,
    /// Bytes read and dropped while scanning, line feed included.
    pub discarded_stream: usize,
    /// Single-byte reads issued.
    pub attempts: u64,
    /// Reads that failed and were treated as empty.
    pub read_errors: u64,
}

impl ResyncReport {
    pub fn discarded(&self) -> usize {
        self.discarded_pending + self.discarded_stream
    }

    /// `Err(Timeout)` when the attempt budget ran out before a line feed.
    pub fn ensure_aligned(&self, device: &str) -> Result<(), IoError> {
        if self.aligned {
            Ok(())
        } else {
            Err(IoError::timeout(device, "resync"))
        }
    }
}

// =============================================================================
// Resync
// =============================================================================

/// Clear `pending`, then read one byte at a time until a line feed arrives.
///
/// Read errors count as empty reads. With `max_attempts: None` this blocks
/// until the device sends a line feed.
pub fn resync<S: ByteSource + ?Sized>(
    source: &mut S,
    pending: &mut PendingBuffer,
    policy: &ResyncPolicy,
) -> ResyncReport {
    resync_until(source, pending, policy, None)
}

/// `resync` that also returns unaligned as soon as `cancel` is set.
pub fn resync_until<S: ByteSource + ?Sized>(
    source: &mut S,
    pending: &mut PendingBuffer,
    policy: &ResyncPolicy,
    cancel: Option<&AtomicBool>,
) -> ResyncReport {
    scan(source, pending, policy, cancel, thread::sleep)
}

/// Settle, clear, then scan for a line feed. Every pause goes through `sleep`;
/// zero-length pauses are skipped.
fn scan<S, F>(
    source: &mut S,
    pending: &mut PendingBuffer,
    policy: &ResyncPolicy,
    cancel: Option<&AtomicBool>,
    mut sleep: F,
) -> ResyncReport
where
    S: ByteSource + ?Sized,
    F: FnMut(Duration),
{
    if !policy.settle_delay.is_zero() {
        sleep(policy.settle_delay);
    }

    let mut report = ResyncReport {
        discarded_pending: pending.clear(),
        ..ResyncReport::default()
    };
    let mut read_failing = false;

    while policy.max_attempts.is_none_or(|max| report.attempts < max) {
        if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            break;
        }
        report.attempts += 1;
        match source.read_one() {
            Ok(Some(byte)) => {
                read_failing = false;
                report.discarded_stream += 1;
                if byte == LINE_FEED {
                    report.aligned = true;
                    return report;
                }
                continue;
            }
            Ok(None) => read_failing = false,
            Err(e) => {
                if !read_failing {
                    tlog!("[engine] {} (resync keeps waiting)", e);
                    read_failing = true;
                }
                report.read_errors += 1;
            }
        }

        // Only after a read that produced nothing.
        if !policy.backoff.is_zero() {
            sleep(policy.backoff);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::test_support::ScriptedSource;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Sleep(Duration),
        Read(Option<u8>),
        Fail,
    }

    /// Replays single-byte read results and records them, in order, next to
    /// the sleeps `scan` performs.
    struct StepSource<'a> {
        reads: VecDeque<Result<Option<u8>, ()>>,
        log: &'a RefCell<Vec<Step>>,
    }

    impl ByteSource for StepSource<'_> {
        fn device(&self) -> &str {
            "steps"
        }

        fn available(&mut self) -> Result<usize, IoError> {
            Ok(0)
        }

        fn read_available(&mut self, _count: usize) -> Result<Vec<u8>, IoError> {
            Ok(Vec::new())
        }

        fn read_one(&mut self) -> Result<Option<u8>, IoError> {
            match self.reads.pop_front().unwrap_or(Ok(None)) {
                Ok(byte) => {
                    self.log.borrow_mut().push(Step::Read(byte));
                    Ok(byte)
                }
                Err(()) => {
                    self.log.borrow_mut().push(Step::Fail);
                    Err(IoError::read("steps", "device unplugged"))
                }
            }
        }
    }

    fn bounded(max_attempts: u64) -> ResyncPolicy {
        ResyncPolicy {
            settle_delay: Duration::ZERO,
            backoff: Duration::ZERO,
            max_attempts: Some(max_attempts),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = ResyncPolicy::default();
        assert_eq!(policy.settle_delay, Duration::from_millis(1));
        assert_eq!(policy.backoff, Duration::from_micros(1));
        assert_eq!(policy.max_attempts, None);
    }

    #[test]
    fn test_resync_clears_and_consumes_through_line_feed() {
        let mut pending = PendingBuffer::default();
        pending.append(b"1;2\n3;4\n99");
        let mut source = ScriptedSource::with_arrivals([b"4;5\n6;7\n".as_slice()]);

        let report = resync(&mut source, &mut pending, &bounded(100));

        assert!(report.aligned);
        assert!(pending.is_empty());
        assert_eq!(report.discarded_pending, 10);
        assert_eq!(report.discarded_stream, 4);
        assert_eq!(source.remaining(), b"6;7\n".to_vec());
    }

    #[test]
    fn test_resync_waits_across_empty_reads() {
        let mut source = ScriptedSource::new();
        let mut pending = PendingBuffer::default();

        let report = resync(&mut source, &mut pending, &bounded(5));
        assert!(!report.aligned);
        assert_eq!(report.attempts, 5);
        assert_eq!(source.empty_reads, 5);

        source.push(b"garbage\n");
        let report = resync(&mut source, &mut pending, &bounded(50));
        assert!(report.aligned);
        assert_eq!(report.discarded_stream, 8);
    }

    #[test]
    fn test_resync_twice_needs_two_line_feeds() {
        let mut source = ScriptedSource::with_arrivals([b"ab\n".as_slice(), b"\n12;3\n".as_slice()]);
        let mut pending = PendingBuffer::default();

        assert!(resync(&mut source, &mut pending, &bounded(10)).aligned);
        assert!(resync(&mut source, &mut pending, &bounded(10)).aligned);
        assert_eq!(source.remaining(), b"12;3\n".to_vec());
    }

    #[test]
    fn test_resync_gives_up_on_endless_garbage() {
        let mut source = ScriptedSource::with_arrivals([vec![b'x'; 64]]);
        let mut pending = PendingBuffer::default();

        let report = resync(&mut source, &mut pending, &bounded(16));
        assert!(!report.aligned);
        assert_eq!(report.discarded_stream, 16);
        assert!(matches!(
            report.ensure_aligned("scripted"),
            Err(IoError::Timeout { .. })
        ));
    }

    #[test]
    fn test_cancelled_resync_stops_waiting() {
        let mut source = ScriptedSource::new();
        let mut pending = PendingBuffer::default();
        pending.append(b"5;6");
        let unbounded = ResyncPolicy {
            settle_delay: Duration::ZERO,
            backoff: Duration::ZERO,
            max_attempts: None,
        };
        let cancel = AtomicBool::new(true);

        let report = resync_until(&mut source, &mut pending, &unbounded, Some(&cancel));
        assert!(!report.aligned);
        assert_eq!(report.attempts, 0);
        assert_eq!(report.discarded_pending, 3);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_settle_first_and_backoff_only_after_empty_reads() {
        let log = RefCell::new(Vec::new());
        let mut source = StepSource {
            reads: VecDeque::from([
                Ok(Some(b'1')),
                Ok(Some(b';')),
                Ok(None),
                Ok(None),
                Ok(Some(b'2')),
                Ok(Some(b'\n')),
            ]),
            log: &log,
        };
        let mut pending = PendingBuffer::default();
        pending.append(b"9;9");
        let settle = Duration::from_millis(5);
        let backoff = Duration::from_micros(7);
        let policy = ResyncPolicy {
            settle_delay: settle,
            backoff,
            max_attempts: None,
        };

        let report = scan(&mut source, &mut pending, &policy, None, |d| {
            log.borrow_mut().push(Step::Sleep(d))
        });

        assert!(report.aligned);
        assert_eq!(report.attempts, 6);
        assert_eq!(report.discarded_pending, 3);
        assert_eq!(report.discarded_stream, 4);
        assert!(pending.is_empty());
        assert_eq!(
            *log.borrow(),
            vec![
                Step::Sleep(settle),
                Step::Read(Some(b'1')),
                Step::Read(Some(b';')),
                Step::Read(None),
                Step::Sleep(backoff),
                Step::Read(None),
                Step::Sleep(backoff),
                Step::Read(Some(b'2')),
                Step::Read(Some(b'\n')),
            ]
        );
    }

    #[test]
    fn test_read_errors_back_off_and_are_counted() {
        let log = RefCell::new(Vec::new());
        let mut source = StepSource {
            reads: VecDeque::from([Err(()), Err(()), Ok(None), Err(()), Ok(Some(b'\n'))]),
            log: &log,
        };
        let backoff = Duration::from_micros(1);
        let policy = ResyncPolicy {
            settle_delay: Duration::ZERO,
            backoff,
            max_attempts: None,
        };

        let report = scan(&mut source, &mut PendingBuffer::default(), &policy, None, |d| {
            log.borrow_mut().push(Step::Sleep(d))
        });

        assert!(report.aligned);
        assert_eq!(report.read_errors, 3);
        assert_eq!(report.attempts, 5);
        assert_eq!(
            *log.borrow(),
            vec![
                Step::Fail,
                Step::Sleep(backoff),
                Step::Fail,
                Step::Sleep(backoff),
                Step::Read(None),
                Step::Sleep(backoff),
                Step::Fail,
                Step::Sleep(backoff),
                Step::Read(Some(b'\n')),
            ]
        );
    }

    #[test]
    fn test_zero_delays_never_sleep() {
        let log = RefCell::new(Vec::new());
        let mut source = StepSource {
            reads: VecDeque::new(),
            log: &log,
        };

        let report = scan(&mut source, &mut PendingBuffer::default(), &bounded(3), None, |d| {
            log.borrow_mut().push(Step::Sleep(d))
        });

        assert!(!report.aligned);
        assert_eq!(*log.borrow(), vec![Step::Read(None); 3]);
    }
}
