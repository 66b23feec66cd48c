// src/io/serial/reader.rs
//
// Serial line reader.
// `SerialSource` wraps a serialport handle as a ByteSource; `LineEngine`
// turns the byte stream into validated integer messages, resynchronising
// whenever the pending buffer fails validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use super::codec::IntegerLineCodec;
use super::framer::{PendingBuffer, DEFAULT_MAX_BUFFER_LEN};
use super::resync::{resync_until, ResyncPolicy};
use super::utils::{port_builder, Parity};
use crate::io::{ByteSource, IoError, MessageSink};

// ============================================================================
// Types and Configuration
// ============================================================================

/// Serial port configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    /// Upper bound on a single blocking read, in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_port() -> String {
    "/dev/ttyACM0".to_string()
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_read_timeout_ms() -> u64 {
    1000
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Label used in logs and errors.
    pub fn device_label(&self) -> String {
        format!("serial({})", self.port)
    }
}

/// Information about an available serial port
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

// ============================================================================
// Serial Source
// ============================================================================

/// ByteSource backed by a serial device.
///
/// Opening never fails: when the device cannot be opened the error is logged
/// once and the source stays disconnected, reporting zero available bytes.
pub struct SerialSource {
    device: String,
    port: Option<Box<dyn serialport::SerialPort>>,
    read_timeout: Duration,
}

impl SerialSource {
    pub fn open(config: &SerialConfig) -> Self {
        let device = config.device_label();
        let opened = port_builder(config).and_then(|builder| {
            builder
                .open()
                .map_err(|e| IoError::connection(&device, e.to_string()))
        });

        let port = match opened {
            Ok(port) => {
                tlog!(
                    "[serial] Connected to port {} @ {} ({}-{}-{})",
                    config.port,
                    config.baud_rate,
                    config.data_bits,
                    config.parity.letter(),
                    config.stop_bits
                );
                Some(port)
            }
            Err(e) => {
                tlog!("[serial] Unable to open port {}: {}", config.port, e);
                None
            }
        };

        SerialSource {
            device,
            port,
            read_timeout: config.read_timeout(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

impl ByteSource for SerialSource {
    fn device(&self) -> &str {
        &self.device
    }

    fn available(&mut self) -> Result<usize, IoError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(0);
        };
        port.bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| IoError::read(&self.device, e.to_string()))
    }

    fn read_available(&mut self, count: usize) -> Result<Vec<u8>, IoError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(Vec::new());
        };
        let mut buf = vec![0u8; count];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(IoError::read(&self.device, e.to_string())),
        }
    }

    fn read_one(&mut self) -> Result<Option<u8>, IoError> {
        let Some(port) = self.port.as_mut() else {
            // Behave like a device that never answers.
            thread::sleep(self.read_timeout);
            return Ok(None);
        };
        let mut byte = [0u8; 1];
        match port.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(IoError::read(&self.device, e.to_string())),
        }
    }
}

// ============================================================================
// Line Engine
// ============================================================================

/// Engine state. There is no terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Waiting for a line feed before trusting the stream.
    Resyncing,
    Reading,
}

/// What one call to `LineEngine::tick` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// No bytes were available.
    Idle,
    /// Bytes were appended; complete lines were emitted or skipped.
    Processed { emitted: usize, skipped: usize },
    /// The stream was realigned; `discarded` bytes were thrown away.
    Resynced { reason: ResyncReason, discarded: usize },
    /// A bounded resync ran out of attempts. Retried on the next tick.
    ResyncPending,
}

/// Why the engine went looking for a line boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResyncReason {
    /// First alignment after the source was opened.
    Startup,
    /// A byte outside the protocol alphabet reached the buffer.
    InvalidByte,
    /// The pending buffer grew past its bound without a line feed.
    Overflow,
}

impl fmt::Display for ResyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResyncReason::Startup => "startup",
            ResyncReason::InvalidByte => "invalid byte",
            ResyncReason::Overflow => "buffer overflow",
        })
    }
}

/// Running counters, logged periodically by the bridge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub lines_emitted: u64,
    pub lines_skipped: u64,
    pub resyncs: u64,
    pub bytes_discarded: u64,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lines={} skipped={} resyncs={} discarded={}B",
            self.lines_emitted, self.lines_skipped, self.resyncs, self.bytes_discarded
        )
    }
}

/// Framing, validation and parsing over a single ByteSource.
///
/// Drive it by calling `tick` in a loop. Each tick runs to completion; the
/// only blocking work is a resync, which holds the thread until the source
/// yields a line feed or the policy's attempt budget runs out.
pub struct LineEngine<S: ByteSource> {
    source: S,
    pending: PendingBuffer,
    policy: ResyncPolicy,
    state: EngineState,
    /// Kept across pending retries so the completed resync reports its cause.
    resync_reason: ResyncReason,
    stats: EngineStats,
    /// Set while source reads keep failing, so the failure is logged once.
    read_failing: bool,
    /// Aborts a blocking resync when raised.
    cancel: Option<Arc<AtomicBool>>,
}

impl<S: ByteSource> LineEngine<S> {
    pub fn new(source: S, max_buffer_len: usize, policy: ResyncPolicy) -> Self {
        LineEngine {
            source,
            pending: PendingBuffer::new(max_buffer_len),
            policy,
            state: EngineState::Resyncing,
            resync_reason: ResyncReason::Startup,
            stats: EngineStats::default(),
            read_failing: false,
            cancel: None,
        }
    }

    /// Let `flag` interrupt a resync that is waiting on the device.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_defaults(source: S) -> Self {
        LineEngine::new(source, DEFAULT_MAX_BUFFER_LEN, ResyncPolicy::default())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn pending(&self) -> &PendingBuffer {
        &self.pending
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Run one cycle: resync if needed, otherwise poll, append, validate and
    /// emit every complete line.
    pub fn tick<K: MessageSink + ?Sized>(&mut self, sink: &mut K) -> TickOutcome {
        if self.state == EngineState::Resyncing {
            return self.realign();
        }

        let bytes = match self.poll_source() {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return TickOutcome::Idle,
            Err(e) => {
                if !self.read_failing {
                    tlog!("[engine] {}", e);
                    self.read_failing = true;
                }
                return TickOutcome::Idle;
            }
        };
        if self.read_failing {
            tlog!("[engine] {}: reads recovered", self.source.device());
            self.read_failing = false;
        }

        self.pending.append(&bytes);
        if !self.pending.is_valid() {
            self.resync_reason = if self.pending.len() > self.pending.max_len() {
                ResyncReason::Overflow
            } else {
                ResyncReason::InvalidByte
            };
            tlog!(
                "[engine] {}: error in serial buffer ({}, {} bytes pending), resetting",
                self.source.device(),
                self.resync_reason,
                self.pending.len()
            );
            self.state = EngineState::Resyncing;
            return self.realign();
        }

        self.drain_lines(sink)
    }

    fn poll_source(&mut self) -> Result<Vec<u8>, IoError> {
        let available = self.source.available()?;
        if available == 0 {
            return Ok(Vec::new());
        }
        self.source.read_available(available)
    }

    fn realign(&mut self) -> TickOutcome {
        let cancel = self.cancel.as_deref();
        let report = resync_until(&mut self.source, &mut self.pending, &self.policy, cancel);
        self.stats.bytes_discarded += report.discarded() as u64;

        if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) && !report.aligned {
            return TickOutcome::ResyncPending;
        }
        if let Err(e) = report.ensure_aligned(self.source.device()) {
            tlog!("[engine] {} after {} reads, will retry", e, report.attempts);
            return TickOutcome::ResyncPending;
        }

        self.stats.resyncs += 1;
        self.state = EngineState::Reading;
        tlog!(
            "[engine] {}: resynced after {}, discarded {} bytes",
            self.source.device(),
            self.resync_reason,
            report.discarded()
        );
        TickOutcome::Resynced {
            reason: self.resync_reason,
            discarded: report.discarded(),
        }
    }

    /// Emit every complete line. A malformed line is logged and skipped;
    /// the rest of the buffer is kept.
    fn drain_lines<K: MessageSink + ?Sized>(&mut self, sink: &mut K) -> TickOutcome {
        let mut emitted = 0;
        let mut skipped = 0;

        while let Some(line) = self.pending.next_line() {
            match IntegerLineCodec::decode(&line) {
                Ok(message) => {
                    sink.emit(message);
                    emitted += 1;
                }
                Err(e) => {
                    tlog!(
                        "[engine] {}: skipping malformed line {:?}: {}",
                        self.source.device(),
                        String::from_utf8_lossy(&line),
                        e
                    );
                    skipped += 1;
                }
            }
        }

        self.stats.lines_emitted += emitted as u64;
        self.stats.lines_skipped += skipped as u64;
        TickOutcome::Processed { emitted, skipped }
    }
}

// ============================================================================
// Port Listing
// ============================================================================

/// List available serial ports
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The tty devices block on open waiting for carrier detect.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, IoError> {
    let ports = serialport::available_ports()
        .map_err(|e| IoError::connection("serial", format!("failed to enumerate ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB",
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => ("Bluetooth", None, None, None, None, None),
                serialport::SerialPortType::PciPort => ("PCI", None, None, None, None, None),
                serialport::SerialPortType::Unknown => ("Unknown", None, None, None, None, None),
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type: port_type.to_string(),
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================
