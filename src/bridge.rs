// src/bridge.rs
//
// Wires a serial source, the line engine and a sink together and runs
// until Ctrl-C.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::io::mqtt::spawn_publisher;
use crate::io::serial::{EngineStats, LineEngine, SerialSource, TickOutcome};
use crate::io::sink::{ChannelSink, JsonLinesSink};
use crate::io::{ByteSource, IoError, MessageSink};
use crate::logging;
use crate::settings::{BridgeSettings, SinkKind};

/// Run the bridge until interrupted. Returns the final engine counters.
pub async fn run(settings: BridgeSettings) -> Result<EngineStats, IoError> {
    settings.validate()?;

    if let Some(dir) = &settings.logging.log_dir {
        if let Err(e) = logging::init_file_logging(dir) {
            tlog!("[bridge] File logging disabled: {}", e);
        }
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let signal_flag = stop_flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tlog!("[bridge] Shutdown requested");
            signal_flag.store(true, Ordering::SeqCst);
        }
    });

    let mut publisher = None;
    let sink: Box<dyn MessageSink + Send> = match settings.sink.kind {
        SinkKind::Mqtt => {
            let (tx, rx) = mpsc::channel(settings.sink.channel_capacity);
            publisher = Some(spawn_publisher(
                settings.sink.mqtt.clone(),
                settings.engine.max_buffer_len,
                rx,
            )?);
            Box::new(ChannelSink::new(tx))
        }
        SinkKind::Stdout => Box::new(JsonLinesSink::stdout()),
    };

    let serial = settings.serial.clone();
    let engine_settings = settings.engine.clone();
    let engine_stop = stop_flag.clone();

    tlog!(
        "[bridge] Starting: {} -> {:?} (max buffer {} bytes)",
        serial.device_label(),
        settings.sink.kind,
        engine_settings.max_buffer_len
    );

    // Serial I/O and resync sleeps block, so the engine gets its own thread.
    let stats = tokio::task::spawn_blocking(move || {
        let source = SerialSource::open(&serial);
        let engine = LineEngine::new(
            source,
            engine_settings.max_buffer_len,
            engine_settings.resync_policy(),
        )
        .with_cancel_flag(engine_stop.clone());
        drive(
            engine,
            sink,
            &engine_stop,
            engine_settings.poll_interval(),
            engine_settings.stats_interval(),
        )
    })
    .await
    .map_err(|e| IoError::Task(format!("engine thread: {}", e)))?;

    // The sink (and its channel sender) was dropped with the engine thread,
    // so the publisher sees its input close and finishes.
    if let Some(handle) = publisher {
        match handle.await {
            Ok(published) => tlog!("[bridge] Publisher finished ({} published)", published),
            Err(e) => tlog!("[bridge] Publisher task failed: {}", e),
        }
    }

    tlog!("[bridge] Stopped: {}", stats);
    logging::stop_file_logging();
    Ok(stats)
}

/// Tick the engine until `stop_flag` is set. Sleeps `poll_interval` after
/// idle ticks and logs counters every `stats_interval`.
pub fn drive<S, K>(
    mut engine: LineEngine<S>,
    mut sink: K,
    stop_flag: &AtomicBool,
    poll_interval: Duration,
    stats_interval: Option<Duration>,
) -> EngineStats
where
    S: ByteSource,
    K: MessageSink,
{
    let mut last_stats = Instant::now();

    while !stop_flag.load(Ordering::SeqCst) {
        if engine.tick(&mut sink) == TickOutcome::Idle && !poll_interval.is_zero() {
            thread::sleep(poll_interval);
        }

        if let Some(interval) = stats_interval {
            if last_stats.elapsed() >= interval {
                tlog!("[bridge] {}", engine.stats());
                last_stats = Instant::now();
            }
        }
    }

    engine.stats().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::serial::{ResyncPolicy, DEFAULT_MAX_BUFFER_LEN};
    use crate::io::test_support::ScriptedSource;
    use crate::io::ParsedMessage;

    /// Collects messages and raises the stop flag after `limit` of them.
    struct StopAfter<'a> {
        seen: &'a mut Vec<ParsedMessage>,
        limit: usize,
        stop: &'a AtomicBool,
    }

    impl MessageSink for StopAfter<'_> {
        fn emit(&mut self, message: ParsedMessage) {
            self.seen.push(message);
            if self.seen.len() >= self.limit {
                self.stop.store(true, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_drive_runs_until_stopped() {
        let source = ScriptedSource::with_arrivals([
            b"9;9".as_slice(),
            b"9\n1;2\n".as_slice(),
            b"\n".as_slice(),
            b"3;x\n".as_slice(),
            b"\n4\n".as_slice(),
        ]);
        let policy = ResyncPolicy {
            settle_delay: Duration::ZERO,
            backoff: Duration::ZERO,
            max_attempts: Some(8),
        };
        let engine = LineEngine::new(source, DEFAULT_MAX_BUFFER_LEN, policy);
        let stop = AtomicBool::new(false);
        let mut seen = Vec::new();

        let stats = drive(
            engine,
            StopAfter {
                seen: &mut seen,
                limit: 3,
                stop: &stop,
            },
            &stop,
            Duration::ZERO,
            None,
        );

        assert_eq!(
            seen,
            vec![
                ParsedMessage::new(vec![1, 2]),
                ParsedMessage::default(),
                ParsedMessage::new(vec![4]),
            ]
        );
        assert_eq!(stats.lines_emitted, 3);
        assert_eq!(stats.resyncs, 2);
    }

    #[test]
    fn test_drive_returns_immediately_when_stopped() {
        let engine = LineEngine::with_defaults(ScriptedSource::new());
        let stop = AtomicBool::new(true);
        let stats = drive(engine, Vec::new(), &stop, Duration::ZERO, None);
        assert_eq!(stats, EngineStats::default());
    }
}
