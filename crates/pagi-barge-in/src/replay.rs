//! Replay of recorded event traces.
//!
//! A trace is JSON lines, one timestamped [`ArbiterEvent`] per line:
//!
//! ```text
//! {"at_ms": 0,   "event": {"type": "agent_state_changed", "new_state": "speaking"}}
//! {"at_ms": 120, "event": {"type": "vad_speech_started"}}
//! {"at_ms": 480, "event": {"type": "transcript_received", "text": "uh-huh", "is_final": true}}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Events are fed to a
//! real session at their offsets on the tokio clock, so under a paused test
//! runtime a replay is instant and deterministic.

use crate::arbiter::SessionStats;
use crate::candidate::Resolution;
use crate::config::ArbiterConfig;
use crate::error::{BargeInError, BargeInResult};
use crate::events::ArbiterEvent;
use crate::session::{ChannelTurnHandler, InterruptionSession, LateTranscript, TurnUpdate};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Extra time after the last event so pending timers can fire.
const TAIL_MARGIN: Duration = Duration::from_millis(50);

/// One line of a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    /// Offset from the start of the trace.
    pub at_ms: u64,
    pub event: ArbiterEvent,
}

/// Everything a replay produced.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub resolutions: Vec<Resolution>,
    /// Text that arrived after its burst's interrupt or turn decision.
    pub late_transcripts: Vec<LateTranscript>,
    pub stats: SessionStats,
}

/// Parse a JSON-lines trace. Offsets must not go backwards.
pub fn parse_trace(input: &str) -> BargeInResult<Vec<TimedEvent>> {
    let mut events: Vec<TimedEvent> = Vec::new();
    for (idx, raw) in input.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: TimedEvent = serde_json::from_str(line).map_err(|e| BargeInError::Trace {
            line: idx + 1,
            message: e.to_string(),
        })?;
        if let Some(prev) = events.last() {
            if event.at_ms < prev.at_ms {
                return Err(BargeInError::Trace {
                    line: idx + 1,
                    message: format!("offset {}ms is before previous {}ms", event.at_ms, prev.at_ms),
                });
            }
        }
        events.push(event);
    }
    Ok(events)
}

/// Read and parse a trace file.
pub fn load_trace(path: impl AsRef<std::path::Path>) -> BargeInResult<Vec<TimedEvent>> {
    let input = std::fs::read_to_string(path)?;
    parse_trace(&input)
}

/// Drive `events` through a fresh session and collect its decisions.
pub async fn replay_trace(config: ArbiterConfig, events: &[TimedEvent]) -> BargeInResult<ReplayReport> {
    let tail = config.stt_wait_timeout() + config.debounce() + TAIL_MARGIN;
    let (handler, mut update_rx) = ChannelTurnHandler::new();
    let (session, handle) = InterruptionSession::new(config, handler);
    let task = tokio::spawn(session.run());

    let start = Instant::now();
    for timed in events {
        tokio::time::sleep_until(start + Duration::from_millis(timed.at_ms)).await;
        debug!("replay @{}ms: {}", timed.at_ms, timed.event.kind());
        handle.send(timed.event.clone())?;
    }
    tokio::time::sleep(tail).await;
    drop(handle);

    let stats = task.await.map_err(|e| BargeInError::Session(e.to_string()))?;
    let mut resolutions = Vec::new();
    let mut late_transcripts = Vec::new();
    while let Ok(update) = update_rx.try_recv() {
        match update {
            TurnUpdate::Resolved(resolution) => resolutions.push(resolution),
            TurnUpdate::LateTranscript(late) => late_transcripts.push(late),
        }
    }
    Ok(ReplayReport {
        resolutions,
        late_transcripts,
        stats,
    })
}
