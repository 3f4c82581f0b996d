//! Example: Replay a recorded barge-in trace
//!
//! Feeds a JSON-lines event trace through an interruption session in real
//! time and prints every decision.
//!
//! ```text
//! cargo run -p pagi-barge-in --example replay_session -- trace.jsonl [barge_in.toml]
//! ```

use pagi_barge_in::{load_trace, replay_trace, ArbiterConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(trace_path) = args.next() else {
        eprintln!("usage: replay_session <trace.jsonl> [config.toml]");
        std::process::exit(2);
    };

    let config = match args.next() {
        Some(path) => ArbiterConfig::load(&path)?,
        None => ArbiterConfig::default(),
    };
    info!(
        "⏱️ grace {:.0}ms, STT wait {:.0}ms, debounce {:.0}ms",
        config.grace_period_seconds * 1000.0,
        config.stt_wait_timeout_seconds * 1000.0,
        config.debounce_seconds * 1000.0
    );

    let events = load_trace(&trace_path)?;
    if events.is_empty() {
        warn!("trace {} has no events", trace_path);
        return Ok(());
    }
    info!("▶️ replaying {} events from {}", events.len(), trace_path);

    let report = replay_trace(config, &events).await?;
    for resolution in &report.resolutions {
        let id = resolution
            .candidate_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>4} {:<9} {:<16} {:?}",
            id,
            resolution.decision.as_str(),
            format!("{:?}", resolution.reason),
            resolution.transcript
        );
    }
    for late in &report.late_transcripts {
        println!(
            "{:>4} {:<9} {:<16} {:?}",
            late.candidate_id.to_string(),
            late.decision.as_str(),
            if late.is_final { "late final" } else { "late partial" },
            late.text
        );
    }
    println!("{}", serde_json::to_string_pretty(&report.stats)?);

    Ok(())
}
