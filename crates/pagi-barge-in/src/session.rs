//! **Interruption Session**: the event loop around one arbiter.
//!
//! Playback state, VAD and STT events arrive on one channel, timer expiries on
//! another; both are handled on a single task, in arrival order, so the
//! arbiter needs no locks. Every terminal decision is handed to the
//! [`TurnHandler`]. A failing handler is logged and counted; it never reaches
//! back into the arbiter, and the decision it failed to act on stands.

use crate::arbiter::{InterruptionArbiter, SessionStats, TranscriptOutcome, VadOutcome};
use crate::candidate::{CandidateId, Decision, Resolution};
use crate::config::ArbiterConfig;
use crate::error::BargeInResult;
use crate::events::ArbiterEvent;
use crate::timer::TimerFired;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Transcript text for a burst whose decision already fired.
#[derive(Debug, Clone, PartialEq)]
pub struct LateTranscript {
    pub candidate_id: CandidateId,
    pub decision: Decision,
    pub text: String,
    pub is_final: bool,
}

/// Consumer of arbiter decisions: stops playback, swallows or commits turns.
pub trait TurnHandler: Send {
    /// Act on a terminal decision.
    ///
    /// - `Interrupt`: stop agent audio now, start a user turn with the transcript.
    /// - `Ignore`: drop the transcript; never commit it.
    /// - `Respond`: ordinary user turn.
    ///
    /// When `awaiting_final` is set the transcript is only what was heard so
    /// far; the rest arrives through [`TurnHandler::on_late_transcript`].
    fn on_resolution(&mut self, resolution: &Resolution) -> anyhow::Result<()>;

    /// Text for an `Interrupt` or `Respond` burst that arrived after its
    /// decision, e.g. the final transcript after a watchdog interrupt. This is
    /// the user's turn and must not be dropped. Late text of ignored bursts is
    /// never delivered.
    fn on_late_transcript(&mut self, late: &LateTranscript) -> anyhow::Result<()>;
}

/// What a [`ChannelTurnHandler`] forwards.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    Resolved(Resolution),
    LateTranscript(LateTranscript),
}

impl TurnUpdate {
    pub fn resolution(&self) -> Option<&Resolution> {
        match self {
            TurnUpdate::Resolved(r) => Some(r),
            TurnUpdate::LateTranscript(_) => None,
        }
    }

    pub fn late_transcript(&self) -> Option<&LateTranscript> {
        match self {
            TurnUpdate::LateTranscript(late) => Some(late),
            TurnUpdate::Resolved(_) => None,
        }
    }
}

/// Forwards resolutions and late transcripts onto a channel, in order.
pub struct ChannelTurnHandler {
    tx: mpsc::UnboundedSender<TurnUpdate>,
}

impl ChannelTurnHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TurnUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, update: TurnUpdate) -> anyhow::Result<()> {
        self.tx
            .send(update)
            .map_err(|e| anyhow::anyhow!("turn update receiver dropped: {}", e))
    }
}

impl TurnHandler for ChannelTurnHandler {
    fn on_resolution(&mut self, resolution: &Resolution) -> anyhow::Result<()> {
        self.forward(TurnUpdate::Resolved(resolution.clone()))
    }

    fn on_late_transcript(&mut self, late: &LateTranscript) -> anyhow::Result<()> {
        self.forward(TurnUpdate::LateTranscript(late.clone()))
    }
}

/// Cloneable sender side of a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<ArbiterEvent>,
}

impl SessionHandle {
    /// Queue an inbound event. Fails only once the session has stopped.
    pub fn send(&self, event: ArbiterEvent) -> BargeInResult<()> {
        self.tx.send(event)?;
        Ok(())
    }
}

/// One conversation's arbiter plus its event loop.
pub struct InterruptionSession<H: TurnHandler> {
    arbiter: InterruptionArbiter,
    event_rx: mpsc::UnboundedReceiver<ArbiterEvent>,
    fired_rx: mpsc::UnboundedReceiver<TimerFired>,
    handler: H,
}

impl<H: TurnHandler> InterruptionSession<H> {
    pub fn new(config: ArbiterConfig, handler: H) -> (Self, SessionHandle) {
        let (arbiter, fired_rx) = InterruptionArbiter::new(config);
        let (tx, event_rx) = mpsc::unbounded_channel();
        let session = Self {
            arbiter,
            event_rx,
            fired_rx,
            handler,
        };
        (session, SessionHandle { tx })
    }

    pub fn arbiter(&self) -> &InterruptionArbiter {
        &self.arbiter
    }

    /// Run until every [`SessionHandle`] is dropped. Returns the session's counts.
    pub async fn run(mut self) -> SessionStats {
        info!("interruption session started");

        loop {
            enum Event {
                Inbound(ArbiterEvent),
                Timer(TimerFired),
                Closed,
            }

            // Inbound first: a transcript racing its own watchdog wins.
            let event = tokio::select! {
                biased;
                inbound = self.event_rx.recv() => match inbound {
                    Some(ev) => Event::Inbound(ev),
                    None => Event::Closed,
                },
                Some(fired) = self.fired_rx.recv() => Event::Timer(fired),
            };

            match event {
                Event::Inbound(ev) => self.dispatch(ev),
                Event::Timer(fired) => {
                    if let Some(resolution) = self.arbiter.on_watchdog_timeout(fired) {
                        self.deliver(&resolution);
                    }
                }
                Event::Closed => break,
            }
        }

        let stats = self.arbiter.stats().clone();
        info!(
            "interruption session ended: {} candidates, {} interrupts, {} ignored, {} turns",
            stats.candidates, stats.interrupted, stats.ignored, stats.responded
        );
        stats
    }

    fn dispatch(&mut self, event: ArbiterEvent) {
        debug!("event: {}", event.kind());
        match event {
            ArbiterEvent::AgentStateChanged { new_state, .. } => {
                self.arbiter.on_agent_state_changed(new_state);
            }
            ArbiterEvent::AudioPlaybackChanged { is_playing } => {
                self.arbiter.on_audio_playback_changed(is_playing);
            }
            ArbiterEvent::VadSpeechStarted => match self.arbiter.on_vad_speech_start() {
                VadOutcome::AwaitClassification(id) => {
                    debug!("holding playback for candidate {}", id);
                }
                VadOutcome::NotActive => {}
            },
            ArbiterEvent::VadSpeechEnded => self.arbiter.on_vad_speech_end(),
            ArbiterEvent::TranscriptReceived {
                text,
                is_final,
                confidence,
            } => match self.arbiter.on_transcript(&text, is_final, confidence) {
                TranscriptOutcome::Resolved(resolution) => self.deliver(&resolution),
                TranscriptOutcome::Settled { candidate_id, decision } => {
                    if decision == Decision::Ignore {
                        debug!("dropping late text of ignored candidate {}", candidate_id);
                        return;
                    }
                    let late = LateTranscript {
                        candidate_id,
                        decision,
                        text,
                        is_final,
                    };
                    if let Err(e) = self.handler.on_late_transcript(&late) {
                        warn!("turn handler failed on late transcript for {}: {:#}", candidate_id, e);
                        self.arbiter.note_handler_failure();
                    }
                }
                TranscriptOutcome::Pending(_) | TranscriptOutcome::PassThrough | TranscriptOutcome::Dropped => {}
            },
        }
    }

    fn deliver(&mut self, resolution: &Resolution) {
        if let Err(e) = self.handler.on_resolution(resolution) {
            warn!("turn handler failed on {} decision: {:#}", resolution.decision.as_str(), e);
            self.arbiter.note_handler_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::AgentState;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn routes_events_to_handler() {
        let (handler, mut rx) = ChannelTurnHandler::new();
        let (session, handle) = InterruptionSession::new(ArbiterConfig::default(), handler);
        let task = tokio::spawn(session.run());

        handle.send(ArbiterEvent::state_changed(AgentState::Idle, AgentState::Speaking)).unwrap();
        handle.send(ArbiterEvent::VadSpeechStarted).unwrap();
        handle.send(ArbiterEvent::final_transcript("uh-huh")).unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(update.resolution().unwrap().decision, Decision::Ignore);

        drop(handle);
        let stats = task.await.unwrap();
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.candidates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_interrupt_still_delivers_the_users_words() {
        let (handler, mut rx) = ChannelTurnHandler::new();
        let (session, handle) = InterruptionSession::new(ArbiterConfig::default(), handler);
        let task = tokio::spawn(session.run());

        handle.send(ArbiterEvent::state_changed(AgentState::Idle, AgentState::Speaking)).unwrap();
        handle.send(ArbiterEvent::VadSpeechStarted).unwrap();

        let started = tokio::time::Instant::now();
        let update = rx.recv().await.unwrap();
        let resolution = update.resolution().unwrap();
        assert_eq!(resolution.decision, Decision::Interrupt);
        assert!(resolution.awaiting_final);
        assert!(started.elapsed() >= Duration::from_millis(600));

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.send(ArbiterEvent::final_transcript("book me a table for two")).unwrap();
        let update = rx.recv().await.unwrap();
        let late = update.late_transcript().unwrap();
        assert_eq!(late.candidate_id, resolution.candidate_id.unwrap());
        assert_eq!(late.decision, Decision::Interrupt);
        assert_eq!(late.text, "book me a table for two");
        assert!(late.is_final);

        drop(handle);
        assert_eq!(task.await.unwrap().watchdog_expiries, 1);
    }

    struct FlakyHandler {
        seen: Arc<Mutex<Vec<Decision>>>,
    }

    impl TurnHandler for FlakyHandler {
        fn on_resolution(&mut self, resolution: &Resolution) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(resolution.decision);
            if resolution.decision == Decision::Interrupt {
                anyhow::bail!("playback stop failed");
            }
            Ok(())
        }

        fn on_late_transcript(&mut self, _late: &LateTranscript) -> anyhow::Result<()> {
            anyhow::bail!("history store unavailable")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_handler_does_not_stop_the_session() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = FlakyHandler {
            seen: Arc::clone(&seen),
        };

        let (session, handle) = InterruptionSession::new(ArbiterConfig::default(), handler);
        let task = tokio::spawn(session.run());

        handle.send(ArbiterEvent::state_changed(AgentState::Idle, AgentState::Speaking)).unwrap();
        handle.send(ArbiterEvent::final_transcript("stop")).unwrap();
        handle.send(ArbiterEvent::final_transcript("yeah")).unwrap();
        handle.send(ArbiterEvent::VadSpeechStarted).unwrap();
        handle.send(ArbiterEvent::partial("wait")).unwrap();
        handle.send(ArbiterEvent::final_transcript("wait what")).unwrap();
        drop(handle);

        let stats = task.await.unwrap();
        assert_eq!(stats.handler_failures, 3);
        assert_eq!(stats.interrupted, 2);
        assert_eq!(stats.ignored, 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Decision::Interrupt, Decision::Ignore, Decision::Interrupt]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn late_final_goes_to_late_transcript_hook() {
        let (handler, mut rx) = ChannelTurnHandler::new();
        let (session, handle) = InterruptionSession::new(ArbiterConfig::default(), handler);
        let task = tokio::spawn(session.run());

        handle.send(ArbiterEvent::state_changed(AgentState::Idle, AgentState::Speaking)).unwrap();
        handle.send(ArbiterEvent::VadSpeechStarted).unwrap();
        handle.send(ArbiterEvent::partial("hold on")).unwrap();
        handle.send(ArbiterEvent::state_changed(AgentState::Speaking, AgentState::Listening)).unwrap();
        handle.send(ArbiterEvent::final_transcript("hold on what time is it")).unwrap();
        drop(handle);

        let stats = task.await.unwrap();
        assert_eq!(stats.interrupted, 1);
        assert_eq!(stats.responded, 0);

        let first = rx.recv().await.unwrap();
        let resolution = first.resolution().unwrap();
        assert_eq!(resolution.transcript, "hold on");
        assert!(resolution.awaiting_final);

        let second = rx.recv().await.unwrap();
        let late = second.late_transcript().unwrap();
        assert_eq!(late.decision, Decision::Interrupt);
        assert_eq!(late.text, "hold on what time is it");
        assert!(late.is_final);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn late_text_of_an_ignored_burst_is_not_delivered() {
        let (handler, mut rx) = ChannelTurnHandler::new();
        let (session, handle) = InterruptionSession::new(ArbiterConfig::default(), handler);
        let task = tokio::spawn(session.run());

        handle.send(ArbiterEvent::state_changed(AgentState::Idle, AgentState::Speaking)).unwrap();
        handle.send(ArbiterEvent::VadSpeechStarted).unwrap();
        handle.send(ArbiterEvent::partial("uh huh")).unwrap();

        // Debounce hands over to the watchdog, which swallows the burst.
        let update = rx.recv().await.unwrap();
        assert_eq!(update.resolution().unwrap().decision, Decision::Ignore);

        handle.send(ArbiterEvent::final_transcript("uh huh yeah")).unwrap();
        drop(handle);
        task.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn send_after_session_ends_fails() {
        let (handler, _rx) = ChannelTurnHandler::new();
        let (session, handle) = InterruptionSession::new(ArbiterConfig::default(), handler);
        drop(session);
        assert!(handle.send(ArbiterEvent::VadSpeechEnded).is_err());
    }
}
