//! Interruption arbitration.
//!
//! Reconciles two differently-latent signals about the same burst of user
//! speech: VAD (fast, no content) and STT (slow, partial then final), against
//! whether the agent is currently holding the floor. Each burst gets exactly
//! one terminal decision.
//!
//! The arbiter never stops agent audio on VAD alone. A speech-start only
//! opens a candidate and arms a watchdog; the decision waits for text, or for
//! the watchdog to give up on it.

use crate::activity::{AgentActivityTracker, AgentState};
use crate::candidate::{Candidate, CandidateId, Decision, Resolution, ResolutionReason};
use crate::classifier::{Label, PhraseClassifier};
use crate::config::ArbiterConfig;
use crate::normalize::normalize;
use crate::timer::{PendingCandidateTimer, TimerFired, TimerPurpose};
use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Resolved candidates remembered for `decision_for`.
const RESOLVED_HISTORY: usize = 64;

/// How long a burst decided early keeps claiming its late transcripts.
const SETTLED_TTL: Duration = Duration::from_secs(2);

/// Answer to a VAD speech-start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadOutcome {
    /// Agent is not active: treat the speech as a normal new turn.
    NotActive,
    /// Agent is active: hold off and wait for the classification.
    AwaitClassification(CandidateId),
}

/// Answer to a transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptOutcome {
    /// A terminal decision fired now.
    Resolved(Resolution),
    /// Still waiting for more text or the debounce window.
    Pending(CandidateId),
    /// The burst already has its decision; this text belongs to it.
    Settled { candidate_id: CandidateId, decision: Decision },
    /// Partial text while the agent is idle; nothing to arbitrate yet.
    PassThrough,
    /// Below the confidence floor; treated as if it never arrived.
    Dropped,
}

impl TranscriptOutcome {
    pub fn resolution(&self) -> Option<&Resolution> {
        match self {
            TranscriptOutcome::Resolved(r) => Some(r),
            _ => None,
        }
    }

    pub fn decision(&self) -> Option<Decision> {
        match self {
            TranscriptOutcome::Resolved(r) => Some(r.decision),
            TranscriptOutcome::Settled { decision, .. } => Some(*decision),
            TranscriptOutcome::Pending(_) => Some(Decision::Pending),
            TranscriptOutcome::PassThrough | TranscriptOutcome::Dropped => None,
        }
    }
}

/// Running counts for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub candidates: u64,
    pub ignored: u64,
    pub interrupted: u64,
    pub responded: u64,
    pub watchdog_expiries: u64,
    pub handler_failures: u64,
}

impl SessionStats {
    fn record(&mut self, resolution: &Resolution) {
        match resolution.decision {
            Decision::Ignore => self.ignored += 1,
            Decision::Interrupt => self.interrupted += 1,
            Decision::Respond => self.responded += 1,
            Decision::Pending => {}
        }
        if resolution.reason == ResolutionReason::WatchdogExpired {
            self.watchdog_expiries += 1;
        }
    }
}

/// A burst that resolved before its final transcript arrived.
#[derive(Debug, Clone, Copy)]
struct SettledBurst {
    id: CandidateId,
    decision: Decision,
    at: Instant,
}

impl SettledBurst {
    fn new(id: CandidateId, decision: Decision) -> Self {
        Self {
            id,
            decision,
            at: Instant::now(),
        }
    }
}

/// The single-writer arbiter for one conversation.
pub struct InterruptionArbiter {
    config: ArbiterConfig,
    classifier: PhraseClassifier,
    tracker: AgentActivityTracker,
    timer: PendingCandidateTimer,
    candidate: Option<Candidate>,
    settled: Option<SettledBurst>,
    resolved: VecDeque<(CandidateId, Decision)>,
    next_id: u64,
    stats: SessionStats,
}

impl InterruptionArbiter {
    /// Create an arbiter and the receiver its timer expiries arrive on.
    ///
    /// Feed every expiry back through [`InterruptionArbiter::on_watchdog_timeout`].
    pub fn new(config: ArbiterConfig) -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let config = config.sanitized();
        let classifier = config.classifier();
        let (timer, fired_rx) = PendingCandidateTimer::new();
        let arbiter = Self {
            config,
            classifier,
            tracker: AgentActivityTracker::new(),
            timer,
            candidate: None,
            settled: None,
            resolved: VecDeque::with_capacity(RESOLVED_HISTORY),
            next_id: 0,
            stats: SessionStats::default(),
        };
        (arbiter, fired_rx)
    }

    // ---------------------------------------------------------------------
    // Agent state
    // ---------------------------------------------------------------------

    pub fn on_agent_state_changed(&mut self, new_state: AgentState) {
        self.tracker.update_state(new_state);
    }

    pub fn on_audio_playback_changed(&mut self, is_playing: bool) {
        self.tracker.update_audio_playing(is_playing);
    }

    // ---------------------------------------------------------------------
    // VAD
    // ---------------------------------------------------------------------

    /// User speech started.
    pub fn on_vad_speech_start(&mut self) -> VadOutcome {
        // A new burst; whatever settled before is finished.
        self.settled = None;
        if !self.tracker.is_active() {
            return VadOutcome::NotActive;
        }

        if let Some(candidate) = self.candidate.as_mut() {
            candidate.touch();
            debug!("refreshed candidate {}", candidate.id);
            return VadOutcome::AwaitClassification(candidate.id);
        }

        let id = self.open_candidate();
        self.timer.arm(id, TimerPurpose::Watchdog, self.config.stt_wait_timeout());
        VadOutcome::AwaitClassification(id)
    }

    /// User speech ended. Never decides anything.
    pub fn on_vad_speech_end(&mut self) {
        if let Some(candidate) = self.candidate.as_mut() {
            candidate.speech_ended_at = Some(Utc::now());
            debug!("speech ended for candidate {}", candidate.id);
        }
    }

    // ---------------------------------------------------------------------
    // STT
    // ---------------------------------------------------------------------

    /// A partial or final transcript arrived.
    pub fn on_transcript(&mut self, text: &str, is_final: bool, confidence: f32) -> TranscriptOutcome {
        if !confidence.is_finite() || confidence < self.config.min_confidence {
            debug!(
                "dropping transcript below confidence floor ({} < {})",
                confidence, self.config.min_confidence
            );
            return TranscriptOutcome::Dropped;
        }

        let normalized = normalize(text);
        let label = self.classifier.classify(&normalized);

        if self.settled.is_some_and(|s| s.at.elapsed() > SETTLED_TTL) {
            self.settled = None;
        }
        if self.candidate.is_none() {
            if let Some(settled) = self.settled.take() {
                // A swallowed burst whose fuller text turns out to say something.
                let reopen = settled.decision == Decision::Ignore
                    && matches!(label, Label::ContainsCommand | Label::Content);
                if !reopen {
                    if !is_final {
                        self.settled = Some(settled);
                    }
                    return TranscriptOutcome::Settled {
                        candidate_id: settled.id,
                        decision: settled.decision,
                    };
                }
                debug!("candidate {} was ignored but now reads {:?}, re-arbitrating", settled.id, label);
            }
        }

        let agent_engaged = self.agent_engaged();
        let Some(candidate) = self.candidate.as_mut() else {
            if !agent_engaged {
                if !is_final {
                    return TranscriptOutcome::PassThrough;
                }
                return TranscriptOutcome::Resolved(self.pass_through(text, label));
            }
            // Text with no VAD burst while the agent holds the floor.
            let id = self.open_candidate();
            return self.apply_transcript(id, text, label, is_final);
        };

        candidate.touch();
        let id = candidate.id;
        self.apply_transcript(id, text, label, is_final)
    }

    fn apply_transcript(&mut self, id: CandidateId, text: &str, label: Label, is_final: bool) -> TranscriptOutcome {
        let mut label = label;
        if let Some(candidate) = self.candidate.as_mut() {
            candidate.heard = true;
            if !is_final {
                candidate.partials += 1;
            }
            if label != Label::Empty || !candidate.has_text() {
                candidate.transcript = text.to_string();
            } else {
                // Blank hypothesis after real text: keep judging the text.
                label = self.classifier.classify(&normalize(&candidate.transcript));
            }
        }

        if is_final || label == Label::ContainsCommand {
            let (decision, reason) = self.decide(label);
            let resolution = self.resolve(id, decision, Some(label), reason, !is_final);
            return TranscriptOutcome::Resolved(resolution);
        }

        // Non-decisive partial: let the utterance settle.
        let debounce = self.config.debounce();
        match self.timer.armed_handle(id) {
            Some(handle) => self.timer.restart(handle, TimerPurpose::Debounce, debounce),
            None => self.timer.arm(id, TimerPurpose::Debounce, debounce),
        };
        TranscriptOutcome::Pending(id)
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// A timer ran out. Stale or already-resolved expiries are no-ops.
    ///
    /// A debounce over text that would not stop the agent (backchannel or
    /// blank) hands over to the watchdog instead of deciding, so a command in
    /// the final transcript still wins.
    pub fn on_watchdog_timeout(&mut self, fired: TimerFired) -> Option<Resolution> {
        if !self.timer.acknowledge(fired) {
            return None;
        }
        let id = fired.handle.candidate_id;
        let candidate = self.candidate.as_ref().filter(|c| c.id == id)?;

        if !candidate.heard {
            debug!("no transcript for candidate {} in time, failing safe", id);
            return Some(self.resolve(id, Decision::Interrupt, None, ResolutionReason::WatchdogExpired, true));
        }

        let label = self.classifier.classify(&normalize(&candidate.transcript));
        if fired.handle.purpose == TimerPurpose::Debounce && matches!(label, Label::BackchannelOnly | Label::Empty) {
            debug!("candidate {} settled on {:?}, waiting for the final", id, label);
            self.timer.arm(id, TimerPurpose::Watchdog, self.config.stt_wait_timeout());
            return None;
        }

        let (decision, reason) = self.decide(label);
        let reason = match (reason, fired.handle.purpose) {
            (ResolutionReason::Classified, TimerPurpose::Debounce) => ResolutionReason::DebounceSettled,
            (ResolutionReason::Classified, TimerPurpose::Watchdog) => ResolutionReason::WatchdogExpired,
            (other, _) => other,
        };
        Some(self.resolve(id, decision, Some(label), reason, true))
    }

    // ---------------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------------

    /// Agent active, or inactive for no longer than the grace period.
    fn agent_engaged(&self) -> bool {
        self.tracker.is_active() || self.tracker.within_grace(self.config.grace_period())
    }

    fn decide(&self, label: Label) -> (Decision, ResolutionReason) {
        if !self.agent_engaged() {
            return (Decision::Respond, ResolutionReason::AgentIdle);
        }
        let decision = match label {
            Label::ContainsCommand => Decision::Interrupt,
            Label::BackchannelOnly => Decision::Ignore,
            // Dropping real speech is worse than pausing the agent.
            Label::Content => Decision::Interrupt,
            Label::Empty => Decision::Ignore,
        };
        (decision, ResolutionReason::Classified)
    }

    fn open_candidate(&mut self) -> CandidateId {
        self.next_id += 1;
        let id = CandidateId(self.next_id);
        self.candidate = Some(Candidate::new(id));
        self.stats.candidates += 1;
        debug!("opened candidate {} (agent {})", id, self.tracker.state().as_str());
        id
    }

    /// Finalize and discard the live candidate `id`.
    ///
    /// With `awaiting_final` the burst's remaining transcripts are claimed by
    /// a settled marker instead of opening a new candidate.
    fn resolve(
        &mut self,
        id: CandidateId,
        decision: Decision,
        label: Option<Label>,
        reason: ResolutionReason,
        awaiting_final: bool,
    ) -> Resolution {
        self.timer.cancel_candidate(id);
        let transcript = match self.candidate.take() {
            Some(mut candidate) if candidate.id == id => {
                candidate.decision = decision;
                candidate.transcript
            }
            other => {
                self.candidate = other;
                String::new()
            }
        };

        if self.resolved.len() == RESOLVED_HISTORY {
            self.resolved.pop_front();
        }
        self.resolved.push_back((id, decision));

        let resolution = Resolution {
            candidate_id: Some(id),
            decision,
            label,
            transcript,
            reason,
            awaiting_final,
            resolved_at: Utc::now(),
        };
        if awaiting_final {
            self.settled = Some(SettledBurst::new(id, decision));
        }
        self.stats.record(&resolution);
        info!("🎙️ candidate {} -> {} ({:?}, {:?})", id, decision.as_str(), label, reason);
        resolution
    }

    fn pass_through(&mut self, text: &str, label: Label) -> Resolution {
        let resolution = Resolution {
            candidate_id: None,
            decision: Decision::Respond,
            label: Some(label),
            transcript: text.to_string(),
            reason: ResolutionReason::AgentIdle,
            awaiting_final: false,
            resolved_at: Utc::now(),
        };
        self.stats.record(&resolution);
        debug!("agent idle, passing transcript through");
        resolution
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    /// Current decision for a candidate, if it is live or recently resolved.
    pub fn decision_for(&self, id: CandidateId) -> Option<Decision> {
        if let Some(candidate) = self.candidate.as_ref().filter(|c| c.id == id) {
            return Some(candidate.decision);
        }
        self.resolved
            .iter()
            .rev()
            .find(|(rid, _)| *rid == id)
            .map(|(_, decision)| *decision)
    }

    pub fn candidate(&self) -> Option<&Candidate> {
        self.candidate.as_ref()
    }

    pub fn tracker(&self) -> &AgentActivityTracker {
        &self.tracker
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub(crate) fn note_handler_failure(&mut self) {
        self.stats.handler_failures += 1;
    }
}
