//! Per-burst decision state.

use crate::classifier::Label;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one burst of user speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateId(pub(crate) u64);

impl CandidateId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome for a burst. `Pending` is the only non-terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pending,
    /// Swallow the utterance; never commit it to history.
    Ignore,
    /// Stop agent audio now and start a new user turn.
    Interrupt,
    /// Agent was not active: ordinary user turn.
    Respond,
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Decision::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Pending => "pending",
            Decision::Ignore => "ignore",
            Decision::Interrupt => "interrupt",
            Decision::Respond => "respond",
        }
    }
}

/// Why a candidate resolved the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    /// Transcript classified while the agent was active or within grace.
    Classified,
    /// Agent inactive past the grace period.
    AgentIdle,
    /// No transcript arrived in time.
    WatchdogExpired,
    /// Partial transcript settled without a final.
    DebounceSettled,
}

/// Outbound record of a terminal decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// `None` for pass-through turns that never had a candidate.
    pub candidate_id: Option<CandidateId>,
    pub decision: Decision,
    pub label: Option<Label>,
    pub transcript: String,
    pub reason: ResolutionReason,
    /// Decided before the final transcript; the rest of the burst's text
    /// follows as late transcripts.
    #[serde(default)]
    pub awaiting_final: bool,
    pub resolved_at: DateTime<Utc>,
}

/// In-flight state for one burst of user speech.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: CandidateId,
    /// Latest non-blank transcript hypothesis, raw.
    pub transcript: String,
    /// Any transcript arrived, blank or not.
    pub heard: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub speech_ended_at: Option<DateTime<Utc>>,
    pub partials: u32,
    pub decision: Decision,
}

impl Candidate {
    pub(crate) fn new(id: CandidateId) -> Self {
        let now = Utc::now();
        Self {
            id,
            transcript: String::new(),
            heard: false,
            started_at: now,
            updated_at: now,
            speech_ended_at: None,
            partials: 0,
            decision: Decision::Pending,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Non-blank transcript text received yet.
    pub fn has_text(&self) -> bool {
        !self.transcript.is_empty()
    }
}
