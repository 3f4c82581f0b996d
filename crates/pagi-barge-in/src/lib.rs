//! # PAGI Barge-In - Interruption Arbitration for Live Voice Turns
//!
//! Decides, while the agent is talking, whether a burst of user speech is a
//! passive acknowledgement to swallow ("yeah", "uh-huh"), a real command that
//! must cut the agent off ("stop", "wait"), or an ordinary turn.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Interruption Session                       │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ VAD start/end│ → │   Candidate  │ ← │ Watchdog/Debounce│  │
//! │  │  (no text)   │   │  (one/burst) │   │   (tokio timer)  │  │
//! │  └──────────────┘   └──────────────┘   └──────────────────┘  │
//! │  ┌──────────────┐          ↓                                  │
//! │  │ STT partial/ │ → Normalize → Classify → Decision ──────────┼─→ TurnHandler
//! │  │    final     │                  ↑                          │   (stop / swallow / turn)
//! │  └──────────────┘   ┌──────────────────────┐                  │
//! │                     │ Agent activity + grace│                 │
//! │                     └──────────────────────┘                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod activity;
pub mod arbiter;
pub mod candidate;
pub mod classifier;
pub mod config;
pub mod error;
pub mod events;
pub mod normalize;
pub mod replay;
pub mod session;
pub mod timer;

pub use activity::{AgentActivityTracker, AgentState, StateTransition};
pub use arbiter::{InterruptionArbiter, SessionStats, TranscriptOutcome, VadOutcome};
pub use candidate::{Candidate, CandidateId, Decision, Resolution, ResolutionReason};
pub use classifier::{classify, Label, PhraseClassifier, PhraseSet};
pub use config::ArbiterConfig;
pub use error::{BargeInError, BargeInResult};
pub use events::ArbiterEvent;
pub use normalize::{normalize, normalize_opt};
pub use replay::{load_trace, parse_trace, replay_trace, ReplayReport, TimedEvent};
pub use session::{
    ChannelTurnHandler, InterruptionSession, LateTranscript, SessionHandle, TurnHandler, TurnUpdate,
};
pub use timer::{PendingCandidateTimer, TimerFired, TimerHandle, TimerPurpose};
