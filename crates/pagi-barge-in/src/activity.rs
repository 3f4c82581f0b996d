//! Agent activity tracking.
//!
//! Mirrors what the playback controller reports so the arbiter can ask one
//! question: is the agent holding the floor right now? Synthesis can finish
//! before the output buffer drains, so playout counts as activity too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Transitions kept for diagnostics.
const TRANSITION_HISTORY: usize = 32;

/// State reported by the agent playback controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Speaking,
    Listening,
    Thinking,
    Idle,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Speaking => "speaking",
            AgentState::Listening => "listening",
            AgentState::Thinking => "thinking",
            AgentState::Idle => "idle",
        }
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub old: AgentState,
    pub new: AgentState,
    pub timestamp: DateTime<Utc>,
}

/// Per-session tracker of the agent's speaking state and audio playout.
#[derive(Debug)]
pub struct AgentActivityTracker {
    state: AgentState,
    audio_playing: bool,
    /// Set on every active -> inactive edge; cleared when activity resumes.
    deactivated_at: Option<Instant>,
    transitions: VecDeque<StateTransition>,
}

impl AgentActivityTracker {
    pub fn new() -> Self {
        Self {
            state: AgentState::Idle,
            audio_playing: false,
            deactivated_at: None,
            transitions: VecDeque::with_capacity(TRANSITION_HISTORY),
        }
    }

    /// Record a state reported by the playback controller.
    ///
    /// Re-reporting the current state is not a transition.
    pub fn update_state(&mut self, new_state: AgentState) {
        if new_state == self.state {
            return;
        }
        let was_active = self.is_active();
        let transition = StateTransition {
            old: self.state,
            new: new_state,
            timestamp: Utc::now(),
        };
        debug!("agent state {} -> {}", transition.old.as_str(), transition.new.as_str());

        if self.transitions.len() == TRANSITION_HISTORY {
            self.transitions.pop_front();
        }
        self.transitions.push_back(transition);
        self.state = new_state;
        self.note_activity_edge(was_active);
    }

    /// Record whether synthesized audio is still physically playing out.
    pub fn update_audio_playing(&mut self, is_playing: bool) {
        if is_playing == self.audio_playing {
            return;
        }
        let was_active = self.is_active();
        debug!("agent audio playing: {}", is_playing);
        self.audio_playing = is_playing;
        self.note_activity_edge(was_active);
    }

    fn note_activity_edge(&mut self, was_active: bool) {
        match (was_active, self.is_active()) {
            (true, false) => self.deactivated_at = Some(Instant::now()),
            (false, true) => self.deactivated_at = None,
            _ => {}
        }
    }

    /// Speaking, or audio still draining to the speaker.
    pub fn is_active(&self) -> bool {
        self.state == AgentState::Speaking || self.audio_playing
    }

    /// Time since the agent last stopped being active.
    ///
    /// `None` while active, and before the agent has ever been active.
    pub fn time_since_deactivated(&self) -> Option<Duration> {
        if self.is_active() {
            return None;
        }
        self.deactivated_at.map(|at| at.elapsed())
    }

    /// True when the agent went inactive no more than `grace` ago.
    pub fn within_grace(&self, grace: Duration) -> bool {
        matches!(self.time_since_deactivated(), Some(since) if since <= grace)
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn is_audio_playing(&self) -> bool {
        self.audio_playing
    }

    pub fn last_transition(&self) -> Option<&StateTransition> {
        self.transitions.back()
    }

    /// Recent transitions, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &StateTransition> {
        self.transitions.iter()
    }
}

impl Default for AgentActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_and_inactive() {
        let tracker = AgentActivityTracker::new();
        assert_eq!(tracker.state(), AgentState::Idle);
        assert!(!tracker.is_active());
        assert_eq!(tracker.time_since_deactivated(), None);
        assert!(!tracker.within_grace(Duration::from_secs(10)));
    }

    #[test]
    fn playout_keeps_agent_active_after_speaking_ends() {
        let mut tracker = AgentActivityTracker::new();
        tracker.update_state(AgentState::Speaking);
        tracker.update_audio_playing(true);
        tracker.update_state(AgentState::Listening);
        assert!(tracker.is_active(), "buffer still draining");
        assert_eq!(tracker.time_since_deactivated(), None);

        tracker.update_audio_playing(false);
        assert!(!tracker.is_active());
        assert!(tracker.time_since_deactivated().is_some());
    }

    #[test]
    fn thinking_is_not_active() {
        let mut tracker = AgentActivityTracker::new();
        tracker.update_state(AgentState::Thinking);
        assert!(!tracker.is_active());
    }

    #[test]
    fn records_transitions_but_not_repeats() {
        let mut tracker = AgentActivityTracker::new();
        tracker.update_state(AgentState::Speaking);
        tracker.update_state(AgentState::Speaking);
        tracker.update_state(AgentState::Listening);

        let seen: Vec<(AgentState, AgentState)> = tracker.transitions().map(|t| (t.old, t.new)).collect();
        assert_eq!(
            seen,
            vec![
                (AgentState::Idle, AgentState::Speaking),
                (AgentState::Speaking, AgentState::Listening),
            ]
        );
        assert_eq!(tracker.last_transition().map(|t| t.new), Some(AgentState::Listening));
    }

    #[test]
    fn history_is_bounded() {
        let mut tracker = AgentActivityTracker::new();
        for i in 0..100 {
            let state = if i % 2 == 0 { AgentState::Speaking } else { AgentState::Listening };
            tracker.update_state(state);
        }
        assert_eq!(tracker.transitions().count(), TRANSITION_HISTORY);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_window_tracks_tokio_clock() {
        let mut tracker = AgentActivityTracker::new();
        tracker.update_state(AgentState::Speaking);
        tracker.update_state(AgentState::Listening);
        let grace = Duration::from_millis(400);
        assert!(tracker.within_grace(grace));

        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(tracker.within_grace(grace));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!tracker.within_grace(grace));

        tracker.update_state(AgentState::Speaking);
        assert_eq!(tracker.time_since_deactivated(), None);
    }
}
