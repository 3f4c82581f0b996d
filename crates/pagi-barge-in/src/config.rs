//! Arbiter configuration.
//!
//! Plain structured config: phrase vocabularies plus the timing knobs. Every
//! field has a default, so a partial TOML file (or none at all) is valid.
//!
//! | Key | Default | Effect |
//! |-----|---------|--------|
//! | ignore_phrases | built-in | Backchannel vocabulary ("yeah", "uh huh", ...) |
//! | command_phrases | built-in | Interrupt vocabulary ("stop", "hold on", ...) |
//! | grace_period_seconds | 0.4 | Transcripts this soon after the agent goes quiet still count as barge-in |
//! | stt_wait_timeout_seconds | 0.6 | VAD-only candidates resolve to interrupt after this long without text |
//! | debounce_seconds | 0.3 | Settle window after a non-decisive partial transcript |
//! | min_confidence | 0.0 | Transcripts below this confidence are dropped |

use crate::classifier::{PhraseClassifier, PhraseSet, DEFAULT_COMMAND_PHRASES, DEFAULT_IGNORE_PHRASES};
use crate::error::{BargeInError, BargeInResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const DEFAULT_GRACE_PERIOD_SECONDS: f64 = 0.4;
const DEFAULT_STT_WAIT_TIMEOUT_SECONDS: f64 = 0.6;
const DEFAULT_DEBOUNCE_SECONDS: f64 = 0.3;

fn default_ignore_phrases() -> Vec<String> {
    DEFAULT_IGNORE_PHRASES.iter().map(|s| s.to_string()).collect()
}

fn default_command_phrases() -> Vec<String> {
    DEFAULT_COMMAND_PHRASES.iter().map(|s| s.to_string()).collect()
}

fn default_grace_period_seconds() -> f64 {
    DEFAULT_GRACE_PERIOD_SECONDS
}

fn default_stt_wait_timeout_seconds() -> f64 {
    DEFAULT_STT_WAIT_TIMEOUT_SECONDS
}

fn default_debounce_seconds() -> f64 {
    DEFAULT_DEBOUNCE_SECONDS
}

/// Configuration for one interruption arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterConfig {
    #[serde(default = "default_ignore_phrases")]
    pub ignore_phrases: Vec<String>,
    #[serde(default = "default_command_phrases")]
    pub command_phrases: Vec<String>,
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: f64,
    #[serde(default = "default_stt_wait_timeout_seconds")]
    pub stt_wait_timeout_seconds: f64,
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: f64,
    #[serde(default)]
    pub min_confidence: f32,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            ignore_phrases: default_ignore_phrases(),
            command_phrases: default_command_phrases(),
            grace_period_seconds: DEFAULT_GRACE_PERIOD_SECONDS,
            stt_wait_timeout_seconds: DEFAULT_STT_WAIT_TIMEOUT_SECONDS,
            debounce_seconds: DEFAULT_DEBOUNCE_SECONDS,
            min_confidence: 0.0,
        }
    }
}

impl ArbiterConfig {
    /// Parse from a TOML document.
    pub fn from_toml_str(s: &str) -> BargeInResult<Self> {
        let config: Self = toml::from_str(s)?;
        Ok(config.sanitized())
    }

    /// Load from a config file (format inferred from the extension).
    pub fn load(path: impl AsRef<Path>) -> BargeInResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BargeInError::Config(format!("config file not found: {}", path.display())));
        }
        let built = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        let config: Self = built.try_deserialize()?;
        Ok(config.sanitized())
    }

    /// Replace unusable timing values with defaults and warn about empty
    /// vocabularies. Never rejects a config.
    pub fn sanitized(mut self) -> Self {
        self.grace_period_seconds =
            sanitize_seconds("grace_period_seconds", self.grace_period_seconds, DEFAULT_GRACE_PERIOD_SECONDS);
        self.stt_wait_timeout_seconds = sanitize_seconds(
            "stt_wait_timeout_seconds",
            self.stt_wait_timeout_seconds,
            DEFAULT_STT_WAIT_TIMEOUT_SECONDS,
        );
        self.debounce_seconds = sanitize_seconds("debounce_seconds", self.debounce_seconds, DEFAULT_DEBOUNCE_SECONDS);
        if !self.min_confidence.is_finite() || self.min_confidence < 0.0 {
            warn!("min_confidence {} is invalid, using 0.0", self.min_confidence);
            self.min_confidence = 0.0;
        }
        if self.ignore_phrases.is_empty() {
            warn!("ignore_phrases is empty: backchannel will never be swallowed");
        }
        if self.command_phrases.is_empty() {
            warn!("command_phrases is empty: nothing will classify as a command");
        }
        self
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs_f64(self.grace_period_seconds)
    }

    pub fn stt_wait_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stt_wait_timeout_seconds)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs_f64(self.debounce_seconds)
    }

    /// Build the classifier for these vocabularies.
    pub fn classifier(&self) -> PhraseClassifier {
        PhraseClassifier::new(
            PhraseSet::new(&self.ignore_phrases),
            PhraseSet::new(&self.command_phrases),
        )
    }
}

fn sanitize_seconds(name: &str, value: f64, default: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        warn!("{} = {} is invalid, using {}", name, value, default);
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sub_second() {
        let c = ArbiterConfig::default();
        assert!(c.grace_period() < Duration::from_secs(1));
        assert!(c.stt_wait_timeout() < Duration::from_secs(1));
        assert_eq!(c.debounce(), Duration::from_millis(300));
        assert!(c.command_phrases.iter().any(|p| p == "stop"));
        assert!(c.ignore_phrases.iter().any(|p| p == "uh huh"));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let c = ArbiterConfig::from_toml_str(
            r#"
            grace_period_seconds = 0.25
            command_phrases = ["halt", "hold on"]
            "#,
        )
        .unwrap();
        assert_eq!(c.grace_period_seconds, 0.25);
        assert_eq!(c.command_phrases, vec!["halt", "hold on"]);
        assert_eq!(c.stt_wait_timeout_seconds, DEFAULT_STT_WAIT_TIMEOUT_SECONDS);
        assert_eq!(c.ignore_phrases, default_ignore_phrases());
    }

    #[test]
    fn invalid_timings_fall_back_to_defaults() {
        let c = ArbiterConfig {
            grace_period_seconds: -1.0,
            stt_wait_timeout_seconds: f64::NAN,
            debounce_seconds: f64::INFINITY,
            min_confidence: -0.5,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(c.grace_period_seconds, DEFAULT_GRACE_PERIOD_SECONDS);
        assert_eq!(c.stt_wait_timeout_seconds, DEFAULT_STT_WAIT_TIMEOUT_SECONDS);
        assert_eq!(c.debounce_seconds, DEFAULT_DEBOUNCE_SECONDS);
        assert_eq!(c.min_confidence, 0.0);
    }

    #[test]
    fn empty_phrase_sets_are_accepted() {
        let c = ArbiterConfig::from_toml_str("ignore_phrases = []\ncommand_phrases = []").unwrap();
        assert!(c.ignore_phrases.is_empty());
        assert!(c.command_phrases.is_empty());
        assert!(c.classifier().command_phrases().is_empty());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let err = ArbiterConfig::from_toml_str("grace_period_seconds = \"soon\"").unwrap_err();
        assert!(matches!(err, BargeInError::Toml(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("barge_in.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "stt_wait_timeout_seconds = 0.15").unwrap();
        writeln!(f, "ignore_phrases = [\"yeah\", \"uh-huh\"]").unwrap();
        drop(f);

        let c = ArbiterConfig::load(&path).unwrap();
        assert_eq!(c.stt_wait_timeout_seconds, 0.15);
        assert_eq!(c.ignore_phrases, vec!["yeah", "uh-huh"]);
        assert_eq!(c.grace_period_seconds, DEFAULT_GRACE_PERIOD_SECONDS);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = ArbiterConfig::load("/nonexistent/barge_in.toml").unwrap_err();
        assert!(matches!(err, BargeInError::Config(_)));
    }
}
