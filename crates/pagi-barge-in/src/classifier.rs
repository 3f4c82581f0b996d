//! Phrase classification for user speech heard while the agent talks.
//!
//! One rule set for the whole crate: command phrases are matched first,
//! longest phrase first, on token boundaries; then the utterance is checked
//! for being nothing but backchannel. Anything else is content.

use crate::normalize::{normalize, tokens};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Cached labels before the cache is flushed.
const CACHE_CAPACITY: usize = 1024;

/// Backchannel vocabulary used when none is configured.
pub const DEFAULT_IGNORE_PHRASES: &[&str] = &[
    "yeah", "yea", "yes", "yep", "yup", "ok", "okay", "k", "uh huh", "mm hmm", "mhm", "mm",
    "hmm", "hm", "uh", "um", "ah", "oh", "right", "sure", "alright", "all right", "got it",
    "i see", "cool", "nice", "great", "true", "exactly", "totally", "indeed",
];

/// Interrupt vocabulary used when none is configured.
pub const DEFAULT_COMMAND_PHRASES: &[&str] = &[
    "stop", "wait", "hold on", "hang on", "pause", "actually", "no", "nope", "cancel",
    "shut up", "be quiet", "quiet", "enough", "excuse me", "one second", "one sec",
    "one moment", "but", "hey", "listen", "never mind", "nevermind",
];

/// What a normalized utterance amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// Nothing left after normalization (STT noise).
    Empty,
    /// Only passive acknowledgements ("yeah", "uh huh").
    BackchannelOnly,
    /// At least one command phrase, whatever else was said.
    ContainsCommand,
    /// Substantive speech.
    Content,
}

/// An immutable set of phrases, each one or more tokens.
///
/// Phrases are normalized on construction and kept longest-first by token
/// count so a two-word phrase is always tried before any single word in it.
#[derive(Debug, Clone, Default)]
pub struct PhraseSet {
    phrases: Vec<Vec<String>>,
}

impl PhraseSet {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set: Vec<Vec<String>> = Vec::new();
        for phrase in phrases {
            let normalized = normalize(phrase.as_ref());
            if normalized.is_empty() {
                continue;
            }
            let toks: Vec<String> = tokens(&normalized).into_iter().map(str::to_owned).collect();
            if !set.contains(&toks) {
                set.push(toks);
            }
        }
        // Stable sort keeps configuration order among equal lengths.
        set.sort_by(|a, b| b.len().cmp(&a.len()));
        Self { phrases: set }
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    /// Phrases in matching order (longest first), space-joined.
    pub fn phrases(&self) -> impl Iterator<Item = String> + '_ {
        self.phrases.iter().map(|p| p.join(" "))
    }

    /// Longest phrase that occurs in `toks` on token boundaries.
    fn find_in(&self, toks: &[&str]) -> Option<&[String]> {
        self.phrases
            .iter()
            .find(|phrase| toks.windows(phrase.len()).any(|w| matches_at(w, phrase)))
            .map(Vec::as_slice)
    }

    /// True when `toks` can be consumed entirely by contiguous phrases.
    fn covers(&self, toks: &[&str]) -> bool {
        if toks.is_empty() || self.phrases.is_empty() {
            return false;
        }
        // reachable[i]: toks[..i] is fully covered.
        let mut reachable = vec![false; toks.len() + 1];
        reachable[0] = true;
        for start in 0..toks.len() {
            if !reachable[start] {
                continue;
            }
            for phrase in &self.phrases {
                let end = start + phrase.len();
                if end <= toks.len() && matches_at(&toks[start..end], phrase) {
                    reachable[end] = true;
                }
            }
        }
        reachable[toks.len()]
    }
}

fn matches_at(window: &[&str], phrase: &[String]) -> bool {
    window.len() == phrase.len() && window.iter().zip(phrase).all(|(w, p)| *w == p.as_str())
}

/// Classify already-normalized text against the two phrase sets.
pub fn classify(normalized_text: &str, ignore_phrases: &PhraseSet, command_phrases: &PhraseSet) -> Label {
    let toks = tokens(normalized_text);
    if toks.is_empty() {
        return Label::Empty;
    }
    if let Some(phrase) = command_phrases.find_in(&toks) {
        debug!("command phrase {:?} in {:?}", phrase.join(" "), normalized_text);
        return Label::ContainsCommand;
    }
    if ignore_phrases.covers(&toks) {
        return Label::BackchannelOnly;
    }
    Label::Content
}

/// Classifier bound to its configured phrase sets, with a label cache.
#[derive(Debug)]
pub struct PhraseClassifier {
    ignore: PhraseSet,
    command: PhraseSet,
    cache: DashMap<String, Label>,
}

impl PhraseClassifier {
    pub fn new(ignore: PhraseSet, command: PhraseSet) -> Self {
        if ignore.is_empty() {
            warn!("ignore phrase set is empty: no utterance will be treated as backchannel");
        }
        if command.is_empty() {
            warn!("command phrase set is empty: nothing will classify as a command");
        }
        Self {
            ignore,
            command,
            cache: DashMap::new(),
        }
    }

    /// Classifier with the built-in vocabularies.
    pub fn with_defaults() -> Self {
        Self::new(
            PhraseSet::new(DEFAULT_IGNORE_PHRASES),
            PhraseSet::new(DEFAULT_COMMAND_PHRASES),
        )
    }

    /// Label for normalized text. Results are memoized per string.
    pub fn classify(&self, normalized_text: &str) -> Label {
        if let Some(label) = self.cache.get(normalized_text) {
            return *label;
        }
        let label = classify(normalized_text, &self.ignore, &self.command);
        if self.cache.len() >= CACHE_CAPACITY {
            self.cache.clear();
        }
        self.cache.insert(normalized_text.to_owned(), label);
        label
    }

    /// Normalize then classify.
    pub fn classify_raw(&self, text: &str) -> Label {
        self.classify(&normalize(text))
    }

    pub fn ignore_phrases(&self) -> &PhraseSet {
        &self.ignore
    }

    pub fn command_phrases(&self) -> &PhraseSet {
        &self.command
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

impl Default for PhraseClassifier {
    fn default() -> Self {
        Self::with_defaults()
    }
}
