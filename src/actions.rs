//! Client-side trigger actions: utterance-matched actions executed entirely
//! by the embedding UI, bypassing the conversation engine.
//!
//! While the action's UI (a modal, a new tab) is open, the session holds in
//! `AwaitingAction`; dismissal resumes listening.

use crate::phrase;

/// An action the embedding UI executes on the user's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    /// Open a URL in the host browser.
    OpenUrl {
        /// Target URL.
        url: String,
    },
    /// Display an image in a modal.
    ShowImage {
        /// Image URL.
        url: String,
    },
}

/// One trigger: a phrase and the action it fires.
#[derive(Debug, Clone)]
pub struct TriggerRule {
    /// Phrase matched against normalized utterances.
    pub phrase: String,
    /// Action fired on match.
    pub action: TriggerAction,
}

/// Ordered set of trigger rules. First match wins.
#[derive(Debug, Clone, Default)]
pub struct TriggerMatcher {
    rules: Vec<TriggerRule>,
}

impl TriggerMatcher {
    /// Create an empty matcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule.
    pub fn add(&mut self, rule: TriggerRule) {
        self.rules.push(rule);
    }

    /// Returns the first rule whose phrase the utterance contains.
    #[must_use]
    pub fn match_utterance(&self, text: &str) -> Option<&TriggerRule> {
        self.rules
            .iter()
            .find(|r| phrase::contains_phrase(text, &r.phrase))
    }
}
