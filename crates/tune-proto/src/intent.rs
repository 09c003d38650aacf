//! Two-phase tracking for values with confirmation latency.
//!
//! When the user toggles play/pause we flip the *intended* value right away
//! so the display reacts instantly, then wait for the sound to acknowledge
//! the transport command.  Until then the value is `Pending`.
//!
//! # States
//! ```text
//!  Confirmed(T)       — the sound agrees; render normally
//!  Pending { ... }    — command issued, no acknowledgement yet
//! ```
//!
//! A failed command rolls the intent back to the last confirmed value so the
//! flag never stays out of sync with the real transport state.

#[derive(Debug, Clone)]
pub enum IntentState<T: Clone + PartialEq> {
    Confirmed(T),
    Pending { intended: T, confirmed: T },
}

impl<T: Clone + PartialEq> IntentState<T> {
    pub fn new(value: T) -> Self {
        Self::Confirmed(value)
    }

    /// The value the user intended (what the display shows).
    pub fn intended(&self) -> &T {
        match self {
            Self::Confirmed(v) => v,
            Self::Pending { intended, .. } => intended,
        }
    }

    /// The last value the transport acknowledged.
    pub fn confirmed(&self) -> &T {
        match self {
            Self::Confirmed(v) => v,
            Self::Pending { confirmed, .. } => confirmed,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Register a user intent.  Stays `Confirmed` when it already matches.
    pub fn set_intent(&mut self, intended: T) {
        let confirmed = self.confirmed().clone();
        if intended == confirmed {
            *self = Self::Confirmed(intended);
        } else {
            *self = Self::Pending {
                intended,
                confirmed,
            };
        }
    }

    /// The transport acknowledged `value`.  Returns `true` if it matched the
    /// intent.
    pub fn confirm(&mut self, value: T) -> bool {
        let matched = *self.intended() == value;
        *self = Self::Confirmed(value);
        matched
    }

    /// The command failed; fall back to the last confirmed value.
    pub fn rollback(&mut self) {
        let confirmed = self.confirmed().clone();
        *self = Self::Confirmed(confirmed);
    }

    /// Bypass the two phases (a fresh sound starts in a known state).
    pub fn reset(&mut self, value: T) {
        *self = Self::Confirmed(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_is_visible_before_confirmation() {
        let mut playing = IntentState::new(true);
        playing.set_intent(false);
        assert!(playing.is_pending());
        assert!(!*playing.intended());
        assert!(*playing.confirmed());

        assert!(playing.confirm(false));
        assert!(!playing.is_pending());
        assert!(!*playing.confirmed());
    }

    #[test]
    fn test_matching_intent_stays_confirmed() {
        let mut playing = IntentState::new(true);
        playing.set_intent(true);
        assert!(!playing.is_pending());
    }

    #[test]
    fn test_rollback_restores_confirmed() {
        let mut playing = IntentState::new(false);
        playing.set_intent(true);
        playing.rollback();
        assert!(!playing.is_pending());
        assert!(!*playing.intended());
    }
}
