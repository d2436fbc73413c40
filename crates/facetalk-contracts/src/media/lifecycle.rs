/// Where one reply's media is in its life.
///
/// `NoMedia → Submitted → Polling → {Resolved | Failed | TimedOut} →
/// PlaybackAttempting → {PlayingUnmuted | PlayingMuted} → Ended/Superseded →
/// Released`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaLifecycle {
    NoMedia,
    Submitted,
    Polling,
    Resolved,
    Failed,
    TimedOut,
    PlaybackAttempting,
    PlayingUnmuted,
    PlayingMuted,
    Ended,
    Superseded,
    Released,
}

impl MediaLifecycle {
    pub fn can_transition_to(self, next: MediaLifecycle) -> bool {
        use MediaLifecycle::*;
        match (self, next) {
            (Released, NoMedia) => true,
            (Released, _) => false,
            (_, Superseded) => !matches!(self, Superseded),
            (NoMedia, Submitted) => true,
            // Candidates handed over by the chat backend skip job submission.
            (NoMedia, Resolved) => true,
            (Submitted, Polling | Resolved | Failed) => true,
            (Polling, Resolved | Failed | TimedOut) => true,
            (Resolved, PlaybackAttempting) => true,
            (PlaybackAttempting, PlayingUnmuted | PlayingMuted | Failed) => true,
            (PlayingUnmuted, PlayingMuted) | (PlayingMuted, PlayingUnmuted) => true,
            (PlayingUnmuted | PlayingMuted, Ended) => true,
            (Ended | Superseded | Failed | TimedOut, Released) => true,
            _ => false,
        }
    }

    /// Moves to `next` when the edge exists. Returns whether it moved.
    pub fn advance(&mut self, next: MediaLifecycle) -> bool {
        if !self.can_transition_to(next) {
            return false;
        }
        *self = next;
        true
    }

    /// The reply renders as text only.
    pub fn is_degraded(self) -> bool {
        matches!(self, MediaLifecycle::Failed | MediaLifecycle::TimedOut)
    }

    pub fn label(self) -> &'static str {
        match self {
            MediaLifecycle::NoMedia => "no_media",
            MediaLifecycle::Submitted => "submitted",
            MediaLifecycle::Polling => "polling",
            MediaLifecycle::Resolved => "resolved",
            MediaLifecycle::Failed => "failed",
            MediaLifecycle::TimedOut => "timed_out",
            MediaLifecycle::PlaybackAttempting => "playback_attempting",
            MediaLifecycle::PlayingUnmuted => "playing_unmuted",
            MediaLifecycle::PlayingMuted => "playing_muted",
            MediaLifecycle::Ended => "ended",
            MediaLifecycle::Superseded => "superseded",
            MediaLifecycle::Released => "released",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MediaLifecycle::{self, *};

    #[test]
    fn happy_path_walks_every_stage() {
        let mut state = NoMedia;
        for next in [
            Submitted,
            Polling,
            Resolved,
            PlaybackAttempting,
            PlayingMuted,
            PlayingUnmuted,
            Ended,
            Released,
        ] {
            assert!(state.advance(next), "{} -> {}", state.label(), next.label());
        }
        assert_eq!(state, Released);
    }

    #[test]
    fn timeout_only_from_polling() {
        assert!(!Submitted.can_transition_to(TimedOut));
        let mut state: MediaLifecycle = Polling;
        assert!(state.advance(TimedOut));
        assert!(state.is_degraded());
        assert!(!state.advance(PlaybackAttempting));
    }

    #[test]
    fn any_live_state_can_be_superseded_once() {
        for state in [NoMedia, Submitted, Polling, Resolved, PlayingUnmuted] {
            assert!(state.can_transition_to(Superseded));
        }
        assert!(!Superseded.can_transition_to(Superseded));
        assert!(!Released.can_transition_to(Superseded));
        assert!(Released.can_transition_to(NoMedia));
    }
}
