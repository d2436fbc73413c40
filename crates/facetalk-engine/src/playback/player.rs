use facetalk_contracts::media::{PlaybackMode, PlaybackPolicy, ResolvedMedia};
use thiserror::Error;

/// The player refused to start, typically because sound needs a user gesture.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("playback rejected: {0}")]
pub struct PlaybackRejected(pub String);

/// Whatever actually renders media for the user.
pub trait MediaPlayer {
    fn load(&mut self, media: &ResolvedMedia);
    fn play(&mut self, mode: PlaybackMode) -> Result<(), PlaybackRejected>;
    fn set_muted(&mut self, muted: bool);
    fn stop(&mut self);
    /// The user just interacted with the page or terminal.
    fn user_activated(&mut self) {}
}

/// Starts loaded media with sound when allowed, muted otherwise, and tracks
/// the autoplay permission as gestures come in.
#[derive(Debug, Clone, Default)]
pub struct PlaybackController {
    policy: PlaybackPolicy,
    mode: Option<PlaybackMode>,
}

impl PlaybackController {
    pub fn new(policy: PlaybackPolicy) -> Self {
        Self { policy, mode: None }
    }

    pub fn policy(&self) -> PlaybackPolicy {
        self.policy
    }

    pub fn current_mode(&self) -> Option<PlaybackMode> {
        self.mode
    }

    /// Plays whatever the player has loaded. `None` means both attempts were
    /// refused; the reply then stays text-only.
    pub fn start(&mut self, player: &mut dyn MediaPlayer) -> Option<PlaybackMode> {
        for mode in PlaybackPolicy::ATTEMPTS {
            player.set_muted(mode.is_muted());
            match player.play(mode) {
                Ok(()) => {
                    tracing::debug!(mode = mode.label(), "playback started");
                    self.mode = Some(mode);
                    return Some(mode);
                }
                Err(rejected) if mode == PlaybackMode::Unmuted => {
                    if self.policy.autoplay_unmuted_allowed() {
                        tracing::warn!(%rejected, "sound refused despite earlier gesture; retrying muted");
                    } else {
                        tracing::info!(%rejected, "sound needs a gesture; retrying muted");
                    }
                }
                Err(rejected) => tracing::warn!(%rejected, "muted playback refused"),
            }
        }
        self.mode = None;
        None
    }

    /// Tap on the playing media. Unmuting counts as a gesture.
    /// Returns the new mode and whether the autoplay permission was just granted.
    pub fn toggle_mute(&mut self, player: &mut dyn MediaPlayer) -> Option<(PlaybackMode, bool)> {
        match self.mode? {
            PlaybackMode::Muted => {
                let granted = self.policy.grant_user_gesture();
                player.user_activated();
                player.set_muted(false);
                let mode = match player.play(PlaybackMode::Unmuted) {
                    Ok(()) => PlaybackMode::Unmuted,
                    Err(rejected) => {
                        tracing::warn!(%rejected, "unmute refused");
                        player.set_muted(true);
                        PlaybackMode::Muted
                    }
                };
                self.mode = Some(mode);
                Some((mode, granted))
            }
            PlaybackMode::Unmuted => {
                player.set_muted(true);
                self.mode = Some(PlaybackMode::Muted);
                Some((PlaybackMode::Muted, false))
            }
        }
    }

    /// Any user gesture. The first one grants the permission and unmutes media
    /// that is already playing muted. Returns whether the permission was granted.
    pub fn user_gesture(&mut self, player: &mut dyn MediaPlayer) -> bool {
        let granted = self.policy.grant_user_gesture();
        player.user_activated();
        if granted && self.mode == Some(PlaybackMode::Muted) {
            player.set_muted(false);
            if player.play(PlaybackMode::Unmuted).is_ok() {
                self.mode = Some(PlaybackMode::Unmuted);
            } else {
                player.set_muted(true);
            }
        }
        granted
    }

    pub fn stopped(&mut self) {
        self.mode = None;
    }
}
