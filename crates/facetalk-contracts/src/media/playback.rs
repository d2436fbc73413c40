use std::fmt;

use serde_json::Value;

use crate::prefs::{PreferenceStore, ALLOW_AUDIO_AUTOPLAY};

/// Handle to a locally materialized copy of remote media.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobId(String);

impl BlobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The URL a player should load for one reply.
///
/// Not `Clone`: a blob-backed value is the only owner of its blob, and the
/// blob is released by whoever ends up holding it.
#[derive(Debug, PartialEq, Eq)]
pub struct ResolvedMedia {
    url: String,
    blob: Option<BlobId>,
}

impl ResolvedMedia {
    pub fn direct(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            blob: None,
        }
    }

    pub fn local_blob(url: impl Into<String>, blob: BlobId) -> Self {
        Self {
            url: url.into(),
            blob: Some(blob),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_local_blob(&self) -> bool {
        self.blob.is_some()
    }

    pub fn blob(&self) -> Option<&BlobId> {
        self.blob.as_ref()
    }

    /// Gives up ownership of the blob handle. Returns `None` once taken.
    pub fn take_blob(&mut self) -> Option<BlobId> {
        self.blob.take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Unmuted,
    Muted,
}

impl PlaybackMode {
    pub fn is_muted(self) -> bool {
        matches!(self, PlaybackMode::Muted)
    }

    pub fn label(self) -> &'static str {
        match self {
            PlaybackMode::Unmuted => "unmuted",
            PlaybackMode::Muted => "muted",
        }
    }
}

/// Whether media may start with sound without a fresh user gesture.
///
/// Loaded once per session from the preference store and only ever flipped
/// from `false` to `true`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackPolicy {
    autoplay_unmuted_allowed: bool,
}

impl PlaybackPolicy {
    pub fn new(autoplay_unmuted_allowed: bool) -> Self {
        Self {
            autoplay_unmuted_allowed,
        }
    }

    pub fn load(prefs: &mut PreferenceStore) -> Self {
        Self::new(prefs.get_bool(ALLOW_AUDIO_AUTOPLAY))
    }

    pub fn persist(&self, prefs: &mut PreferenceStore) -> anyhow::Result<()> {
        if !self.autoplay_unmuted_allowed {
            return Ok(());
        }
        prefs.set(ALLOW_AUDIO_AUTOPLAY, Value::Bool(true))
    }

    pub fn autoplay_unmuted_allowed(&self) -> bool {
        self.autoplay_unmuted_allowed
    }

    /// Records a qualifying user gesture. Returns `true` only on the call that
    /// actually granted the permission.
    pub fn grant_user_gesture(&mut self) -> bool {
        let changed = !self.autoplay_unmuted_allowed;
        self.autoplay_unmuted_allowed = true;
        changed
    }

    /// Modes to try, in order, whether or not a gesture was recorded. Muted is
    /// the fallback whenever the player refuses sound.
    pub const ATTEMPTS: [PlaybackMode; 2] = [PlaybackMode::Unmuted, PlaybackMode::Muted];
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn grant_is_one_way() {
        let mut policy = PlaybackPolicy::default();
        assert!(!policy.autoplay_unmuted_allowed());
        assert!(policy.grant_user_gesture());
        assert!(!policy.grant_user_gesture());
        assert!(policy.autoplay_unmuted_allowed());
    }

    #[test]
    fn policy_round_trips_through_preferences() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("prefs.json");
        let mut prefs = PreferenceStore::new(&path);
        assert!(!PlaybackPolicy::load(&mut prefs).autoplay_unmuted_allowed());

        let mut policy = PlaybackPolicy::load(&mut prefs);
        policy.grant_user_gesture();
        policy.persist(&mut prefs)?;

        let mut reopened = PreferenceStore::new(&path);
        assert!(PlaybackPolicy::load(&mut reopened).autoplay_unmuted_allowed());
        Ok(())
    }

    #[test]
    fn ungranted_policy_does_not_overwrite_stored_grant() -> anyhow::Result<()> {
        let mut prefs = PreferenceStore::ephemeral();
        prefs.set(ALLOW_AUDIO_AUTOPLAY, json!(true))?;
        PlaybackPolicy::new(false).persist(&mut prefs)?;
        assert!(prefs.get_bool(ALLOW_AUDIO_AUTOPLAY));
        Ok(())
    }

    #[test]
    fn attempts_start_with_sound() {
        let attempts = PlaybackPolicy::ATTEMPTS;
        assert_eq!(attempts, [PlaybackMode::Unmuted, PlaybackMode::Muted]);
    }

    #[test]
    fn taking_a_blob_leaves_plain_url() {
        let mut media = ResolvedMedia::local_blob("file:///tmp/a.mp4", BlobId::new("b1"));
        assert!(media.is_local_blob());
        assert_eq!(media.take_blob(), Some(BlobId::new("b1")));
        assert_eq!(media.take_blob(), None);
        assert!(!media.is_local_blob());
    }
}
