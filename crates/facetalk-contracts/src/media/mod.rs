mod lifecycle;
mod playback;
mod request;
mod resolver;
mod status;

pub use lifecycle::MediaLifecycle;
pub use playback::{BlobId, PlaybackMode, PlaybackPolicy, ResolvedMedia};
pub use request::{
    GenerationRequest, JobHandle, ScriptSource, SourceImage, TalkConfig, VoiceProvider,
};
pub use resolver::{
    absolute_http_url, collect_url_candidates, has_video_extension, pick_best,
    resolve_result_url, UrlCandidate, MAX_SCAN_DEPTH, VIDEO_EXTENSIONS,
};
pub use status::{state_label, JobStatus, FAILURE_STATES, SUCCESS_STATES};
