mod arbiter;
mod blob;
mod fetch;
mod player;

pub use arbiter::{
    proxy_rewrite, DirectFetch, Passthrough, PlaybackArbiter, ProxyRewrite, ProxyRule,
    ResolveStrategy, StrategyOutcome,
};
pub use blob::{BlobStore, DirBlobStore, MaterializedBlob};
pub use fetch::{FetchMethod, FetchResponse, HttpMediaFetcher, MediaFetcher};
pub use player::{MediaPlayer, PlaybackController, PlaybackRejected};
