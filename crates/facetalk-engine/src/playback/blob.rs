use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use facetalk_contracts::media::BlobId;
use sha2::{Digest, Sha256};
use url::Url;

/// A blob that now exists locally and can be handed to a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedBlob {
    pub id: BlobId,
    pub url: String,
}

/// Owner of locally materialized media. Every created blob must be released
/// exactly once.
pub trait BlobStore: Send + Sync {
    fn create(&self, bytes: &[u8], mime_type: &str) -> Result<MaterializedBlob>;
    fn release(&self, id: &BlobId) -> Result<()>;
    fn live_count(&self) -> usize;
}

/// Blobs as files in one directory, addressed by `file://` URLs.
pub struct DirBlobStore {
    dir: PathBuf,
    live: Mutex<HashMap<BlobId, PathBuf>>,
}

impl DirBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let dir = if dir.is_absolute() {
            dir
        } else {
            env::current_dir()
                .context("failed to resolve current directory")?
                .join(dir)
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create blob dir {}", dir.display()))?;
        Ok(Self {
            dir,
            live: Mutex::new(HashMap::new()),
        })
    }
}

impl BlobStore for DirBlobStore {
    fn create(&self, bytes: &[u8], mime_type: &str) -> Result<MaterializedBlob> {
        let digest = hex::encode(Sha256::digest(bytes));
        let token = uuid::Uuid::new_v4().simple().to_string();
        let id = BlobId::new(format!("blob-{}-{}", &digest[..12], &token[..8]));
        let path = self
            .dir
            .join(format!("{id}.{}", extension_for_mime(mime_type)));
        fs::write(&path, bytes)
            .with_context(|| format!("failed to write blob {}", path.display()))?;
        let url = Url::from_file_path(&path)
            .map_err(|_| anyhow!("blob path is not addressable: {}", path.display()))?
            .to_string();
        self.live
            .lock()
            .map_err(|_| anyhow!("blob registry lock poisoned"))?
            .insert(id.clone(), path);
        tracing::debug!(blob = %id, bytes = bytes.len(), mime_type, "materialized media blob");
        Ok(MaterializedBlob { id, url })
    }

    fn release(&self, id: &BlobId) -> Result<()> {
        let path = self
            .live
            .lock()
            .map_err(|_| anyhow!("blob registry lock poisoned"))?
            .remove(id);
        let Some(path) = path else {
            bail!("blob {id} is not live");
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove blob {}", path.display()))
            }
        }
    }

    fn live_count(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/ogg" => "ogv",
        "video/quicktime" => "mov",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        _ => "bin",
    }
}
