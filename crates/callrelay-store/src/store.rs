//! On-disk artifact storage.
//!
//! Every artifact is a single file directly under the store's root. The file
//! name encodes the artifact kind, its creation time in microseconds since the
//! Unix epoch (read from the store's [`Clock`]), and a random suffix:
//!
//! ```text
//! reply-1700000000123456-9f2c01ab.mp3
//! ```
//!
//! [`ArtifactStore::sweep`] recovers the creation time from the name, so
//! retention follows the injected clock rather than filesystem mtimes.

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// How many fresh names `write` tries before giving up on a collision streak.
const MAX_NAME_ATTEMPTS: usize = 8;

/// Length of the hex random suffix in an artifact name.
const SUFFIX_LEN: usize = 8;

/// What an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Caller audio handed to transcription. Deleted as soon as it is consumed.
    UploadedClip,
    /// Synthesized reply audio served back to the telephony layer.
    SynthesizedReply,
}

impl ArtifactKind {
    /// Name prefix identifying the kind.
    pub fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::UploadedClip => "clip",
            ArtifactKind::SynthesizedReply => "reply",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::UploadedClip => "wav",
            ArtifactKind::SynthesizedReply => "mp3",
        }
    }

    /// MIME type used when serving the artifact.
    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::UploadedClip => "audio/wav",
            ArtifactKind::SynthesizedReply => "audio/mpeg",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "clip" => Some(ArtifactKind::UploadedClip),
            "reply" => Some(ArtifactKind::SynthesizedReply),
            _ => None,
        }
    }
}

/// A persisted artifact. The bytes stay on disk; read them with
/// [`ArtifactStore::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub created_at: SystemTime,
    /// Size of the stored content in bytes.
    pub len: usize,
}

/// Parses a name produced by the store's allocator.
///
/// Returns the kind and creation time, or `None` for anything the allocator
/// could not have produced. Path separators and `..` never parse.
pub fn parse_name(name: &str) -> Option<(ArtifactKind, SystemTime)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let mut parts = stem.splitn(3, '-');
    let kind = ArtifactKind::from_prefix(parts.next()?)?;
    let micros = parts.next()?;
    let suffix = parts.next()?;

    if ext != kind.extension()
        || micros.is_empty()
        || !micros.bytes().all(|b| b.is_ascii_digit())
        || suffix.len() != SUFFIX_LEN
        || !suffix.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return None;
    }

    let micros: u64 = micros.parse().ok()?;
    Some((kind, UNIX_EPOCH + Duration::from_micros(micros)))
}

fn allocate_name(kind: ArtifactKind, created_at: SystemTime) -> String {
    let micros = created_at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    let suffix: u32 = rand::random();
    format!(
        "{}-{:016}-{:08x}.{}",
        kind.prefix(),
        micros,
        suffix,
        kind.extension()
    )
}

/// Named binary artifacts under one directory.
///
/// Cloning is cheap and clones share the same directory and clock. No lock is
/// held across operations: uniqueness comes from the random suffix plus
/// `create_new`, which fails rather than overwrites if a name is taken.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: Arc<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl ArtifactStore {
    /// Opens (creating if needed) a store rooted at `root`, using the system clock.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_clock(root, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        root: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root: Arc::new(root),
            clock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        if parse_name(name).is_none() {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Persists `bytes` under a freshly allocated name.
    pub async fn write(&self, kind: ArtifactKind, bytes: &[u8]) -> Result<Artifact, StoreError> {
        let created_at = self.clock.now();

        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = allocate_name(kind, created_at);
            let path = self.root.join(&name);

            let mut file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(artifact = %name, "artifact name taken, allocating another");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let written = async {
                file.write_all(bytes).await?;
                file.flush().await
            }
            .await;

            if let Err(e) = written {
                // Leave no half-written artifact behind.
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e.into());
            }

            tracing::debug!(artifact = %name, len = bytes.len(), "wrote artifact");
            return Ok(Artifact {
                name,
                kind,
                created_at,
                len: bytes.len(),
            });
        }

        Err(StoreError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "could not allocate a unique artifact name",
        )))
    }

    /// Reads an artifact's bytes.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` if the artifact does not exist,
    /// `StoreError::InvalidName` if `name` is not an artifact name.
    pub async fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes an artifact. Deleting one that does not exist succeeds.
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the names of stored artifacts, optionally restricted to one kind.
    pub async fn list(&self, kind: Option<ArtifactKind>) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&*self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            match parse_name(&name) {
                Some((k, _)) if kind.map_or(true, |wanted| wanted == k) => names.push(name),
                _ => {}
            }
        }
        names.sort();
        Ok(names)
    }

    /// Deletes every artifact strictly older than `max_age`, returning how many
    /// were deleted.
    ///
    /// Per-artifact failures are logged and skipped. An artifact that vanishes
    /// between listing and deletion is not a failure. Files whose names the
    /// store did not allocate are left alone.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` only if the root directory cannot be listed.
    pub async fn sweep(&self, max_age: Duration) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut entries = tokio::fs::read_dir(&*self.root).await?;
        let mut deleted = 0;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "artifact listing interrupted, ending sweep early");
                    break;
                }
            };

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some((_, created_at)) = parse_name(name) else {
                tracing::trace!(file = %name, "skipping foreign file during sweep");
                continue;
            };

            let age = now.duration_since(created_at).unwrap_or_default();
            if age <= max_age {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    deleted += 1;
                    tracing::debug!(artifact = %name, age_secs = age.as_secs(), "retired artifact");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::debug!(artifact = %name, "artifact already gone during sweep");
                }
                Err(e) => {
                    tracing::warn!(artifact = %name, error = %e, "failed to retire artifact");
                }
            }
        }

        Ok(deleted)
    }
}
