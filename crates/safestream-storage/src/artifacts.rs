//! Filesystem artifact store rooted at the upload directory.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use safestream_models::VideoId;

use crate::error::{StorageError, StorageResult};
use crate::keys::{thumbnail_key, upload_filename, validate_key};

/// Subdirectory holding derived thumbnails.
pub const THUMBNAILS_DIR: &str = "thumbnails";

/// Attempts at finding a free name when two uploads share a millisecond.
const NAME_ATTEMPTS: u32 = 16;

/// An original written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Name inside the upload root
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Local filesystem storage for originals and thumbnails.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open the store, creating the root and thumbnail directories.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();

        fs::create_dir_all(root.join(THUMBNAILS_DIR))
            .await
            .map_err(|e| {
                StorageError::config_error(format!(
                    "Failed to create upload directory {}: {}",
                    root.display(),
                    e
                ))
            })?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.root.join(THUMBNAILS_DIR)
    }

    /// Whether the root is still present and a directory.
    pub async fn is_available(&self) -> bool {
        fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Resolve a key to a path under the root.
    pub fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Stream an upload to disk under a fresh `video-{millis}{ext}` name.
    ///
    /// The partial file is removed if the stream fails.
    pub async fn save_stream<S, E>(&self, original_name: &str, mut stream: S) -> StorageResult<StoredFile>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let (filename, path, mut file) = self.create_unique(original_name).await?;
        let start = std::time::Instant::now();

        let mut size: u64 = 0;
        let result: StorageResult<()> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| StorageError::upload_failed(e.to_string()))?;
                file.write_all(&chunk).await?;
                size += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&path).await {
                warn!(path = %path.display(), "Failed to remove partial upload: {}", cleanup);
            }
            return Err(e);
        }

        info!(
            filename = %filename,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Stored upload"
        );

        Ok(StoredFile {
            filename,
            path,
            size,
        })
    }

    async fn create_unique(&self, original_name: &str) -> StorageResult<(String, PathBuf, fs::File)> {
        let base = upload_filename(original_name, Utc::now());

        for attempt in 0..NAME_ATTEMPTS {
            let filename = if attempt == 0 {
                base.clone()
            } else {
                match base.split_once('.') {
                    Some((stem, ext)) => format!("{}-{}.{}", stem, attempt, ext),
                    None => format!("{}-{}", base, attempt),
                }
            };
            let path = self.resolve(&filename)?;

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((filename, path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(StorageError::upload_failed(format!(
                        "Failed to create {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        Err(StorageError::upload_failed(format!(
            "No free name for {}",
            base
        )))
    }

    /// Open an artifact for reading, returning the handle and its length.
    pub async fn open(&self, key: &str) -> StorageResult<(fs::File, u64)> {
        let path = self.resolve(key)?;

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(key))
            }
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(StorageError::not_found(key));
        }

        Ok((file, meta.len()))
    }

    /// Delete one artifact. Returns `false` if it was already gone.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Deleted artifact");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::delete_failed(format!("{}: {}", key, e))),
        }
    }

    /// Delete a video's original and thumbnail. Missing files are skipped.
    ///
    /// The derived thumbnail key is always tried, so a thumbnail written but
    /// never recorded goes too.
    pub async fn delete_video_files(
        &self,
        video_id: &VideoId,
        filename: &str,
        recorded_thumbnail: Option<&str>,
    ) -> StorageResult<usize> {
        let derived = thumbnail_key(video_id);
        let recorded = recorded_thumbnail.filter(|key| *key != derived);

        let mut removed = 0;
        for key in [filename, derived.as_str()].into_iter().chain(recorded) {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
