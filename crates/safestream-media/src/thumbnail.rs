//! Representative-frame extraction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Offset of the extracted frame, seconds.
pub const THUMBNAIL_OFFSET_SECS: f64 = 1.0;
pub const THUMBNAIL_WIDTH: u32 = 320;
pub const THUMBNAIL_HEIGHT: u32 = 240;

/// Hard ceiling for a single-frame extraction.
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs an external media tool against stored originals.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait MediaInspector: Send + Sync {
    /// Write one frame of `source` to `output_dir/output_name`.
    ///
    /// Returns the written path.
    async fn extract_thumbnail(
        &self,
        source: &Path,
        output_dir: &Path,
        output_name: &str,
    ) -> MediaResult<PathBuf>;
}

/// FFmpeg-backed inspector.
#[derive(Debug, Clone)]
pub struct FfmpegInspector {
    timeout: Duration,
}

impl Default for FfmpegInspector {
    fn default() -> Self {
        Self {
            timeout: EXTRACT_TIMEOUT,
        }
    }
}

impl FfmpegInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(source: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(source, output)
            .seek(THUMBNAIL_OFFSET_SECS)
            .single_frame()
            .video_filter(scale_filter())
            .log_level("error")
    }
}

fn scale_filter() -> String {
    format!("scale={}:{}", THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT)
}

/// Output names are plain file names, never paths.
pub fn validate_output_name(name: &str) -> MediaResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(MediaError::InvalidOutputName(name.to_string()));
    }
    Ok(())
}

#[async_trait]
impl MediaInspector for FfmpegInspector {
    async fn extract_thumbnail(
        &self,
        source: &Path,
        output_dir: &Path,
        output_name: &str,
    ) -> MediaResult<PathBuf> {
        validate_output_name(output_name)?;

        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(source.to_path_buf()));
        }

        tokio::fs::create_dir_all(output_dir).await?;
        let output = output_dir.join(output_name);

        debug!(source = %source.display(), output = %output.display(), "Extracting thumbnail");

        let cmd = Self::command(source, &output);
        FfmpegRunner::new().with_timeout(self.timeout).run(&cmd).await?;

        // FFmpeg exits 0 without output when the offset is past the end
        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(MediaError::ffmpeg_failed("no frame written", None, Some(0)));
        }

        Ok(output)
    }
}
