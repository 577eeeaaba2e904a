//! FFmpeg CLI wrapper for media inspection.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Timeouts and stderr capture via tokio
//! - Thumbnail extraction behind the [`MediaInspector`] trait

pub mod command;
pub mod error;
pub mod thumbnail;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use thumbnail::{
    FfmpegInspector, MediaInspector, THUMBNAIL_HEIGHT, THUMBNAIL_OFFSET_SECS, THUMBNAIL_WIDTH,
};

#[cfg(any(test, feature = "test-support"))]
pub use thumbnail::MockMediaInspector;
