//! Merge engine: combine raw video and speech audio into one MP4
//!
//! The video stream is copied unmodified, audio is re-encoded to AAC, and the
//! output stops at the shorter of the two inputs. `+bitexact` keeps repeated
//! merges of the same inputs byte-identical.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("{0} input is empty")]
    EmptyInput(&'static str),

    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    #[error("ffmpeg exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("merge produced no output")]
    EmptyOutput,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MergeError {
    /// True when the inputs themselves cannot be merged. Launch and scratch
    /// space failures are faults of the host, not of the job.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            MergeError::EmptyInput(_) | MergeError::Failed { .. } | MergeError::EmptyOutput
        )
    }
}

/// Deterministic audio + video combination
#[async_trait]
pub trait MergeEngine: Send + Sync {
    async fn merge(&self, video: Vec<u8>, audio: Vec<u8>) -> Result<Vec<u8>, MergeError>;
}

/// ffmpeg command line for one merge
pub fn ffmpeg_args(video: &Path, audio: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into()];
    args.push(video.into());
    args.push("-i".into());
    args.push(audio.into());
    args.extend(
        [
            "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac", "-shortest",
            "-fflags", "+bitexact",
        ]
        .into_iter()
        .map(OsString::from),
    );
    args.push(output.into());
    args
}

/// Merge engine backed by the ffmpeg CLI
pub struct FfmpegMerger {
    ffmpeg: PathBuf,
}

impl FfmpegMerger {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl Default for FfmpegMerger {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl MergeEngine for FfmpegMerger {
    async fn merge(&self, video: Vec<u8>, audio: Vec<u8>) -> Result<Vec<u8>, MergeError> {
        if video.is_empty() {
            return Err(MergeError::EmptyInput("video"));
        }
        if audio.is_empty() {
            return Err(MergeError::EmptyInput("audio"));
        }

        let workdir = TempDir::new()?;
        let video_path = workdir.path().join("video.mp4");
        let audio_path = workdir.path().join("audio.mp3");
        let output_path = workdir.path().join("final.mp4");

        tokio::fs::write(&video_path, &video).await?;
        tokio::fs::write(&audio_path, &audio).await?;

        let args = ffmpeg_args(&video_path, &audio_path, &output_path);
        debug!("Running {} {:?}", self.ffmpeg.display(), args);

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MergeError::Spawn {
                binary: self.ffmpeg.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(MergeError::Failed {
                status: output.status.to_string(),
                stderr: tail,
            });
        }

        let merged = tokio::fs::read(&output_path).await?;
        if merged.is_empty() {
            return Err(MergeError::EmptyOutput);
        }

        info!(
            "Merged {} bytes video + {} bytes audio into {} bytes",
            video.len(),
            audio.len(),
            merged.len()
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_args_copy_video_and_clamp_to_shortest() {
        let args = ffmpeg_args(
            Path::new("/tmp/v.mp4"),
            Path::new("/tmp/a.mp3"),
            Path::new("/tmp/out.mp4"),
        );
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(args[0], "-y");
        assert_eq!(&args[1..5], &["-i", "/tmp/v.mp4", "-i", "/tmp/a.mp3"]);
        let joined = args.join(" ");
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-shortest"));
        assert!(joined.contains("-map 0:v:0 -map 1:a:0"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }

    #[tokio::test]
    async fn test_empty_inputs_rejected() {
        let merger = FfmpegMerger::default();
        assert!(matches!(
            merger.merge(Vec::new(), vec![1]).await,
            Err(MergeError::EmptyInput("video"))
        ));
        assert!(matches!(
            merger.merge(vec![1], Vec::new()).await,
            Err(MergeError::EmptyInput("audio"))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let merger = FfmpegMerger::new("/nonexistent/bin/ffmpeg-avatar");
        let err = merger.merge(vec![1], vec![2]).await.unwrap_err();
        assert!(matches!(err, MergeError::Spawn { .. }));
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_input_errors_are_separated_from_host_faults() {
        assert!(MergeError::EmptyInput("video").is_input_error());
        assert!(MergeError::EmptyOutput.is_input_error());
        assert!(MergeError::Failed {
            status: "exit status: 1".to_string(),
            stderr: "moov atom not found".to_string(),
        }
        .is_input_error());

        let io = std::io::Error::new(std::io::ErrorKind::Other, "no space left on device");
        assert!(!MergeError::Io(io).is_input_error());
    }
}
