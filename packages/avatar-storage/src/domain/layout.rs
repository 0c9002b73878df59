//! Artifact key layout
//!
//! Every key is derived from the job id (or owner id for voice samples), so
//! concurrent writers for the same job converge on the same object.

use uuid::Uuid;

use super::ArtifactKey;

pub const AUDIO_PREFIX: &str = "renders/audio/";
pub const RAW_VIDEO_PREFIX: &str = "renders/raw-video/";
pub const FINAL_PREFIX: &str = "renders/final/";
pub const VOICE_SAMPLES_PREFIX: &str = "voice-samples/";

pub const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Synthesized speech for a job
pub fn audio_key(job_id: Uuid) -> ArtifactKey {
    ArtifactKey::new(format!("{}{}.mp3", AUDIO_PREFIX, job_id))
}

/// Location the video backend writes its raw output under
pub fn raw_video_prefix(job_id: Uuid) -> String {
    format!("{}{}/", RAW_VIDEO_PREFIX, job_id)
}

/// Merged output for a job
pub fn final_key(job_id: Uuid) -> ArtifactKey {
    ArtifactKey::new(format!("{}{}.mp4", FINAL_PREFIX, job_id))
}

pub fn voice_samples_prefix(owner_id: &str) -> String {
    format!("{}{}/", VOICE_SAMPLES_PREFIX, owner_id)
}
