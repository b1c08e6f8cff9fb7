//! External encoder/prober invocations.
//!
//! All media decoding goes through `ffmpeg`/`ffprobe` subprocesses. Chunks
//! are transcoded to raw RGB24 files so reading a decoded frame back is a
//! single fixed-size read with no decoder state.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{CastError, CastResult};

/// Source video metadata needed before any chunk work can start.
#[derive(Debug, Clone, Copy)]
pub struct MediaProbe {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
}

/// Probe source video metadata through `ffprobe`.
pub fn probe(source: &Path) -> CastResult<MediaProbe> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source)
        .output()
        .map_err(|e| CastError::Probe(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(CastError::Probe(format!(
            "ffprobe failed for '{}': {}",
            source.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| CastError::Probe(format!("ffprobe json parse failed: {e}")))?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| CastError::Probe("no video stream found".into()))?;
    let width = video
        .width
        .ok_or_else(|| CastError::Probe("missing video width from ffprobe".into()))?;
    let height = video
        .height
        .ok_or_else(|| CastError::Probe("missing video height from ffprobe".into()))?;
    let duration_secs = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| CastError::Probe("missing media duration from ffprobe".into()))?;

    Ok(MediaProbe {
        width,
        height,
        duration_secs,
    })
}

/// One chunk's transcoding parameters: a fixed-duration slice of the source
/// re-encoded frame-accurately at the target scale and rate.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub source: PathBuf,
    pub start_secs: u32,
    pub duration_secs: u32,
    pub frame_rate: u32,
    pub width: u32,
    pub height: u32,
    pub output: PathBuf,
}

impl TranscodeJob {
    /// Upper bound on frames this chunk may contain.
    pub fn frame_budget(&self) -> u32 {
        self.frame_rate * self.duration_secs
    }
}

/// Seam between the scheduler and the external encoder. Implemented by
/// [`FfmpegTranscoder`] in production and by synthetic writers in tests.
pub trait Transcode: Send + Sync {
    /// Produces the raw RGB24 segment described by `job` at `job.output`.
    /// A failure is recoverable per-chunk: the caller drops the chunk and
    /// that segment of the video stays unavailable.
    fn transcode(&self, job: &TranscodeJob) -> CastResult<()>;
}

/// Transcodes through the `ffmpeg` command-line encoder.
#[derive(Debug, Default)]
pub struct FfmpegTranscoder;

impl Transcode for FfmpegTranscoder {
    fn transcode(&self, job: &TranscodeJob) -> CastResult<()> {
        let filter = format!(
            "fps={},scale={}:{}:flags=lanczos",
            job.frame_rate, job.width, job.height
        );
        let out = Command::new("ffmpeg")
            .args(["-loglevel", "error", "-y"])
            .args(["-ss", &job.start_secs.to_string()])
            .arg("-i")
            .arg(&job.source)
            .args(["-vf", &filter])
            .args(["-frames:v", &job.frame_budget().to_string()])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-an"])
            .arg(&job.output)
            .output()
            .map_err(|e| CastError::Probe(format!("failed to run ffmpeg: {e}")))?;
        if !out.status.success() {
            return Err(CastError::Probe(format!(
                "ffmpeg chunk encode failed for '{}' at {}s: {}",
                job.source.display(),
                job.start_secs,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_budget_fixes_the_chunk_length() {
        let job = TranscodeJob {
            source: "in.mp4".into(),
            start_secs: 10,
            duration_secs: 5,
            frame_rate: 24,
            width: 80,
            height: 45,
            output: "out.rgb24".into(),
        };
        assert_eq!(job.frame_budget(), 120);
    }
}
