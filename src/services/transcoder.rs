//! External encoder/prober integration.
//!
//! All video work is delegated to ffmpeg/ffprobe subprocesses. Tools are
//! resolved once per process (application directory, then the working
//! directory, then the system search path) and the resolved paths are
//! cached. Explicit paths can be injected for tests.

use camino::{Utf8Path, Utf8PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::process::Command;

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";

/// How much subprocess stderr is kept for diagnostics.
const STDERR_EXCERPT_CHARS: usize = 500;

/// Errors from encoder/prober invocations.
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Source video not found: {0}")]
    SourceMissing(String),

    #[error("Encoder exited with status {status}: {stderr}")]
    EncodeFailed { status: i32, stderr: String },

    #[error("Process error: {0}")]
    Process(#[from] std::io::Error),
}

/// Probed stream/container metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// 0 when the container does not report a frame count.
    pub frame_count: u64,
    pub duration: f64,
}

/// Resolved encoder and prober paths.
pub struct FfmpegTools {
    ffmpeg: Utf8PathBuf,
    ffprobe: Option<Utf8PathBuf>,
}

static CACHED_TOOLS: OnceLock<Option<Arc<FfmpegTools>>> = OnceLock::new();

impl FfmpegTools {
    /// Resolve both tools. The prober is looked up next to the encoder
    /// first since they normally ship together.
    pub fn discover() -> Option<Self> {
        let ffmpeg = find_tool(FFMPEG)?;
        let ffprobe = ffmpeg
            .parent()
            .map(|dir| dir.join(tool_name(FFPROBE)))
            .filter(|path| path.is_file())
            .or_else(|| find_tool(FFPROBE));
        if ffprobe.is_none() {
            tracing::warn!("Prober not found; durations will fall back to defaults");
        }
        tracing::info!("Using encoder at {}", ffmpeg);
        Some(Self { ffmpeg, ffprobe })
    }

    /// Process-wide cached discovery.
    pub fn discover_cached() -> Option<Arc<FfmpegTools>> {
        CACHED_TOOLS
            .get_or_init(|| Self::discover().map(Arc::new))
            .clone()
    }

    /// Explicit tool paths, used by tests and embedders.
    pub fn with_paths(ffmpeg: Utf8PathBuf, ffprobe: Option<Utf8PathBuf>) -> Self {
        Self { ffmpeg, ffprobe }
    }

    pub fn ffmpeg_path(&self) -> &Utf8Path {
        &self.ffmpeg
    }

    /// Undo the legacy 180° storage rotation and re-encode to the fixed
    /// H.264 profile. The audio stream is dropped.
    pub async fn correct_and_reencode(
        &self,
        src: &Utf8Path,
        dst: &Utf8Path,
    ) -> Result<(), TranscodeError> {
        if !src.is_file() {
            return Err(TranscodeError::SourceMissing(src.to_string()));
        }
        tracing::info!("Re-encoding {} -> {}", src, dst);

        let output = Command::new(&self.ffmpeg)
            .args(build_encode_args(src, dst))
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = stderr_excerpt(&output.stderr);
            tracing::error!("Encoder failed for {}: {}", src, stderr);
            return Err(TranscodeError::EncodeFailed {
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(())
    }

    /// Container duration in seconds, or `None` when the prober is missing,
    /// exits non-zero or prints something unparsable. Callers fall back to
    /// a default duration instead of failing the conversion.
    pub async fn probe_duration(&self, path: &Utf8Path) -> Option<f64> {
        let ffprobe = self.ffprobe.as_ref()?;
        let output = Command::new(ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path.as_str())
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            tracing::warn!("Duration probe failed for {}", path);
            return None;
        }
        parse_duration_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// Stream and container metadata as reported by the prober.
    pub async fn probe_video_info(&self, path: &Utf8Path) -> Option<VideoInfo> {
        let ffprobe = self.ffprobe.as_ref()?;
        let output = Command::new(ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,nb_frames",
                "-show_entries",
                "format=duration",
                "-of",
                "json",
            ])
            .arg(path.as_str())
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            tracing::warn!("Metadata probe failed for {}", path);
            return None;
        }
        parse_video_info(&String::from_utf8_lossy(&output.stdout))
    }

    /// First decodable frame of `video` as encoded PNG bytes.
    pub async fn extract_first_frame(&self, video: &Utf8Path) -> Result<Vec<u8>, TranscodeError> {
        self.extract_frame(video, &["-i", video.as_str()]).await
    }

    /// Frame nearest to `timestamp` (seconds) as encoded PNG bytes.
    pub async fn extract_frame_at(
        &self,
        video: &Utf8Path,
        timestamp: f64,
    ) -> Result<Vec<u8>, TranscodeError> {
        let ts = format!("{timestamp:.3}");
        self.extract_frame(video, &["-ss", &ts, "-i", video.as_str()])
            .await
    }

    /// Frame with index `index` as encoded PNG bytes.
    pub async fn extract_frame_by_index(
        &self,
        video: &Utf8Path,
        index: u64,
    ) -> Result<Vec<u8>, TranscodeError> {
        let select = format!("select=eq(n\\,{index})");
        self.extract_frame(video, &["-i", video.as_str(), "-vf", &select])
            .await
    }

    async fn extract_frame(
        &self,
        video: &Utf8Path,
        input_args: &[&str],
    ) -> Result<Vec<u8>, TranscodeError> {
        if !video.is_file() {
            return Err(TranscodeError::SourceMissing(video.to_string()));
        }
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error"])
            .args(input_args)
            .args(["-frames:v", "1", "-f", "image2pipe", "-c:v", "png", "-"])
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() || output.stdout.is_empty() {
            let stderr = stderr_excerpt(&output.stderr);
            return Err(TranscodeError::EncodeFailed {
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(output.stdout)
    }
}

/// Argument list for the orientation-correcting re-encode. Pure so the
/// invocation is testable without the tool installed.
pub fn build_encode_args(src: &Utf8Path, dst: &Utf8Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        src.to_string(),
        // vflip+hflip nets a 180° rotation and decodes more widely than
        // rotate filters.
        "-vf".to_string(),
        "vflip,hflip".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-profile:v".to_string(),
        "high".to_string(),
        "-level".to_string(),
        "4.0".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-b:v".to_string(),
        "3000k".to_string(),
        "-an".to_string(),
        "-y".to_string(),
        dst.to_string(),
    ]
}

pub fn parse_duration_output(stdout: &str) -> Option<f64> {
    let seconds: f64 = stdout.trim().parse().ok()?;
    (seconds > 0.0).then_some(seconds)
}

fn parse_video_info(json: &str) -> Option<VideoInfo> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    let stream = value.get("streams")?.get(0)?;
    let width = stream.get("width")?.as_u64()? as u32;
    let height = stream.get("height")?.as_u64()? as u32;
    let fps = stream
        .get("r_frame_rate")
        .and_then(|v| v.as_str())
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);
    let frame_count = stream
        .get("nb_frames")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let duration = value
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);
    Some(VideoInfo {
        width,
        height,
        fps,
        frame_count,
        duration,
    })
}

/// Frame rates come as rationals like "30000/1001".
fn parse_frame_rate(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => raw.parse().ok(),
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .chars()
        .take(STDERR_EXCERPT_CHARS)
        .collect()
}

fn tool_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

/// Look for an external tool: next to the application binary, then in the
/// working directory, then on the system search path.
pub(crate) fn find_tool(base: &str) -> Option<Utf8PathBuf> {
    let name = tool_name(base);

    if let Ok(exe) = std::env::current_exe() {
        if let Ok(exe) = Utf8PathBuf::from_path_buf(exe) {
            if let Some(dir) = exe.parent() {
                let candidate = dir.join(&name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        if let Ok(cwd) = Utf8PathBuf::from_path_buf(cwd) {
            let candidate = cwd.join(&name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(&name);
        if candidate.is_file() {
            if let Ok(found) = Utf8PathBuf::from_path_buf(candidate) {
                return Some(found);
            }
        }
    }
    None
}
