//! Bounded-concurrency media frame processing.
//!
//! A sibling utility, independent of the conversion pipeline: a fixed-size
//! worker pool backs frame extraction, a streaming per-frame transform and
//! chunked large-file helpers. Memory is bounded (frame memo and metadata
//! caches each hold a fixed number of entries, streaming holds one frame)
//! and every long operation is progress-observable.

use crate::services::transcoder::{FfmpegTools, VideoInfo};
use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use image::RgbImage;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_FRAME_CACHE_ENTRIES: usize = 32;
pub const DEFAULT_META_CACHE_ENTRIES: usize = 16;

const CHUNK_SIZE: usize = 1024 * 1024;
const CHUNK_PROGRESS_CADENCE: u64 = 10;
const FRAME_PROGRESS_CADENCE: u64 = 10;

/// Progress callback: `(done, total)` in operation-specific units.
pub type ProgressFn = dyn Fn(u64, u64) + Send + Sync;

/// FIFO-evicting cache with a fixed entry bound.
struct BoundedCache<V> {
    map: HashMap<String, V>,
    order: VecDeque<String>,
    capacity: usize,
}

impl<V: Clone> BoundedCache<V> {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, key: &str) -> Option<V> {
        self.map.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: V) {
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
            if self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.map.remove(&oldest);
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

pub struct MediaFrameProcessor {
    tools: Arc<FfmpegTools>,
    workers: Arc<Semaphore>,
    frame_cache: Mutex<BoundedCache<Arc<RgbImage>>>,
    /// Sized independently from the frame memo, manually evicted.
    meta_cache: Mutex<BoundedCache<VideoInfo>>,
}

impl MediaFrameProcessor {
    pub fn new(tools: Arc<FfmpegTools>, max_workers: usize, frame_cache_entries: usize) -> Self {
        Self {
            tools,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            frame_cache: Mutex::new(BoundedCache::new(frame_cache_entries)),
            meta_cache: Mutex::new(BoundedCache::new(DEFAULT_META_CACHE_ENTRIES)),
        }
    }

    pub fn with_defaults(tools: Arc<FfmpegTools>) -> Self {
        Self::new(tools, DEFAULT_WORKERS, DEFAULT_FRAME_CACHE_ENTRIES)
    }

    /// Decode the frame nearest `timestamp` (seconds), memoized by
    /// path + timestamp.
    pub async fn frame_at(&self, video: &Utf8Path, timestamp: f64) -> Result<Arc<RgbImage>> {
        let key = format!("{video}@{timestamp:.3}");
        if let Some(hit) = self.frame_cache.lock().unwrap().get(&key) {
            return Ok(hit);
        }

        let _permit = self.workers.acquire().await?;
        let png = self
            .tools
            .extract_frame_at(video, timestamp)
            .await
            .with_context(|| format!("Cannot extract frame at {timestamp}s from {video}"))?;
        let frame = Arc::new(
            image::load_from_memory(&png)
                .context("Cannot decode extracted frame")?
                .to_rgb8(),
        );

        self.frame_cache
            .lock()
            .unwrap()
            .insert(key, frame.clone());
        Ok(frame)
    }

    /// Extract frames by index, one bounded worker per index. A missing
    /// frame yields `None` instead of failing the whole request; results
    /// come back in request order.
    pub async fn extract_frames(
        &self,
        video: &Utf8Path,
        indices: &[u64],
    ) -> Vec<(u64, Option<RgbImage>)> {
        let mut tasks = Vec::with_capacity(indices.len());
        for &index in indices {
            let tools = self.tools.clone();
            let workers = self.workers.clone();
            let video = video.to_path_buf();
            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return (index, None);
                };
                match tools.extract_frame_by_index(&video, index).await {
                    Ok(png) => (index, image::load_from_memory(&png).ok().map(|i| i.to_rgb8())),
                    Err(e) => {
                        tracing::warn!("Frame {} of {} failed: {}", index, video, e);
                        (index, None)
                    }
                }
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(pair) => results.push(pair),
                Err(e) => tracing::error!("Frame extraction task failed: {}", e),
            }
        }
        results
    }

    /// Stream every frame of `input` through `transform` into a new video
    /// at `output`. Single pass, one frame in memory at a time; progress
    /// fires every 10 frames. Returns the frame count.
    ///
    /// The transform must preserve frame dimensions.
    pub async fn transform_video<F>(
        &self,
        input: &Utf8Path,
        output: &Utf8Path,
        transform: F,
        progress: Option<Arc<ProgressFn>>,
    ) -> Result<u64>
    where
        F: FnMut(RgbImage) -> RgbImage + Send + 'static,
    {
        let info = self
            .video_info(input)
            .await
            .ok_or_else(|| anyhow!("Cannot probe {input}"))?;
        let _permit = self.workers.acquire().await?;

        let ffmpeg = self.tools.ffmpeg_path().to_path_buf();
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || {
            stream_transform(&ffmpeg, &input, &output, &info, transform, progress)
        })
        .await?
    }

    /// Probed metadata for `video`, cached until evicted.
    pub async fn video_info(&self, video: &Utf8Path) -> Option<VideoInfo> {
        let key = format!("info:{video}");
        if let Some(hit) = self.meta_cache.lock().unwrap().get(&key) {
            return Some(hit);
        }
        let info = self.tools.probe_video_info(video).await?;
        self.meta_cache.lock().unwrap().insert(key, info.clone());
        Some(info)
    }

    pub fn clear_caches(&self) {
        self.frame_cache.lock().unwrap().clear();
        self.meta_cache.lock().unwrap().clear();
        tracing::info!("Media caches cleared");
    }

    pub fn cached_frames(&self) -> usize {
        self.frame_cache.lock().unwrap().len()
    }

    /// SHA-256 of a whole file, read in 1 MiB chunks; progress every 10
    /// chunks.
    pub async fn hash_file(
        &self,
        path: &Utf8Path,
        progress: Option<Arc<ProgressFn>>,
    ) -> Result<String> {
        let _permit = self.workers.acquire().await?;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || hash_file_chunked(&path, progress)).await?
    }

    /// Chunked file copy for very large files; progress every 10 chunks.
    /// Returns the number of bytes copied.
    pub async fn copy_file(
        &self,
        src: &Utf8Path,
        dst: &Utf8Path,
        progress: Option<Arc<ProgressFn>>,
    ) -> Result<u64> {
        let _permit = self.workers.acquire().await?;
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        tokio::task::spawn_blocking(move || copy_file_chunked(&src, &dst, progress)).await?
    }
}

fn stream_transform<F>(
    ffmpeg: &Utf8Path,
    input: &Utf8PathBuf,
    output: &Utf8PathBuf,
    info: &VideoInfo,
    mut transform: F,
    progress: Option<Arc<ProgressFn>>,
) -> Result<u64>
where
    F: FnMut(RgbImage) -> RgbImage,
{
    use std::process::{Command, Stdio};

    let (width, height) = (info.width, info.height);
    if width == 0 || height == 0 {
        return Err(anyhow!("Probed geometry of {input} is empty"));
    }
    let frame_len = width as usize * height as usize * 3;
    let fps = if info.fps > 0.0 { info.fps } else { 30.0 };

    let mut decoder = Command::new(ffmpeg)
        .args([
            "-v", "error", "-i", input.as_str(), "-f", "rawvideo", "-pix_fmt", "rgb24", "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("Cannot spawn decoder")?;

    let size = format!("{width}x{height}");
    let rate = format!("{fps}");
    let mut encoder = Command::new(ffmpeg)
        .args([
            "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s", &size, "-r", &rate,
            "-i", "-", "-c:v", "libx264", "-pix_fmt", "yuv420p", "-y", output.as_str(),
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Cannot spawn encoder")?;

    let mut source = decoder.stdout.take().expect("decoder stdout is piped");
    let mut sink = encoder.stdin.take().expect("encoder stdin is piped");

    let mut buffer = vec![0u8; frame_len];
    let mut frames: u64 = 0;
    while read_exact_or_eof(&mut source, &mut buffer)? {
        let frame = RgbImage::from_raw(width, height, buffer.clone())
            .ok_or_else(|| anyhow!("Frame buffer size mismatch"))?;
        let transformed = transform(frame);
        if transformed.dimensions() != (width, height) {
            return Err(anyhow!("Frame transform must preserve dimensions"));
        }
        sink.write_all(transformed.as_raw())?;
        frames += 1;
        if frames % FRAME_PROGRESS_CADENCE == 0 {
            if let Some(callback) = &progress {
                callback(frames, info.frame_count);
            }
        }
    }

    drop(sink);
    let decoder_status = decoder.wait()?;
    let encoder_status = encoder.wait()?;
    if !decoder_status.success() || !encoder_status.success() {
        return Err(anyhow!("Transform pipeline exited abnormally"));
    }

    tracing::info!("Transformed {} frames: {} -> {}", frames, input, output);
    Ok(frames)
}

/// Fill `buf` completely, or report a clean EOF at a frame boundary.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(anyhow!("Truncated frame: {} of {} bytes", filled, buf.len()));
        }
        filled += n;
    }
    Ok(true)
}

pub(crate) fn hash_file_chunked(
    path: &Utf8Path,
    progress: Option<Arc<ProgressFn>>,
) -> Result<String> {
    let total = std::fs::metadata(path)
        .with_context(|| format!("Cannot stat {path}"))?
        .len();
    let mut file = std::fs::File::open(path).with_context(|| format!("Cannot open {path}"))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut done: u64 = 0;
    let mut chunks: u64 = 0;
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        done += n as u64;
        chunks += 1;
        if chunks % CHUNK_PROGRESS_CADENCE == 0 {
            if let Some(callback) = &progress {
                callback(done, total);
            }
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub(crate) fn copy_file_chunked(
    src: &Utf8Path,
    dst: &Utf8Path,
    progress: Option<Arc<ProgressFn>>,
) -> Result<u64> {
    let total = std::fs::metadata(src)
        .with_context(|| format!("Cannot stat {src}"))?
        .len();
    let mut reader = std::fs::File::open(src).with_context(|| format!("Cannot open {src}"))?;
    let mut writer =
        std::fs::File::create(dst).with_context(|| format!("Cannot create {dst}"))?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut done: u64 = 0;
    let mut chunks: u64 = 0;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n])?;
        done += n as u64;
        chunks += 1;
        if chunks % CHUNK_PROGRESS_CADENCE == 0 {
            if let Some(callback) = &progress {
                callback(done, total);
            }
        }
    }
    writer.flush()?;
    Ok(done)
}
