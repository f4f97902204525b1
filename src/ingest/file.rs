//! Local video frame source.
//!
//! `FileSource` yields the frames of one local video in decode order. Paths of
//! the form `stub://<name>?frames=N&width=W&height=H` produce deterministic
//! synthetic frames (used by tests and demos); anything else is decoded with
//! FFmpeg when the `ingest-ffmpeg` feature is enabled.

use anyhow::{anyhow, Context, Result};
use std::path::Path;

#[cfg(feature = "ingest-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::frame::DecodedFrame;

pub const STUB_SCHEME: &str = "stub://";

const DEFAULT_STUB_FRAMES: u64 = 3;
const DEFAULT_STUB_WIDTH: u32 = 64;
const DEFAULT_STUB_HEIGHT: u32 = 48;
const DEFAULT_STUB_GPS: &str = "37 deg 46' 29.64\" N, 122 deg 25' 9.84\" W, 16 m Above Sea Level";
const DEFAULT_STUB_CREATED: &str = "2020:01:02 03:04:05+0200";

/// Local file frame source.
pub struct FileSource {
    path: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(path: &str) -> Result<Self> {
        if !is_local_file_path(path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): {}",
                path
            ));
        }
        if is_stub_path(path) {
            let spec = SyntheticSpec::parse(path)?;
            log::info!("FileSource: opened {} (synthetic, {} frames)", path, spec.frames);
            return Ok(Self {
                path: path.to_string(),
                backend: FileBackend::Synthetic(SyntheticFileSource::new(spec)),
            });
        }
        if !Path::new(path).is_file() {
            return Err(anyhow!("video file {} does not exist", path));
        }
        #[cfg(feature = "ingest-ffmpeg")]
        {
            let source = FfmpegFileSource::open(path)?;
            log::info!("FileSource: opened {} (ffmpeg)", path);
            Ok(Self {
                path: path.to_string(),
                backend: FileBackend::Ffmpeg(source),
            })
        }
        #[cfg(not(feature = "ingest-ffmpeg"))]
        {
            Err(anyhow!(
                "decoding {} requires the ingest-ffmpeg feature",
                path
            ))
        }
    }

    /// Next frame in decode order, or `None` once the video is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.next_frame()),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    pub fn stats(&self) -> FileStats {
        let frames_decoded = match &self.backend {
            FileBackend::Synthetic(source) => source.emitted,
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frames_decoded(),
        };
        FileStats {
            frames_decoded,
            path: self.path.clone(),
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_decoded: u64,
    pub path: String,
}

pub fn is_stub_path(path: &str) -> bool {
    path.starts_with(STUB_SCHEME)
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if is_stub_path(path) {
        return true;
    }
    !path.contains("://")
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

/// Parameters of a `stub://` video, including the capture tags it reports.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SyntheticSpec {
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub gps: Option<String>,
    pub created: Option<String>,
}

impl SyntheticSpec {
    pub(crate) fn parse(path: &str) -> Result<Self> {
        let rest = path
            .strip_prefix(STUB_SCHEME)
            .ok_or_else(|| anyhow!("not a stub path: {}", path))?;
        let mut spec = SyntheticSpec {
            frames: DEFAULT_STUB_FRAMES,
            width: DEFAULT_STUB_WIDTH,
            height: DEFAULT_STUB_HEIGHT,
            gps: Some(DEFAULT_STUB_GPS.to_string()),
            created: Some(DEFAULT_STUB_CREATED.to_string()),
        };
        let Some((_, query)) = rest.split_once('?') else {
            return Ok(spec);
        };
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "frames" => {
                    spec.frames = value
                        .parse()
                        .with_context(|| format!("invalid stub frame count '{}'", value))?
                }
                "width" => {
                    spec.width = value
                        .parse()
                        .with_context(|| format!("invalid stub width '{}'", value))?
                }
                "height" => {
                    spec.height = value
                        .parse()
                        .with_context(|| format!("invalid stub height '{}'", value))?
                }
                "gps" => spec.gps = non_empty(value),
                "created" => spec.created = non_empty(value),
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if spec.width == 0 || spec.height == 0 {
            return Err(anyhow!("stub frame dimensions must be non-zero"));
        }
        Ok(spec)
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

struct SyntheticFileSource {
    spec: SyntheticSpec,
    emitted: u64,
}

impl SyntheticFileSource {
    fn new(spec: SyntheticSpec) -> Self {
        Self { spec, emitted: 0 }
    }

    fn next_frame(&mut self) -> Option<DecodedFrame> {
        if self.emitted >= self.spec.frames {
            return None;
        }
        let index = self.emitted;
        self.emitted += 1;
        Some(DecodedFrame::new(
            index,
            self.spec.width,
            self.spec.height,
            self.generate_synthetic_pixels(index),
        ))
    }

    fn generate_synthetic_pixels(&self, index: u64) -> Vec<u8> {
        let pixel_count = self.spec.width as usize * self.spec.height as usize * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + index * 17) % 256) as u8;
        }
        pixels
    }
}
