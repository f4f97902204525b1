use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CORPUS_ROOT: &str = "data/unlabeled";
const DEFAULT_TRANSPORT_QUALITY: u8 = 70;
const DEFAULT_FRAME_QUALITY: u8 = 95;
const DEFAULT_IOU_THRESHOLD: f64 = 0.75;
const DEFAULT_EXIFTOOL: &str = "exiftool";

#[derive(Debug, Deserialize, Default)]
struct LabelerConfigFile {
    corpus_root: Option<PathBuf>,
    exiftool: Option<String>,
    jpeg: Option<JpegConfigFile>,
    consensus: Option<ConsensusConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct JpegConfigFile {
    transport_quality: Option<u8>,
    frame_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct ConsensusConfigFile {
    iou_threshold: Option<f64>,
}

/// Process-wide settings, built once at startup and handed to every component.
#[derive(Debug, Clone)]
pub struct LabelerConfig {
    pub corpus_root: PathBuf,
    /// JPEG quality used when a frame is returned to a caller.
    pub transport_quality: u8,
    /// JPEG quality used when frames are written at ingestion.
    pub frame_quality: u8,
    pub iou_threshold: f64,
    pub exiftool: String,
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            corpus_root: PathBuf::from(DEFAULT_CORPUS_ROOT),
            transport_quality: DEFAULT_TRANSPORT_QUALITY,
            frame_quality: DEFAULT_FRAME_QUALITY,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            exiftool: DEFAULT_EXIFTOOL.to_string(),
        }
    }
}

impl LabelerConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LABELER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Config rooted at `corpus_root` with every other setting at its default.
    pub fn with_root(corpus_root: impl Into<PathBuf>) -> Self {
        Self {
            corpus_root: corpus_root.into(),
            ..Self::default()
        }
    }

    fn from_file(file: LabelerConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            corpus_root: file.corpus_root.unwrap_or(defaults.corpus_root),
            transport_quality: file
                .jpeg
                .as_ref()
                .and_then(|jpeg| jpeg.transport_quality)
                .unwrap_or(defaults.transport_quality),
            frame_quality: file
                .jpeg
                .as_ref()
                .and_then(|jpeg| jpeg.frame_quality)
                .unwrap_or(defaults.frame_quality),
            iou_threshold: file
                .consensus
                .and_then(|consensus| consensus.iou_threshold)
                .unwrap_or(defaults.iou_threshold),
            exiftool: file.exiftool.unwrap_or(defaults.exiftool),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var("LABELER_CORPUS_ROOT") {
            if !root.trim().is_empty() {
                self.corpus_root = PathBuf::from(root);
            }
        }
        if let Ok(exiftool) = std::env::var("LABELER_EXIFTOOL") {
            if !exiftool.trim().is_empty() {
                self.exiftool = exiftool;
            }
        }
        if let Ok(quality) = std::env::var("LABELER_TRANSPORT_QUALITY") {
            self.transport_quality = quality
                .trim()
                .parse()
                .map_err(|_| anyhow!("LABELER_TRANSPORT_QUALITY must be an integer in 1..=100"))?;
        }
        if let Ok(quality) = std::env::var("LABELER_FRAME_QUALITY") {
            self.frame_quality = quality
                .trim()
                .parse()
                .map_err(|_| anyhow!("LABELER_FRAME_QUALITY must be an integer in 1..=100"))?;
        }
        if let Ok(threshold) = std::env::var("LABELER_IOU_THRESHOLD") {
            self.iou_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("LABELER_IOU_THRESHOLD must be a number in (0, 1]"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.corpus_root.as_os_str().is_empty() {
            return Err(anyhow!("corpus root cannot be empty"));
        }
        for (name, quality) in [
            ("transport_quality", self.transport_quality),
            ("frame_quality", self.frame_quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(anyhow!("{} must be in 1..=100, got {}", name, quality));
            }
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(anyhow!(
                "iou_threshold must be in (0, 1], got {}",
                self.iou_threshold
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<LabelerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
