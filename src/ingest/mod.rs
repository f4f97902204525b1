//! Video ingestion.
//!
//! Turning a video into corpus entries happens in three steps:
//! - `decode_frames`: every frame of the video, in decode order
//! - `extract_metadata`: GPS position and creation time
//! - `materialize`: the on-disk frame corpus for a fresh `VideoId`
//!
//! Materialization assembles the whole video under a reserved staging
//! directory and renames it into place only once every file is written. A
//! failed ingestion removes the staging directory, so it leaves nothing that
//! frame selection could serve.
//!
//! Ingestion blocks until every frame is decoded and written. There is no
//! progress reporting and no cancellation.

pub mod file;
#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod metadata;

use anyhow::{Context, Result};
use rand::Rng;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

pub use file::FileSource;
use metadata::{read_capture_tags, Metadata};

use crate::annotations::AnnotationDocument;
use crate::config::LabelerConfig;
use crate::corpus::{CorpusLayout, FRAME_IMAGE_FILE, METADATA_FILE, TEMPLATE_FILE};
use crate::error::LabelError;
use crate::frame::DecodedFrame;
use crate::VideoId;

#[derive(Clone, Copy, Debug, Default)]
pub struct IngestOptions {
    /// Remove the source video after it has been published to the corpus.
    pub delete_source: bool,
}

pub struct VideoIngestor {
    layout: CorpusLayout,
    frame_quality: u8,
    exiftool: String,
}

impl VideoIngestor {
    pub fn new(config: &LabelerConfig) -> Self {
        Self {
            layout: CorpusLayout::new(config.corpus_root.clone()),
            frame_quality: config.frame_quality,
            exiftool: config.exiftool.clone(),
        }
    }

    pub fn layout(&self) -> &CorpusLayout {
        &self.layout
    }

    /// Decodes every frame of `path`. An unreadable video or one without
    /// frames is an ingest error; an empty result is never returned.
    pub fn decode_frames(&self, path: &str) -> Result<Vec<DecodedFrame>> {
        let mut source = FileSource::open(path).map_err(as_ingest_error)?;
        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame().map_err(as_ingest_error)? {
            frames.push(frame);
        }
        if frames.is_empty() {
            return Err(LabelError::Ingest(format!("{} contains no frames", path)).into());
        }
        log::info!("decoded {} frames from {}", source.stats().frames_decoded, path);
        Ok(frames)
    }

    pub fn extract_metadata(&self, path: &str) -> Result<Metadata> {
        let tags = read_capture_tags(path, &self.exiftool)?;
        Metadata::from_tags(&tags).with_context(|| format!("capture metadata of {}", path))
    }

    /// Publishes `frames` and `metadata` under a newly generated `VideoId`.
    ///
    /// Frame indices must run 0, 1, 2, ... in order.
    pub fn materialize<R: Rng + ?Sized>(
        &self,
        frames: &[DecodedFrame],
        metadata: &Metadata,
        rng: &mut R,
    ) -> Result<VideoId> {
        if frames.is_empty() {
            return Err(LabelError::Ingest("refusing to publish a video without frames".into()).into());
        }
        fs::create_dir_all(self.layout.root())
            .with_context(|| format!("create corpus root {}", self.layout.root().display()))
            .map_err(as_ingest_error)?;

        let video_id = VideoId::generate(rng);
        let staging = self.layout.staging_dir(&video_id);
        let target = self.layout.video_dir(&video_id);
        if staging.exists() || target.exists() {
            return Err(LabelError::Ingest(format!("video id {} already in use", video_id)).into());
        }

        log::info!(
            "staging {} frames for video {} in {}",
            frames.len(),
            video_id,
            staging.display()
        );
        let published = self
            .write_staged(&staging, frames, metadata)
            .and_then(|()| {
                fs::rename(&staging, &target).with_context(|| {
                    format!("publish {} as {}", staging.display(), target.display())
                })
            });
        if let Err(err) = published {
            discard_staging(&staging);
            return Err(as_ingest_error(err));
        }

        log::info!("published video {} at {}", video_id, target.display());
        Ok(video_id)
    }

    /// Decode, read metadata, then publish. Metadata is checked before
    /// anything is written.
    pub fn ingest<R: Rng + ?Sized>(
        &self,
        path: &str,
        options: IngestOptions,
        rng: &mut R,
    ) -> Result<VideoId> {
        let frames = self.decode_frames(path)?;
        let metadata = self.extract_metadata(path)?;
        let video_id = self.materialize(&frames, &metadata, rng)?;

        if options.delete_source && !file::is_stub_path(path) {
            match fs::remove_file(path) {
                Ok(()) => log::info!("removed source video {}", path),
                Err(err) => log::warn!("ingested {} but could not remove it: {}", path, err),
            }
        }
        Ok(video_id)
    }

    fn write_staged(
        &self,
        staging: &Path,
        frames: &[DecodedFrame],
        metadata: &Metadata,
    ) -> Result<()> {
        fs::create_dir(staging).with_context(|| format!("create {}", staging.display()))?;
        let template = serde_json::to_vec(&AnnotationDocument::default())?;

        for (position, frame) in frames.iter().enumerate() {
            if frame.index != position as u64 {
                return Err(LabelError::Ingest(format!(
                    "frame indices must be contiguous from 0: expected {}, got {}",
                    position, frame.index
                ))
                .into());
            }
            let frame_dir = staging.join(frame.index.to_string());
            fs::create_dir(&frame_dir)
                .with_context(|| format!("create {}", frame_dir.display()))?;
            self.write_frame_image(&frame_dir.join(FRAME_IMAGE_FILE), frame)?;
            fs::write(frame_dir.join(TEMPLATE_FILE), &template)
                .with_context(|| format!("write template for frame {}", frame.index))?;
        }

        let encoded = serde_json::to_vec(metadata).context("encode metadata")?;
        fs::write(staging.join(METADATA_FILE), encoded).context("write metadata")?;
        Ok(())
    }

    fn write_frame_image(&self, path: &Path, frame: &DecodedFrame) -> Result<()> {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        frame.write_jpeg(&mut out, self.frame_quality)?;
        out.flush()?;
        Ok(())
    }
}

/// Keeps typed errors as they are and classifies everything else as an ingest failure.
fn as_ingest_error(err: anyhow::Error) -> anyhow::Error {
    if err.downcast_ref::<LabelError>().is_some() {
        return err;
    }
    LabelError::Ingest(format!("{:#}", err)).into()
}

fn discard_staging(staging: &Path) {
    if let Err(err) = fs::remove_dir_all(staging) {
        if staging.exists() {
            log::warn!("failed to remove staging dir {}: {}", staging.display(), err);
        }
    }
}
