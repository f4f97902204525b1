//! Annotation documents and their per-frame store.
//!
//! Each producer owns one `<producer>.json` file in a frame directory and only
//! ever replaces its own file, atomically. Loading is fail-fast: one malformed
//! document fails the whole load with a parse error naming the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::consensus::Polygon;
use crate::corpus::{
    is_reserved, write_atomic, CorpusLayout, CorpusLister, FsLister, TEMPLATE_FILE,
};
use crate::error::LabelError;
use crate::{FrameKey, VideoId};

/// Common wire shape of raw proposals and derived consensus shapes: a label
/// and four points.
pub trait LabeledShape {
    fn label(&self) -> &str;
    fn polygon(&self) -> &Polygon;
}

/// One annotator's proposal for one object in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub label: String,
    pub producer: String,
    #[serde(default)]
    pub qualifiers: BTreeSet<String>,
    pub points: Polygon,
}

impl Shape {
    pub fn new(label: impl Into<String>, producer: impl Into<String>, points: Polygon) -> Self {
        Self {
            label: label.into(),
            producer: producer.into(),
            qualifiers: BTreeSet::new(),
            points,
        }
    }
}

impl LabeledShape for Shape {
    fn label(&self) -> &str {
        &self.label
    }

    fn polygon(&self) -> &Polygon {
        &self.points
    }
}

/// On-disk document: `{"shapes": [...]}`. The default value is the empty template.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationDocument {
    #[serde(default)]
    pub shapes: Vec<Shape>,
}

/// A loaded document together with where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub frame: FrameKey,
    /// Taken from the document's file name.
    pub producer: String,
    pub shapes: Vec<Shape>,
}

pub struct AnnotationStore<L = FsLister> {
    layout: CorpusLayout,
    lister: L,
}

impl AnnotationStore<FsLister> {
    pub fn new(layout: CorpusLayout) -> Self {
        Self::with_lister(layout, FsLister)
    }
}

impl<L: CorpusLister> AnnotationStore<L> {
    pub fn with_lister(layout: CorpusLayout, lister: L) -> Self {
        Self { layout, lister }
    }

    /// All submitted documents for one frame. The ingestion template is not a
    /// submission and is skipped. Order is by producer id.
    pub fn load(&self, video_id: &VideoId, frame_index: u64) -> Result<Vec<Annotation>> {
        let frame_dir = self.layout.frame_dir(video_id, frame_index);
        let mut names: Vec<String> = self
            .lister
            .list_entries(&frame_dir)?
            .into_iter()
            .filter(|name| {
                let keep = !is_reserved(name) && name.ends_with(".json") && name != TEMPLATE_FILE;
                if !keep {
                    log::debug!("skipping non-document entry {} in {}", name, frame_dir.display());
                }
                keep
            })
            .collect();
        names.sort();

        let mut annotations = Vec::with_capacity(names.len());
        for name in names {
            let path = frame_dir.join(&name);
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("read annotation {}", path.display()))?;
            let document: AnnotationDocument =
                serde_json::from_str(&raw).map_err(|e| LabelError::Parse {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            let producer = name.trim_end_matches(".json").to_string();
            annotations.push(Annotation {
                frame: FrameKey {
                    video_id: video_id.clone(),
                    frame_index,
                },
                producer,
                shapes: document.shapes,
            });
        }
        log::debug!(
            "loaded {} annotations for {}/{}",
            annotations.len(),
            video_id,
            frame_index
        );
        Ok(annotations)
    }

    /// Stores `document` as `producer`'s submission for a frame, replacing any
    /// earlier submission by the same producer.
    pub fn submit(
        &self,
        video_id: &VideoId,
        frame_index: u64,
        producer: &str,
        document: &AnnotationDocument,
    ) -> Result<PathBuf> {
        validate_producer_id(producer)?;
        let frame_dir = self.layout.frame_dir(video_id, frame_index);
        if !frame_dir.is_dir() {
            return Err(LabelError::NotFound(frame_dir).into());
        }
        let path = self.layout.annotation_path(video_id, frame_index, producer);
        let encoded = serde_json::to_vec(document).context("encode annotation document")?;
        write_atomic(&path, &encoded)?;
        log::info!(
            "stored {} shapes from {} for {}/{}",
            document.shapes.len(),
            producer,
            video_id,
            frame_index
        );
        Ok(path)
    }
}

/// Producer ids become file names, so they are restricted to a safe alphabet.
pub fn validate_producer_id(producer: &str) -> Result<()> {
    static PRODUCER_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = PRODUCER_RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static producer pattern")
    });
    if !re.is_match(producer) {
        return Err(LabelError::InvalidInput(format!("invalid producer id '{}'", producer)).into());
    }
    if format!("{}.json", producer) == TEMPLATE_FILE {
        return Err(LabelError::InvalidInput(format!("producer id '{}' is reserved", producer)).into());
    }
    Ok(())
}
