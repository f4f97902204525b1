//! Entry points for the network layer: ingest an uploaded video, pick a frame
//! and build its labeling payload, compute consensus, store a submission.

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::annotations::{AnnotationDocument, AnnotationStore};
use crate::codec;
use crate::config::LabelerConfig;
use crate::consensus::{ConsensusEngine, ConsensusMap};
use crate::corpus::{CorpusLayout, CorpusLister, FsLister};
use crate::ingest::{IngestOptions, VideoIngestor};
use crate::select::{Cursor, FrameSelector, TraversalMode};
use crate::VideoId;

/// What the caller wants served next.
#[derive(Clone, Debug)]
pub struct LabelingRequest {
    pub mode: TraversalMode,
    pub cursor: Option<Cursor>,
    /// Attach consensus shapes for the chosen frame.
    pub with_consensus: bool,
}

impl Default for LabelingRequest {
    fn default() -> Self {
        Self {
            mode: TraversalMode::Random,
            cursor: None,
            with_consensus: false,
        }
    }
}

/// Response body for one frame served to an annotator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelingPayload {
    pub uuid: VideoId,
    pub frame_no: u64,
    /// Base64 JPEG.
    pub frame: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ConsensusMap>,
}

pub struct Labeler<L = FsLister> {
    config: LabelerConfig,
    ingestor: VideoIngestor,
    selector: FrameSelector<L>,
    store: AnnotationStore<L>,
    engine: ConsensusEngine,
}

impl Labeler<FsLister> {
    pub fn new(config: LabelerConfig) -> Self {
        Self::with_lister(config, FsLister)
    }
}

impl<L: CorpusLister + Clone> Labeler<L> {
    pub fn with_lister(config: LabelerConfig, lister: L) -> Self {
        let layout = CorpusLayout::new(config.corpus_root.clone());
        Self {
            ingestor: VideoIngestor::new(&config),
            selector: FrameSelector::with_lister(layout.clone(), lister.clone()),
            store: AnnotationStore::with_lister(layout, lister),
            engine: ConsensusEngine::new(config.iou_threshold),
            config,
        }
    }

    pub fn config(&self) -> &LabelerConfig {
        &self.config
    }

    pub fn ingest<R: Rng + ?Sized>(
        &self,
        path: &str,
        options: IngestOptions,
        rng: &mut R,
    ) -> Result<VideoId> {
        self.ingestor
            .ingest(path, options, rng)
            .with_context(|| format!("ingest {}", path))
    }

    /// Picks the next frame and encodes it for transport, with consensus
    /// shapes when requested.
    pub fn next_payload<R: Rng + ?Sized>(
        &self,
        request: &LabelingRequest,
        rng: &mut R,
    ) -> Result<LabelingPayload> {
        let frame = self
            .selector
            .pick_next(request.mode, request.cursor.as_ref(), rng)?;
        log::debug!("serving {}/{}", frame.video_id, frame.frame_index);

        let encoded = codec::encode(&frame.image_path, self.config.transport_quality)?;
        let metadata = if request.with_consensus {
            Some(self.consensus(&frame.video_id, frame.frame_index)?)
        } else {
            None
        };
        Ok(LabelingPayload {
            uuid: frame.video_id,
            frame_no: frame.frame_index,
            frame: encoded,
            metadata,
        })
    }

    pub fn consensus(&self, video_id: &VideoId, frame_index: u64) -> Result<ConsensusMap> {
        let annotations = self.store.load(video_id, frame_index)?;
        self.engine
            .compute(&annotations)
            .with_context(|| format!("consensus for {}/{}", video_id, frame_index))
    }

    pub fn submit(
        &self,
        video_id: &VideoId,
        frame_index: u64,
        producer: &str,
        document: &AnnotationDocument,
    ) -> Result<PathBuf> {
        self.store.submit(video_id, frame_index, producer, document)
    }
}
