//! Frame labeler
//!
//! Turns raw video into a corpus of per-frame images, serves frames to human
//! annotators, and reconciles independent polygon annotations of a frame into
//! consensus shapes.
//!
//! # Architecture
//!
//! - `ingest`: decodes a video, reads its capture metadata and publishes the
//!   frame corpus for it (images, empty annotation templates, metadata).
//! - `select`: picks the next frame to serve, randomly or sequentially.
//! - `annotations`: loads and stores per-producer annotation documents.
//! - `consensus`: clusters and averages competing polygons per label.
//! - `codec`: re-encodes a frame image as base64 JPEG for transport.
//! - `service`: the entry points used by a network layer.
//!
//! All components take their root paths from one `LabelerConfig` built at
//! startup; randomness is always injected by the caller.

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub mod annotations;
pub mod cli;
pub mod codec;
pub mod config;
pub mod consensus;
pub mod corpus;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod select;
pub mod service;

pub use annotations::{Annotation, AnnotationDocument, AnnotationStore, LabeledShape, Shape};
pub use config::LabelerConfig;
pub use consensus::{ConsensusEngine, ConsensusMap, ConsensusShape, Point, Polygon};
pub use corpus::{CorpusLayout, CorpusLister, FsLister};
pub use error::LabelError;
pub use frame::DecodedFrame;
pub use ingest::{metadata::Metadata, IngestOptions, VideoIngestor};
pub use select::{Cursor, FrameSelector, TraversalMode};
pub use service::{Labeler, LabelingPayload, LabelingRequest};

// -------------------- Identifiers --------------------

/// Names one ingested video's directory in the corpus. Generated ids are 128
/// random bits, hex-encoded.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        VideoId(hex::encode(bytes))
    }

    /// Accepts any corpus entry name that can name a video directory.
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = !raw.is_empty()
            && !corpus::is_reserved(raw)
            && !raw.contains(|c| c == '/' || c == '\\')
            && raw != "..";
        if !valid {
            return Err(LabelError::InvalidInput(format!("invalid video id '{}'", raw)).into());
        }
        Ok(VideoId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One frame of one video.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub video_id: VideoId,
    pub frame_index: u64,
}

/// A frame chosen for serving, with the path of its image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRef {
    pub video_id: VideoId,
    pub frame_index: u64,
    pub image_path: PathBuf,
}

impl FrameRef {
    pub fn key(&self) -> FrameKey {
        FrameKey {
            video_id: self.video_id.clone(),
            frame_index: self.frame_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generated_ids_are_128_bit_hex() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = VideoId::generate(&mut rng);
        let b = VideoId::generate(&mut rng);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert!(VideoId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn parse_rejects_unsafe_names() {
        for bad in ["", ".staging-abc", "a/b", "..", "a\\b"] {
            assert!(VideoId::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }
}
