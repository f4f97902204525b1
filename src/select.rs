//! Next-frame selection over the corpus.
//!
//! Selection is a pure function of the corpus listing, the traversal mode, an
//! optional cursor and the caller's random generator. Sequential traversal at
//! the end of a video falls back exactly once to the first frame of a randomly
//! chosen video; there is no further retry.

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::corpus::{is_reserved, CorpusLayout, CorpusLister, FsLister};
use crate::error::LabelError;
use crate::{FrameRef, VideoId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraversalMode {
    Random,
    Sequential,
}

/// The frame an annotator was last shown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cursor {
    pub video_id: VideoId,
    pub frame_index: u64,
}

pub struct FrameSelector<L = FsLister> {
    layout: CorpusLayout,
    lister: L,
}

impl FrameSelector<FsLister> {
    pub fn new(layout: CorpusLayout) -> Self {
        Self::with_lister(layout, FsLister)
    }
}

impl<L: CorpusLister> FrameSelector<L> {
    pub fn with_lister(layout: CorpusLayout, lister: L) -> Self {
        Self { layout, lister }
    }

    pub fn pick_next<R: Rng + ?Sized>(
        &self,
        mode: TraversalMode,
        cursor: Option<&Cursor>,
        rng: &mut R,
    ) -> Result<FrameRef> {
        match (mode, cursor) {
            (TraversalMode::Random, _) => {
                let video_id = self.choose_video(None, rng)?;
                let frames = self.frame_indices(&video_id)?;
                let frame_index = *frames.choose(rng).ok_or_else(|| no_frames(&video_id))?;
                Ok(self.frame_ref(video_id, frame_index))
            }
            (TraversalMode::Sequential, None) => {
                let video_id = self.choose_video(None, rng)?;
                self.first_frame(video_id)
            }
            (TraversalMode::Sequential, Some(cursor)) => {
                if let Some(next) = cursor.frame_index.checked_add(1) {
                    if self.frame_indices(&cursor.video_id)?.contains(&next) {
                        return Ok(self.frame_ref(cursor.video_id.clone(), next));
                    }
                }
                log::debug!(
                    "video {} exhausted after frame {}; moving to a new video",
                    cursor.video_id,
                    cursor.frame_index
                );
                let video_id = self.choose_video(Some(&cursor.video_id), rng)?;
                self.first_frame(video_id)
            }
        }
    }

    /// Non-reserved videos under the corpus root, sorted by id.
    pub fn videos(&self) -> Result<Vec<VideoId>> {
        let mut videos: Vec<VideoId> = self
            .lister
            .list_entries(self.layout.root())?
            .into_iter()
            .filter(|name| !is_reserved(name))
            .filter_map(|name| VideoId::parse(&name).ok())
            .collect();
        videos.sort();
        Ok(videos)
    }

    /// Frame indices present for `video_id`, ascending. Only canonical decimal
    /// directory names count as frames.
    pub fn frame_indices(&self, video_id: &VideoId) -> Result<Vec<u64>> {
        let mut frames: Vec<u64> = self
            .lister
            .list_entries(&self.layout.video_dir(video_id))?
            .into_iter()
            .filter(|name| !is_reserved(name))
            .filter_map(|name| {
                name.parse::<u64>()
                    .ok()
                    .filter(|index| index.to_string() == name)
            })
            .collect();
        frames.sort_unstable();
        Ok(frames)
    }

    /// Uniform choice among eligible videos, avoiding `exclude` unless it is
    /// the only one.
    fn choose_video<R: Rng + ?Sized>(
        &self,
        exclude: Option<&VideoId>,
        rng: &mut R,
    ) -> Result<VideoId> {
        let videos = self.videos()?;
        let others: Vec<&VideoId> = videos
            .iter()
            .filter(|video| Some(*video) != exclude)
            .collect();
        let chosen = if others.is_empty() {
            videos.choose(rng)
        } else {
            others.choose(rng).copied()
        };
        chosen.cloned().ok_or_else(|| {
            LabelError::NoData(format!(
                "no eligible videos under {}",
                self.layout.root().display()
            ))
            .into()
        })
    }

    fn first_frame(&self, video_id: VideoId) -> Result<FrameRef> {
        let first = self
            .frame_indices(&video_id)?
            .first()
            .copied()
            .ok_or_else(|| no_frames(&video_id))?;
        Ok(self.frame_ref(video_id, first))
    }

    fn frame_ref(&self, video_id: VideoId, frame_index: u64) -> FrameRef {
        let image_path = self.layout.frame_image(&video_id, frame_index);
        FrameRef {
            video_id,
            frame_index,
            image_path,
        }
    }
}

fn no_frames(video_id: &VideoId) -> anyhow::Error {
    LabelError::NoData(format!("video {} has no frames", video_id)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    /// Synthetic corpus that counts directory listings.
    #[derive(Default)]
    struct MemoryCorpus {
        dirs: HashMap<PathBuf, Vec<String>>,
        calls: Cell<usize>,
    }

    impl MemoryCorpus {
        fn with_video(mut self, id: &str, frames: &[&str]) -> Self {
            self.dirs
                .entry(PathBuf::from("corpus"))
                .or_default()
                .push(id.to_string());
            let mut entries: Vec<String> = frames.iter().map(|f| f.to_string()).collect();
            entries.push("metadata.json".to_string());
            self.dirs.insert(Path::new("corpus").join(id), entries);
            self
        }

        fn with_root_entry(mut self, name: &str) -> Self {
            self.dirs
                .entry(PathBuf::from("corpus"))
                .or_default()
                .push(name.to_string());
            self
        }

        fn calls(&self) -> usize {
            self.calls.get()
        }
    }

    impl CorpusLister for MemoryCorpus {
        fn list_entries(&self, dir: &Path) -> Result<Vec<String>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.dirs.get(dir).cloned().unwrap_or_default())
        }
    }

    fn selector(corpus: &MemoryCorpus) -> FrameSelector<&MemoryCorpus> {
        FrameSelector::with_lister(CorpusLayout::new("corpus"), corpus)
    }

    fn cursor(video: &str, frame_index: u64) -> Cursor {
        Cursor {
            video_id: VideoId::parse(video).expect("video id"),
            frame_index,
        }
    }

    fn is_no_data(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<LabelError>(), Some(LabelError::NoData(_)))
    }

    #[test]
    fn random_mode_picks_existing_frames_of_eligible_videos() -> Result<()> {
        let corpus = MemoryCorpus::default()
            .with_video("aaa", &["0", "1", "2"])
            .with_video("bbb", &["0", "1"])
            .with_root_entry(".staging-ccc");
        let selector = selector(&corpus);

        let mut seen_videos = std::collections::BTreeSet::new();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let frame = selector.pick_next(TraversalMode::Random, None, &mut rng)?;
            let max = if frame.video_id.as_str() == "aaa" { 2 } else { 1 };
            assert!(frame.frame_index <= max);
            assert_eq!(
                frame.image_path,
                Path::new("corpus")
                    .join(frame.video_id.as_str())
                    .join(frame.frame_index.to_string())
                    .join("frame.jpg")
            );
            seen_videos.insert(frame.video_id.as_str().to_string());
        }
        assert_eq!(
            seen_videos.into_iter().collect::<Vec<_>>(),
            vec!["aaa".to_string(), "bbb".to_string()]
        );
        Ok(())
    }

    #[test]
    fn same_seed_same_choice() -> Result<()> {
        let corpus = MemoryCorpus::default()
            .with_video("aaa", &["0", "1", "2", "3"])
            .with_video("bbb", &["0", "1", "2"])
            .with_video("ccc", &["0"]);
        let selector = selector(&corpus);
        let first = selector.pick_next(TraversalMode::Random, None, &mut StdRng::seed_from_u64(42))?;
        let second = selector.pick_next(TraversalMode::Random, None, &mut StdRng::seed_from_u64(42))?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn sequential_without_cursor_starts_at_first_frame() -> Result<()> {
        let corpus = MemoryCorpus::default().with_video("aaa", &["10", "2", "1", "0"]);
        let selector = selector(&corpus);
        let frame = selector.pick_next(TraversalMode::Sequential, None, &mut StdRng::seed_from_u64(1))?;
        assert_eq!(frame.video_id.as_str(), "aaa");
        assert_eq!(frame.frame_index, 0);
        assert_eq!(corpus.calls(), 2);
        Ok(())
    }

    #[test]
    fn sequential_advances_within_video() -> Result<()> {
        let corpus = MemoryCorpus::default()
            .with_video("aaa", &["0", "1", "2"])
            .with_video("bbb", &["0"]);
        let selector = selector(&corpus);
        let frame = selector.pick_next(
            TraversalMode::Sequential,
            Some(&cursor("aaa", 1)),
            &mut StdRng::seed_from_u64(1),
        )?;
        assert_eq!(frame.video_id.as_str(), "aaa");
        assert_eq!(frame.frame_index, 2);
        assert_eq!(corpus.calls(), 1);
        Ok(())
    }

    #[test]
    fn sequential_at_last_frame_falls_back_once() -> Result<()> {
        let corpus = MemoryCorpus::default()
            .with_video("aaa", &["0", "1", "2"])
            .with_video("bbb", &["0", "1"]);
        let selector = selector(&corpus);
        let frame = selector.pick_next(
            TraversalMode::Sequential,
            Some(&cursor("aaa", 2)),
            &mut StdRng::seed_from_u64(9),
        )?;
        assert_eq!(frame.video_id.as_str(), "bbb");
        assert_eq!(frame.frame_index, 0);
        // cursor video, corpus root, new video: one bounded fallback step.
        assert_eq!(corpus.calls(), 3);
        Ok(())
    }

    #[test]
    fn single_video_wraps_to_its_first_frame() -> Result<()> {
        let corpus = MemoryCorpus::default().with_video("aaa", &["0", "1"]);
        let selector = selector(&corpus);
        let frame = selector.pick_next(
            TraversalMode::Sequential,
            Some(&cursor("aaa", 1)),
            &mut StdRng::seed_from_u64(3),
        )?;
        assert_eq!(frame.video_id.as_str(), "aaa");
        assert_eq!(frame.frame_index, 0);
        Ok(())
    }

    #[test]
    fn vanished_cursor_video_falls_back() -> Result<()> {
        let corpus = MemoryCorpus::default().with_video("bbb", &["0", "1"]);
        let selector = selector(&corpus);
        let frame = selector.pick_next(
            TraversalMode::Sequential,
            Some(&cursor("gone", 4)),
            &mut StdRng::seed_from_u64(3),
        )?;
        assert_eq!(frame.video_id.as_str(), "bbb");
        assert_eq!(frame.frame_index, 0);
        Ok(())
    }

    #[test]
    fn fallback_to_empty_video_is_not_retried() {
        let corpus = MemoryCorpus::default()
            .with_video("aaa", &["0"])
            .with_video("bbb", &[]);
        let selector = selector(&corpus);
        let err = selector
            .pick_next(
                TraversalMode::Sequential,
                Some(&cursor("aaa", 0)),
                &mut StdRng::seed_from_u64(5),
            )
            .unwrap_err();
        assert!(is_no_data(&err));
        assert_eq!(corpus.calls(), 3);
    }

    #[test]
    fn empty_or_reserved_only_corpus_is_no_data() {
        let empty = MemoryCorpus::default();
        let reserved = MemoryCorpus::default()
            .with_root_entry(".staging-aaa")
            .with_root_entry(".DS_Store");
        for corpus in [&empty, &reserved] {
            for mode in [TraversalMode::Random, TraversalMode::Sequential] {
                let err = selector(corpus)
                    .pick_next(mode, None, &mut StdRng::seed_from_u64(0))
                    .unwrap_err();
                assert!(is_no_data(&err));
            }
        }
    }

    #[test]
    fn frame_indices_ignore_non_frame_entries() -> Result<()> {
        let corpus = MemoryCorpus::default().with_video("aaa", &["1", "0", "007", ".tmp", "x"]);
        let frames = selector(&corpus).frame_indices(&VideoId::parse("aaa")?)?;
        assert_eq!(frames, vec![0, 1]);
        Ok(())
    }
}
