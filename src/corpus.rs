//! On-disk frame corpus layout.
//!
//! ```text
//! <root>/<video_id>/metadata.json
//! <root>/<video_id>/<frame_index>/frame.jpg
//! <root>/<video_id>/<frame_index>/frame.json        (empty annotation template)
//! <root>/<video_id>/<frame_index>/<producer>.json   (one per submission)
//! ```
//!
//! Entries whose name starts with `.` are reserved: staging directories and
//! in-flight temporary files live there and are never served.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::VideoId;

pub const METADATA_FILE: &str = "metadata.json";
pub const FRAME_IMAGE_FILE: &str = "frame.jpg";
pub const TEMPLATE_FILE: &str = "frame.json";
pub const RESERVED_PREFIX: char = '.';

pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// Directory enumeration seam. Selection and annotation loading only see the
/// corpus through this trait, so tests can substitute a synthetic corpus.
pub trait CorpusLister {
    /// Names of the direct children of `dir`. A missing directory lists as empty.
    fn list_entries(&self, dir: &Path) -> Result<Vec<String>>;
}

impl<L: CorpusLister + ?Sized> CorpusLister for &L {
    fn list_entries(&self, dir: &Path) -> Result<Vec<String>> {
        (**self).list_entries(dir)
    }
}

/// Lists the real filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsLister;

impl CorpusLister for FsLister {
    fn list_entries(&self, dir: &Path) -> Result<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("list {}", dir.display()));
            }
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("list {}", dir.display()))?;
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => log::debug!("skipping non-utf8 entry {:?} in {}", raw, dir.display()),
            }
        }
        Ok(names)
    }
}

/// Path arithmetic for one corpus root.
#[derive(Clone, Debug)]
pub struct CorpusLayout {
    root: PathBuf,
}

impl CorpusLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn video_dir(&self, video_id: &VideoId) -> PathBuf {
        self.root.join(video_id.as_str())
    }

    /// Where a video is assembled before it is published under `video_dir`.
    pub fn staging_dir(&self, video_id: &VideoId) -> PathBuf {
        self.root
            .join(format!("{}staging-{}", RESERVED_PREFIX, video_id.as_str()))
    }

    pub fn metadata_path(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join(METADATA_FILE)
    }

    pub fn frame_dir(&self, video_id: &VideoId, frame_index: u64) -> PathBuf {
        self.video_dir(video_id).join(frame_index.to_string())
    }

    pub fn frame_image(&self, video_id: &VideoId, frame_index: u64) -> PathBuf {
        self.frame_dir(video_id, frame_index).join(FRAME_IMAGE_FILE)
    }

    pub fn annotation_path(&self, video_id: &VideoId, frame_index: u64, producer: &str) -> PathBuf {
        self.frame_dir(video_id, frame_index)
            .join(format!("{}.json", producer))
    }
}

/// Writes `data` to a reserved temporary sibling of `path`, syncs it, then
/// renames it over `path`. Readers observe either the old or the new file.
/// Every call gets its own temporary name, so concurrent writers to the same
/// target never share one.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    static NEXT_TMP: AtomicU64 = AtomicU64::new(0);

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid target path {}", path.display()))?;
    let tmp_path = path.with_file_name(format!(
        "{}{}.{}-{}.tmp",
        RESERVED_PREFIX,
        file_name,
        std::process::id(),
        NEXT_TMP.fetch_add(1, Ordering::Relaxed)
    ));
    let written = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)
        .with_context(|| format!("create {}", tmp_path.display()))
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()?;
            Ok(())
        })
        .and_then(|()| {
            fs::rename(&tmp_path, path)
                .with_context(|| format!("rename {} -> {}", tmp_path.display(), path.display()))
        });
    if written.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    written
}
