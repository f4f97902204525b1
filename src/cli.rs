//! labeler - command line front end for the frame corpus
//!
//! Every subcommand prints its result as JSON on stdout. Settings come from
//! `LabelerConfig::load` (LABELER_CONFIG file plus LABELER_* overrides).

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::{
    AnnotationDocument, Cursor, IngestOptions, Labeler, LabelerConfig, LabelingRequest,
    TraversalMode, VideoId,
};

#[derive(Parser, Debug)]
#[command(name = "labeler", about = "Video frame corpus and polygon annotation consensus")]
struct Args {
    /// Corpus root (overrides LABELER_CORPUS_ROOT and the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a video into the corpus (prints the new video id)
    Ingest {
        video: String,
        /// Remove the source video once it has been published
        #[arg(long)]
        delete_after: bool,
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Pick the next frame and print its labeling payload
    Next {
        #[arg(long)]
        sequential: bool,
        #[arg(long, requires = "frame")]
        uuid: Option<String>,
        #[arg(long, requires = "uuid")]
        frame: Option<u64>,
        /// Attach consensus shapes for the chosen frame
        #[arg(long)]
        consensus: bool,
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Compute consensus shapes for one frame
    Consensus { uuid: String, frame: u64 },

    /// Store an annotation document for one frame
    Submit {
        uuid: String,
        frame: u64,
        producer: String,
        file: PathBuf,
    },
}

pub fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = LabelerConfig::load()?;
    if let Some(root) = args.root {
        config.corpus_root = root;
        config.validate()?;
    }
    let labeler = Labeler::new(config);

    match args.command {
        Command::Ingest {
            video,
            delete_after,
            seed,
        } => cmd_ingest(&labeler, &video, delete_after, seed),
        Command::Next {
            sequential,
            uuid,
            frame,
            consensus,
            seed,
        } => cmd_next(&labeler, sequential, uuid.as_deref(), frame, consensus, seed),
        Command::Consensus { uuid, frame } => cmd_consensus(&labeler, &uuid, frame),
        Command::Submit {
            uuid,
            frame,
            producer,
            file,
        } => cmd_submit(&labeler, &uuid, frame, &producer, &file),
    }
}

fn cmd_ingest(labeler: &Labeler, video: &str, delete_after: bool, seed: Option<u64>) -> Result<()> {
    let options = IngestOptions {
        delete_source: delete_after,
    };
    let video_id = labeler.ingest(video, options, &mut make_rng(seed))?;
    print_json(&serde_json::json!({ "uuid": video_id }))
}

fn cmd_next(
    labeler: &Labeler,
    sequential: bool,
    uuid: Option<&str>,
    frame: Option<u64>,
    consensus: bool,
    seed: Option<u64>,
) -> Result<()> {
    let cursor = match (uuid, frame) {
        (Some(uuid), Some(frame_index)) => Some(Cursor {
            video_id: VideoId::parse(uuid)?,
            frame_index,
        }),
        (None, None) => None,
        _ => return Err(anyhow!("--uuid and --frame must be given together")),
    };
    let request = LabelingRequest {
        mode: if sequential {
            TraversalMode::Sequential
        } else {
            TraversalMode::Random
        },
        cursor,
        with_consensus: consensus,
    };
    let payload = labeler.next_payload(&request, &mut make_rng(seed))?;
    print_json(&payload)
}

fn cmd_consensus(labeler: &Labeler, uuid: &str, frame: u64) -> Result<()> {
    let video_id = VideoId::parse(uuid)?;
    let shapes = labeler.consensus(&video_id, frame)?;
    print_json(&shapes)
}

fn cmd_submit(labeler: &Labeler, uuid: &str, frame: u64, producer: &str, file: &Path) -> Result<()> {
    let video_id = VideoId::parse(uuid)?;
    let raw = std::fs::read(file).with_context(|| format!("read {}", file.display()))?;
    let document: AnnotationDocument = serde_json::from_slice(&raw)
        .with_context(|| format!("parse annotation document {}", file.display()))?;
    let stored = labeler.submit(&video_id, frame, producer, &document)?;
    print_json(&serde_json::json!({ "stored": stored }))
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
