use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;

use crate::collect::batch::BatchDescriptor;

/// File name of the durable progress marker inside an output folder.
pub const CHECKPOINT_FILE: &str = "resume_log.txt";

/// Durable marker of collection progress. Persisted as one comma-separated
/// line: `batch_file,completed_index,serial`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Batch file the run was writing when the checkpoint was taken.
    pub batch_file: String,
    /// Last point index durably completed within that batch.
    pub completed_index: usize,
    /// Counter over successful records; increases across the whole run and
    /// is never reused.
    pub serial: u64,
}

impl Checkpoint {
    fn to_line(&self) -> String {
        format!("{},{},{}", self.batch_file, self.completed_index, self.serial)
    }

    /// Older markers carried only `batch_file,completed_index`; the serial
    /// then defaults to zero.
    fn parse_line(line: &str) -> Option<Checkpoint> {
        let mut parts = line.trim().split(',');
        let batch_file = parts.next()?.trim();
        if batch_file.is_empty() {
            return None;
        }
        let completed_index = parts.next()?.trim().parse().ok()?;
        let serial = match parts.next() {
            Some(raw) => raw.trim().parse().ok()?,
            None => 0,
        };
        Some(Checkpoint {
            batch_file: batch_file.to_string(),
            completed_index,
            serial,
        })
    }

    /// Numeric start index of the checkpointed batch, if the name parses.
    fn start_index(&self) -> Option<usize> {
        BatchDescriptor::parse_file_name(&self.batch_file).map(|batch| batch.start_index)
    }
}

/// Where a batch stands relative to a loaded checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeState {
    /// Completed by an earlier run.
    Skip,
    /// The checkpointed batch itself: append, starting at this index.
    Resume { next_index: usize },
    /// Untouched: write from scratch.
    Fresh,
}

/// The canonical resume rule. Batches starting numerically before the
/// checkpointed batch are complete; the checkpointed batch resumes right
/// after its last completed index; everything later starts fresh.
pub fn resume_state(checkpoint: Option<&Checkpoint>, batch: &BatchDescriptor) -> ResumeState {
    let Some(checkpoint) = checkpoint else {
        return ResumeState::Fresh;
    };
    if checkpoint.batch_file == batch.file_name() {
        return ResumeState::Resume {
            next_index: checkpoint.completed_index + 1,
        };
    }
    match checkpoint.start_index() {
        Some(checkpointed_start) if batch.start_index < checkpointed_start => ResumeState::Skip,
        // A checkpoint whose batch name does not parse cannot order batches;
        // replaying is bounded, skipping could lose points.
        _ => ResumeState::Fresh,
    }
}

/// Durable store for the collection checkpoint. Single source of truth for
/// "where to resume": writes are atomic with respect to process crash, so a
/// reader never observes a partially-written marker.
pub struct CheckpointStore {
    path: PathBuf,
    batch_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(path: P, batch_dir: Q) -> Self {
        CheckpointStore {
            path: path.into(),
            batch_dir: batch_dir.into(),
        }
    }

    /// Store living alongside the batch files it tracks.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        CheckpointStore::new(dir.join(CHECKPOINT_FILE), dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the durable checkpoint. Fails softly: a missing file, a
    /// malformed line, or a marker pointing at a batch file that vanished
    /// all come back as "no checkpoint" - restart cost is bounded by
    /// re-scanning, since record writes are idempotent on panoID at the
    /// aggregation stage.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read checkpoint file: {:?}", self.path))?;
        let line = content.lines().next().unwrap_or("");
        let Some(checkpoint) = Checkpoint::parse_line(line) else {
            warn!(
                "Malformed checkpoint in {:?} ({:?}); starting over",
                self.path, line
            );
            return Ok(None);
        };
        if !self.batch_dir.join(&checkpoint.batch_file).exists() {
            warn!(
                "Checkpoint references missing batch file {:?}; starting over",
                checkpoint.batch_file
            );
            return Ok(None);
        }
        Ok(Some(checkpoint))
    }

    /// Persist a new progress triple. The line is written to a temporary
    /// file in the same directory, flushed, synced, then renamed over the
    /// checkpoint path, so a crash leaves either the old or the new marker.
    pub fn advance(&self, batch_file: &str, completed_index: usize, serial: u64) -> Result<()> {
        let checkpoint = Checkpoint {
            batch_file: batch_file.to_string(),
            completed_index,
            serial,
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create checkpoint temp file in {:?}", dir))?;
        tmp.write_all(checkpoint.to_line().as_bytes())
            .context("Failed to write checkpoint")?;
        tmp.flush().context("Failed to flush checkpoint")?;
        tmp.as_file()
            .sync_all()
            .context("Failed to sync checkpoint")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to persist checkpoint to {:?}", self.path))?;
        Ok(())
    }

    /// Discard the checkpoint (fresh-run support).
    pub fn reset(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove checkpoint file: {:?}", self.path))?;
        }
        Ok(())
    }
}
