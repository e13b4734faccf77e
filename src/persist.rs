//! Session persistence: serializes the session store to a self-describing
//! JSON document on two cadences - periodic autosave to a secondary path,
//! and a final save at shutdown to the primary output path.
//!
//! A failed save is logged and non-fatal; the in-memory session remains the
//! source of truth and a later attempt may succeed. Writes go through a
//! temp file and an atomic rename so a crash mid-write cannot corrupt the
//! previous save.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::settings::Settings;
use crate::stats::Stats;
use crate::Session;

/// Session document metadata block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Number of persisted frames in the document.
    pub total_frames: u64,
    pub total_objects: u64,
    pub export_date: DateTime<Utc>,
    /// Settings in effect when the document was written.
    pub settings: Settings,
}

/// The persisted document: metadata + statistics + frames, with stable
/// field names and insertion-ordered frame/object maps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    pub metadata: DocumentMetadata,
    pub statistics: Stats,
    pub frames: Session,
}

impl SessionDocument {
    pub fn build(session: Session, statistics: Stats, settings: Settings) -> Self {
        let total_objects = session
            .values()
            .map(|frame| frame.objects.len() as u64)
            .sum();
        Self {
            metadata: DocumentMetadata {
                total_frames: session.len() as u64,
                total_objects,
                export_date: Utc::now(),
                settings,
            },
            statistics,
            frames: session,
        }
    }

    /// Parse a previously written document.
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read session document {}", path.display()))?;
        let doc = serde_json::from_str(&raw)
            .with_context(|| format!("invalid session document {}", path.display()))?;
        Ok(doc)
    }
}

/// Writes session snapshots to durable storage.
pub struct PersistenceEngine {
    output_path: PathBuf,
    autosave_path: PathBuf,
}

impl PersistenceEngine {
    pub fn new(output_path: PathBuf, autosave_path: PathBuf) -> Self {
        Self {
            output_path,
            autosave_path,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn autosave_path(&self) -> &Path {
        &self.autosave_path
    }

    /// Serialize a snapshot. Final saves go to the primary output path,
    /// autosaves to the autosave path. Returns the persisted frame count.
    pub fn save_snapshot(
        &self,
        session: Session,
        statistics: Stats,
        settings: Settings,
        final_save: bool,
    ) -> Result<u64> {
        let doc = SessionDocument::build(session, statistics, settings);
        let path = if final_save {
            &self.output_path
        } else {
            &self.autosave_path
        };
        let frame_count = doc.metadata.total_frames;
        write_atomic(path, &doc)?;
        log::info!(
            "{} {} frames to {}",
            if final_save { "saved" } else { "autosaved" },
            frame_count,
            path.display()
        );
        Ok(frame_count)
    }
}

fn write_atomic(path: &Path, doc: &SessionDocument) -> Result<()> {
    let json = serde_json::to_vec_pretty(doc)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move temp file into {}", path.display()))?;
    Ok(())
}
