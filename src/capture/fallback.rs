use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::capture::ViolationRecord;

/// Session-scoped local evidence directory used when remote dispatch fails.
///
/// Layout: `<root>/<session_id>/<unix_millis>_<type>_<frame_seq>.jpg` with a
/// JSON sidecar of the same stem holding the record metadata.
#[derive(Clone, Debug)]
pub struct LocalFallbackStore {
    root: PathBuf,
}

#[derive(Serialize)]
struct Sidecar<'a> {
    timestamp: String,
    violation_type: &'a str,
    session_id: &'a str,
    subject_id: &'a str,
    quiz_id: &'a str,
    frame_sequence: u64,
}

impl LocalFallbackStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(sanitize_component(session_id))
    }

    /// Write `jpeg` and its sidecar. Returns the image path.
    pub fn save(&self, record: &ViolationRecord, frame_sequence: u64, jpeg: &[u8]) -> Result<PathBuf> {
        let dir = self.session_dir(&record.session_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("create fallback dir {}", dir.display()))?;

        let stem = format!(
            "{}_{}_{}",
            record.timestamp.timestamp_millis(),
            record.violation_type.as_str(),
            frame_sequence
        );
        let image_path = dir.join(format!("{stem}.jpg"));
        write_atomic(&image_path, jpeg)?;

        let sidecar = Sidecar {
            timestamp: record.iso_timestamp(),
            violation_type: record.violation_type.as_str(),
            session_id: &record.session_id,
            subject_id: &record.subject_id,
            quiz_id: &record.quiz_id,
            frame_sequence,
        };
        let sidecar_path = dir.join(format!("{stem}.json"));
        write_atomic(&sidecar_path, &serde_json::to_vec_pretty(&sidecar)?)?;

        Ok(image_path)
    }
}

fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        crate::UNKNOWN_IDENTITY.to_string()
    } else {
        cleaned
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create {}", tmp_path.display()))?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}
