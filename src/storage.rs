use crate::config::DataPaths;
use crate::constants::{
    AGGREGATE_FILE_PREFIX, NARRATIVE_FILE_PREFIX, NARRATIVE_TEXT_PREFIX, NORMALIZED_FILE_PREFIX,
    RAW_FILE_PREFIX,
};
use crate::error::{PipelineError, Result};
use crate::types::{ArtifactRef, DateKey, Tier};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Date-partitioned artifact storage.
///
/// Every file location is a pure function of (tier, date); there is no index.
/// Writes replace the previous artifact for the same key wholesale.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    paths: DataPaths,
}

impl ArtifactStore {
    pub fn new(paths: DataPaths) -> Self {
        Self { paths }
    }

    pub fn tier_dir(&self, tier: Tier) -> &Path {
        match tier {
            Tier::Raw => &self.paths.bronze,
            Tier::Normalized => &self.paths.silver,
            Tier::Aggregate => &self.paths.gold,
            Tier::Narrative => &self.paths.reports,
        }
    }

    pub fn file_name(tier: Tier, date: DateKey) -> String {
        match tier {
            Tier::Raw => format!("{RAW_FILE_PREFIX}{date}.json"),
            Tier::Normalized => format!("{NORMALIZED_FILE_PREFIX}{date}.ndjson"),
            Tier::Aggregate => format!("{AGGREGATE_FILE_PREFIX}{date}.ndjson"),
            Tier::Narrative => format!("{NARRATIVE_FILE_PREFIX}{date}.json"),
        }
    }

    pub fn artifact_ref(&self, tier: Tier, date: DateKey) -> ArtifactRef {
        ArtifactRef {
            tier,
            date,
            path: self.tier_dir(tier).join(Self::file_name(tier, date)),
        }
    }

    /// Human-readable companion of the narrative artifact
    pub fn narrative_text_path(&self, date: DateKey) -> PathBuf {
        self.tier_dir(Tier::Narrative)
            .join(format!("{NARRATIVE_TEXT_PREFIX}{date}.txt"))
    }

    pub fn exists(&self, tier: Tier, date: DateKey) -> bool {
        self.artifact_ref(tier, date).path.is_file()
    }

    pub fn write_json<T: Serialize>(&self, tier: Tier, date: DateKey, value: &T) -> Result<ArtifactRef> {
        let artifact = self.artifact_ref(tier, date);
        let mut body = serde_json::to_vec_pretty(value)
            .map_err(|e| PipelineError::persistence(&artifact.path, e))?;
        body.push(b'\n');
        write_replacing(&artifact.path, &body)?;
        debug!(tier = %tier, path = %artifact.path.display(), bytes = body.len(), "artifact written");
        Ok(artifact)
    }

    /// One JSON document per line; an empty slice produces an empty file.
    pub fn write_ndjson<T: Serialize>(&self, tier: Tier, date: DateKey, rows: &[T]) -> Result<ArtifactRef> {
        let artifact = self.artifact_ref(tier, date);
        let mut body = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut body, row)
                .map_err(|e| PipelineError::persistence(&artifact.path, e))?;
            body.push(b'\n');
        }
        write_replacing(&artifact.path, &body)?;
        debug!(tier = %tier, path = %artifact.path.display(), rows = rows.len(), "artifact written");
        Ok(artifact)
    }

    pub fn write_text(&self, path: &Path, text: &str) -> Result<()> {
        write_replacing(path, text.as_bytes())
    }

    pub fn read_json<T: DeserializeOwned>(&self, artifact: &ArtifactRef) -> Result<T> {
        let bytes = fs::read(&artifact.path).map_err(|e| PipelineError::persistence(&artifact.path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::Validation(format!(
                "unreadable {} artifact {}: {}",
                artifact.tier,
                artifact.path.display(),
                e
            ))
        })
    }

    pub fn read_ndjson<T: DeserializeOwned>(&self, artifact: &ArtifactRef) -> Result<Vec<T>> {
        let file = fs::File::open(&artifact.path).map_err(|e| PipelineError::persistence(&artifact.path, e))?;
        let mut rows = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| PipelineError::persistence(&artifact.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let row = serde_json::from_str(&line).map_err(|e| {
                PipelineError::Validation(format!(
                    "unreadable {} artifact {} line {}: {}",
                    artifact.tier,
                    artifact.path.display(),
                    line_no + 1,
                    e
                ))
            })?;
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Writes to a temporary sibling and renames it over `path`, so readers never
/// observe a half-written artifact and a failed write leaves the old one intact.
fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(|e| PipelineError::persistence(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{file_name}.tmp"));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(PipelineError::persistence(path, e));
    }
    Ok(())
}
