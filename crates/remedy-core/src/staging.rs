//! Staging gate: the only path by which an artifact leaves the pipeline.
//!
//! Layout: `<root>/<artifact_id>.yml`, written via temp file + rename so a
//! reader never observes a partial document.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;
use uuid::Uuid;

use crate::domain::ContentDigest;
use crate::validator::ValidationResult;

/// Errors from the staging gate.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("refusing to stage an artifact that failed validation: {summary}")]
    NotValidated { summary: String },

    #[error("staging io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StagingResult<T> = std::result::Result<T, StagingError>;

/// A document that was written to the staging area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedArtifact {
    pub artifact_id: Uuid,
    pub path: PathBuf,
    pub digest: ContentDigest,
}

/// Outcome of presenting a validated document to the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Staged(StagedArtifact),
    Rejected(ValidationResult),
}

/// Writes validated documents into the staging directory.
#[derive(Debug, Clone)]
pub struct StagingGate {
    root: PathBuf,
}

impl StagingGate {
    /// Create the gate, creating `root` if needed.
    pub fn new(root: impl AsRef<Path>) -> StagingResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stage `document` if `validation` approved it, otherwise hand the
    /// result back untouched. Nothing is written on rejection.
    pub fn admit(
        &self,
        run_id: &str,
        template_id: &str,
        document: &str,
        validation: &ValidationResult,
    ) -> StagingResult<GateDecision> {
        if !validation.valid {
            return Ok(GateDecision::Rejected(validation.clone()));
        }
        self.stage(run_id, template_id, document, validation)
            .map(GateDecision::Staged)
    }

    /// Write `document` under a comment header. Errors if `validation` is not valid.
    pub fn stage(
        &self,
        run_id: &str,
        template_id: &str,
        document: &str,
        validation: &ValidationResult,
    ) -> StagingResult<StagedArtifact> {
        if !validation.valid {
            return Err(StagingError::NotValidated {
                summary: validation.rejection_summary(),
            });
        }

        let artifact_id = Uuid::new_v4();
        let digest = ContentDigest::from_bytes(document.as_bytes());
        let path = self.root.join(format!("{artifact_id}.yml"));

        let mut tmp = NamedTempFile::new_in(&self.root)?;
        write!(
            tmp,
            "# remedy staged artifact\n\
             # artifact_id: {artifact_id}\n\
             # run_id: {run_id}\n\
             # template_id: {template_id}\n\
             # sha256: {digest}\n"
        )?;
        tmp.write_all(document.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        info!(
            run_id,
            template_id,
            artifact_id = %artifact_id,
            digest = %digest.short(),
            path = %path.display(),
            "artifact staged"
        );

        Ok(StagedArtifact {
            artifact_id,
            path,
            digest,
        })
    }
}

/// Split a staged file into its body, checking the recorded sha256.
pub fn read_staged_body(path: &Path) -> StagingResult<String> {
    let text = std::fs::read_to_string(path)?;
    let mut recorded = None;
    let mut body_start = 0;
    for line in text.split_inclusive('\n') {
        if !line.starts_with('#') {
            break;
        }
        if let Some(hex) = line.trim_end().strip_prefix("# sha256: ") {
            recorded = Some(hex.to_string());
        }
        body_start += line.len();
    }

    let body = &text[body_start..];
    let actual = ContentDigest::from_bytes(body.as_bytes());
    match recorded {
        Some(hex) if hex == actual.as_str() => Ok(body.to_string()),
        Some(hex) => Err(StagingError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("staged body digest mismatch: header {hex}, body {actual}"),
        ))),
        None => Err(StagingError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "staged file has no sha256 header",
        ))),
    }
}
