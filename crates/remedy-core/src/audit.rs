//! Persistent, digest-verified run records.
//!
//! Layout: `<dir>/<run_id>/run.json` and `<dir>/<run_id>/run.digest`.
//! Each file is replaced atomically and the digest is written last, so an
//! interrupted write leaves a record without a digest rather than a torn one.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::domain::{ContentDigest, RemedyError, Result};
use crate::run::PipelineRun;

const RECORD_FILE: &str = "run.json";
const DIGEST_FILE: &str = "run.digest";

/// Persist `run` to `<dir>/<run_id>/run.json` with a sha256 sidecar.
pub fn write_run_record(run: &PipelineRun, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(&run.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let record_path = run_dir.join(RECORD_FILE);
    let json = serde_json::to_vec_pretty(run)?;
    let digest = ContentDigest::from_bytes(&json);

    let digest_path = run_dir.join(DIGEST_FILE);
    match std::fs::remove_file(&digest_path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => return Err(err.into()),
        _ => {}
    }
    replace_file(&run_dir, &record_path, &json)?;
    replace_file(&run_dir, &digest_path, digest.as_str().as_bytes())?;

    Ok(record_path)
}

fn replace_file(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read and verify `<dir>/<run_id>/run.json`.
pub fn read_run_record(run_id: &str, dir: &Path) -> Result<PipelineRun> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join(RECORD_FILE))?;
    let expected = std::fs::read_to_string(run_dir.join(DIGEST_FILE))?;
    let actual = ContentDigest::from_bytes(&json);
    if expected.trim() != actual.as_str() {
        return Err(RemedyError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual: actual.to_string(),
        });
    }

    Ok(serde_json::from_slice(&json)?)
}
