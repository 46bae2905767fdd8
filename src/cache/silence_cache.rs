// ------------------------------------------------------------------
//  Silence Map Cache (C3)
// ------------------------------------------------------------------

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pause {
  pub start_sec: f64,
  pub end_sec: f64,
}

impl Pause {
  pub fn middle(&self) -> f64 {
    self.start_sec + (self.end_sec - self.start_sec) / 2.0
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct SilenceCacheEntry {
  pauses: Vec<Pause>,
}

pub struct SilenceCache {
  root: PathBuf,
}

/// Batch fingerprint: first 16 hex characters of SHA-256 of the full SSML
/// document.
pub fn batch_fingerprint(ssml_document: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(ssml_document.as_bytes());
  let full = hex::encode(hasher.finalize());
  full[..16].to_string()
}

impl SilenceCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    SilenceCache { root: root.into() }
  }

  fn path_for(&self, fingerprint: &str) -> PathBuf {
    self.root.join(format!("{fingerprint}.json"))
  }

  /// Reads the cached pause list for a fingerprint. A corrupted file is
  /// treated as a miss and is deleted (IntegrityError is recoverable: the
  /// caller proceeds as if nothing was cached).
  pub fn lookup(&self, fingerprint: &str) -> Result<Option<Vec<Pause>>> {
    let path = self.path_for(fingerprint);
    if !path.is_file() {
      return Ok(None);
    }
    let raw = fs::read_to_string(&path).map_err(PipelineError::Io)?;
    match serde_json::from_str::<SilenceCacheEntry>(&raw) {
      Ok(entry) => Ok(Some(entry.pauses)),
      Err(e) => {
        log::warn!("silence-map cache entry {fingerprint} is corrupt ({e}); treating as miss and deleting");
        let _ = fs::remove_file(&path);
        Ok(None)
      }
    }
  }

  pub fn store(&self, fingerprint: &str, pauses: &[Pause]) -> Result<()> {
    fs::create_dir_all(&self.root).map_err(PipelineError::Io)?;
    let entry = SilenceCacheEntry { pauses: pauses.to_vec() };
    let json = serde_json::to_string(&entry).map_err(|e| PipelineError::Integrity {
      fingerprint: fingerprint.to_string(),
      message: e.to_string(),
    })?;
    let path = self.path_for(fingerprint);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(PipelineError::Io)?;
    fs::rename(&tmp, &path).map_err(PipelineError::Io)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn fingerprint_is_first_16_hex_chars_of_sha256() {
    let fp = batch_fingerprint("<speak>hi</speak>");
    assert_eq!(fp.len(), 16);
    assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn round_trips_pause_list() {
    let dir = tempdir().unwrap();
    let cache = SilenceCache::new(dir.path());
    let pauses = vec![Pause { start_sec: 1.0, end_sec: 2.0 }, Pause { start_sec: 3.5, end_sec: 4.25 }];
    cache.store("deadbeefdeadbeef", &pauses).unwrap();
    let loaded = cache.lookup("deadbeefdeadbeef").unwrap().unwrap();
    assert_eq!(loaded, pauses);
  }

  #[test]
  fn corrupt_entry_is_treated_as_miss_and_deleted() {
    let dir = tempdir().unwrap();
    let cache = SilenceCache::new(dir.path());
    let path = dir.path().join("badfingerprint00.json");
    fs::write(&path, "not json").unwrap();
    let result = cache.lookup("badfingerprint00").unwrap();
    assert!(result.is_none());
    assert!(!path.exists());
  }

  #[test]
  fn missing_entry_is_a_plain_miss() {
    let dir = tempdir().unwrap();
    let cache = SilenceCache::new(dir.path());
    assert!(cache.lookup("0000000000000000").unwrap().is_none());
  }
}
