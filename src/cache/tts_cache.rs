// ------------------------------------------------------------------
//  TTS Artifact Cache (C2)
// ------------------------------------------------------------------
//
// Grounded in the reference TTSCache (tts_cache.py), with the one
// anti-pattern called out by the spec's design notes removed: the
// reference re-parses its formatted key string (splitting on `_`) to
// recover the on-disk path. Here the key's structural fields travel
// alongside the opaque string at all times, so nothing is ever re-parsed.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{PipelineError, Result};

/// Structural cache key: `(text, language_code, voice_name, rate)`. Also
/// used for BatchCloud documents, where `content_hash` holds the batch
/// fingerprint instead of a per-text hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TtsCacheKey {
  pub language_code: String,
  pub voice_name: String,
  pub rate_percent: String,
  pub content_hash: String,
}

impl TtsCacheKey {
  pub fn for_text(text: &str, language_code: &str, voice_name: &str, rate_percent: &str) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(language_code.as_bytes());
    hasher.update(voice_name.as_bytes());
    hasher.update(rate_percent.as_bytes());
    let hash = hex::encode(hasher.finalize());
    TtsCacheKey {
      language_code: language_code.to_string(),
      voice_name: voice_name.to_string(),
      rate_percent: rate_percent.to_string(),
      content_hash: hash,
    }
  }

  pub fn for_batch_fingerprint(fingerprint: &str, language_code: &str, voice_name: &str, rate_percent: &str) -> Self {
    TtsCacheKey {
      language_code: language_code.to_string(),
      voice_name: voice_name.to_string(),
      rate_percent: rate_percent.to_string(),
      content_hash: fingerprint.to_string(),
    }
  }

  fn rate_tag(&self) -> String {
    self.rate_percent.replace('%', "pct")
  }

  /// Opaque string form used as the artifact-table key. Never re-parsed
  /// to recover the path; `path_for` uses the structural fields directly.
  pub fn as_opaque_string(&self) -> String {
    format!("{}_{}_{}_{}", self.language_code, self.voice_name, self.rate_percent, self.content_hash)
  }
}

pub struct TtsCache {
  root: PathBuf,
}

impl TtsCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    TtsCache { root: root.into() }
  }

  pub fn path_for(&self, key: &TtsCacheKey) -> PathBuf {
    self
      .root
      .join(&key.language_code)
      .join(&key.voice_name)
      .join(key.rate_tag())
      .join(format!("{}.wav", key.content_hash))
  }

  pub fn lookup(&self, key: &TtsCacheKey) -> Option<PathBuf> {
    let path = self.path_for(key);
    if path.is_file() { Some(path) } else { None }
  }

  /// Copies `source_path` into the cache at `key`'s location, replacing
  /// atomically via rename-into-place so concurrent writers of the same
  /// key always resolve to one final file.
  pub fn store(&self, key: &TtsCacheKey, source_path: &Path) -> Result<PathBuf> {
    let dest = self.path_for(key);
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).map_err(PipelineError::Io)?;
    }
    let tmp = dest.with_extension("wav.tmp");
    fs::copy(source_path, &tmp).map_err(PipelineError::Io)?;
    fs::rename(&tmp, &dest).map_err(PipelineError::Io)?;
    Ok(dest)
  }
}
