// ------------------------------------------------------------------
//  Error types
// ------------------------------------------------------------------

use std::path::PathBuf;

use thiserror::Error;

/// The exhaustive set of ways a job can fail. Each variant carries enough
/// context to print "kind + context" without the caller needing to chase
/// a nested source error by hand.
#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("input error: source recording unreadable at {path}: {source}")]
  Input {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("format error: {context}")]
  Format { context: String },

  #[error("synthesis error for {context}: {message}")]
  Synth { context: String, message: String },

  #[error("silence detection failed for batch {fingerprint}: {message}")]
  Detect { fingerprint: String, message: String },

  #[error("silence-map cache entry for {fingerprint} is corrupt: {message}")]
  Integrity { fingerprint: String, message: String },

  #[error("configuration error: {message}")]
  Config { message: String },

  #[error("invariant violated: {message}")]
  Invariant { message: String },

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

impl PipelineError {
  /// Stable ordinal used as the process exit code, so scripting callers
  /// can branch on failure kind without parsing stderr.
  pub fn kind_ordinal(&self) -> i32 {
    match self {
      PipelineError::Input { .. } => 1,
      PipelineError::Format { .. } => 2,
      PipelineError::Synth { .. } => 3,
      PipelineError::Detect { .. } => 4,
      PipelineError::Integrity { .. } => 5,
      PipelineError::Config { .. } => 6,
      PipelineError::Invariant { .. } => 7,
      PipelineError::Io(_) => 8,
    }
  }

  pub fn kind_name(&self) -> &'static str {
    match self {
      PipelineError::Input { .. } => "InputError",
      PipelineError::Format { .. } => "FormatError",
      PipelineError::Synth { .. } => "SynthError",
      PipelineError::Detect { .. } => "DetectError",
      PipelineError::Integrity { .. } => "IntegrityError",
      PipelineError::Config { .. } => "ConfigError",
      PipelineError::Invariant { .. } => "InvariantError",
      PipelineError::Io(_) => "IoError",
    }
  }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
