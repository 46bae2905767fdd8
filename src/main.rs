// ------------------------------------------------------------------
//  langcast
// ------------------------------------------------------------------

use std::fs;
use std::process;
use std::time::Duration;

use clap::Parser;

mod cache;
mod codec;
mod concat;
mod config;
mod error;
mod finalize;
mod logging;
mod model;
mod orchestrator;
mod planner;
mod populate;
mod synth;
mod text;

use config::{Cli, PipelineConfig};
use error::PipelineError;
use model::Phrase;
use orchestrator::Orchestrator;
use synth::{AmplitudeSilenceDetector, FfmpegDecoder, HttpSynthesizer};

fn main() {
  let cli = Cli::parse();
  logging::init(cli.verbose);

  match run(&cli) {
    Ok(outcome) => {
      log::info!(
        "wrote {} and {} ({} artifacts, {} captions, scale factor {:.4})",
        outcome.wav_path.display(),
        outcome.srt_path.display(),
        outcome.artifact_count,
        outcome.caption_count,
        outcome.scale_factor
      );
      process::exit(0);
    }
    Err(err) => {
      eprintln!("langcast: {err}");
      process::exit(err.kind_ordinal());
    }
  }
}

fn run(cli: &Cli) -> Result<orchestrator::JobOutcome, PipelineError> {
  let config = PipelineConfig::from_cli(cli)?;
  let phrases = load_phrases(&cli.input_script)?;

  let synthesizer = HttpSynthesizer::new(config.synth_url.clone(), Duration::from_millis(config.synth_timeout_ms))?;
  let decoder = FfmpegDecoder::new("ffmpeg", codec::WavHeader::default());
  let detector = AmplitudeSilenceDetector;

  let job_id = job_id_from_prefix(&cli.output_prefix);
  let orchestrator = Orchestrator::new(job_id, &config, &synthesizer, &decoder, &detector);
  orchestrator.run(&phrases, &cli.output_prefix)
}

/// Reads this job's own JSON boundary format for a phrase list. Turning an
/// author-facing phrase script (markdown, plain text, whatever front-end
/// a caller prefers) into this shape is the out-of-scope parser's job;
/// this crate only consumes the already-structured interface.
fn load_phrases(path: &std::path::Path) -> Result<Vec<Phrase>, PipelineError> {
  let raw = fs::read_to_string(path).map_err(|source| PipelineError::Input { path: path.to_path_buf(), source })?;
  serde_json::from_str(&raw).map_err(|e| PipelineError::Format { context: format!("{}: {e}", path.display()) })
}

fn job_id_from_prefix(prefix: &str) -> String {
  let sanitized: String = prefix.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' }).collect();
  format!("job-{sanitized}")
}
