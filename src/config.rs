// ------------------------------------------------------------------
//  Configuration (C9)
// ------------------------------------------------------------------

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;

use crate::error::{PipelineError, Result};
use crate::model::{Language, SynthStrategy};

/// Top-level CLI surface. Grouped via `#[command(flatten)]` rather than
/// one flat struct, because the pipeline's configuration surface is
/// considerably wider than a single-purpose flag set.
#[derive(Parser, Debug, Clone)]
#[command(
  author = env!("CARGO_PKG_AUTHORS"),
  version,
  long_about = concat!(
    "\n\n",
    env!("CARGO_PKG_DESCRIPTION"),
    "\n\nHomepage: ",
    env!("CARGO_PKG_HOMEPAGE")
  )
)]
pub struct Cli {
  /// Path to the phrase script (parsed by an external collaborator, not
  /// by this crate).
  pub input_script: PathBuf,

  /// Base name for the emitted `.wav`/`.srt` files.
  pub output_prefix: String,

  /// Increase log verbosity; repeat for more detail (-v, -vv, -vvv).
  #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
  pub verbose: u8,

  #[command(flatten)]
  pub paths: PathsArgs,

  #[command(flatten)]
  pub timing: TimingArgs,

  #[command(flatten)]
  pub synth: SynthArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct PathsArgs {
  /// Directory the final WAV/SRT are written into.
  #[arg(long, env = "LANGCAST_OUTPUT_DIR", default_value = "out")]
  pub output_dir: PathBuf,

  /// Scratch directory for the phase-1 raw PCM stream.
  #[arg(long, env = "LANGCAST_TEMP_DIR", default_value = "temp")]
  pub temp_dir: PathBuf,

  /// Content-addressed TTS artifact cache root.
  #[arg(long, env = "LANGCAST_TTS_CACHE_DIR", default_value = "tts_cache")]
  pub tts_cache_dir: PathBuf,

  /// Content-addressed silence-map cache root.
  #[arg(long, env = "LANGCAST_SILENCE_CACHE_DIR", default_value = "silence_cache")]
  pub silence_cache_dir: PathBuf,

  /// Directory holding source recordings referenced by FileCut segments.
  #[arg(long, env = "LANGCAST_FILE_SEGMENT_DIR", default_value = "recordings")]
  pub file_segment_dir: PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct TimingArgs {
  /// How many times each non-description card is repeated.
  #[arg(long, default_value_t = 3)]
  pub repeat_count: u32,

  /// Extra seconds added to every dynamic inter-subgroup pause.
  #[arg(long, default_value_t = 0.5)]
  pub extra_delay_sec: f64,

  /// Dynamic-pause multiplier applied to FileCut-dominated subgroups.
  #[arg(long, default_value_t = 1.0)]
  pub file_segment_delay_multiplier: f64,

  /// Clip the Original subgroup's dynamic pause to `original_pause_cap_sec`.
  #[arg(long, action = clap::ArgAction::SetTrue)]
  pub cap_original_pause: bool,

  #[arg(long, default_value_t = 3.0)]
  pub original_pause_cap_sec: f64,

  /// Fixed delay emitted when a pair phrase has a Description subgroup.
  #[arg(long, default_value_t = 0.0)]
  pub description_delay_sec: f64,

  /// Fixed delay emitted when translation is unavailable for a phrase.
  #[arg(long, default_value_t = 1.0)]
  pub translation_delay_sec: f64,

  /// Seconds of silence inserted between segments in a BatchCloud SSML
  /// document (the `<break time="Ns"/>` duration).
  #[arg(long, default_value_t = 2)]
  pub batch_break_sec: u32,

  /// Inset applied to both ends of a pause-midpoint window.
  #[arg(long, default_value_t = 0.7)]
  pub edge_step_sec: f64,

  /// Trailing silence appended after the last card.
  #[arg(long, default_value_t = 5.0)]
  pub end_silence_sec: f64,

  /// Maximum characters per BatchCloud SSML document before it is split.
  #[arg(long, default_value_t = 4800)]
  pub max_ssml_length: usize,

  /// Absolute PCM amplitude threshold passed to the silence detector.
  #[arg(long, default_value_t = 70)]
  pub voice_amplitude_threshold: u32,

  /// Minimum silence duration (seconds) the detector must find to count
  /// as a pause.
  #[arg(long, default_value_t = 1.8)]
  pub silence_min_duration_sec: f64,

  /// Whether a translation subgroup is generated at all.
  #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
  pub allow_translation: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct SynthArgs {
  /// Per-request timeout for the injected synthesizer, in milliseconds.
  #[arg(long, default_value_t = 20_000)]
  pub synth_timeout_ms: u64,

  /// Base URL of the HTTP synthesis endpoint.
  #[arg(long, env = "LANGCAST_SYNTH_URL", default_value = "http://localhost:5600/synthesize")]
  pub synth_url: String,

  /// Repeatable `lang=rate%` pairs, e.g. `--tts-rate de=90%`.
  #[arg(long = "tts-rate", value_parser = parse_rate_pair)]
  pub tts_rate: Vec<(String, String)>,

  /// Repeatable `lang:strategy=voice` triples, e.g.
  /// `--voice de:BatchCloud=de-DE-Standard-A`.
  #[arg(long = "voice", value_parser = parse_voice_triple)]
  pub voice: Vec<(String, String, String)>,
}

fn parse_rate_pair(s: &str) -> std::result::Result<(String, String), String> {
  let (lang, rate) = s.split_once('=').ok_or_else(|| format!("expected lang=rate%, got {s:?}"))?;
  Ok((lang.to_string(), rate.to_string()))
}

fn parse_voice_triple(s: &str) -> std::result::Result<(String, String, String), String> {
  let (lhs, voice) = s.split_once('=').ok_or_else(|| format!("expected lang:strategy=voice, got {s:?}"))?;
  let (lang, strategy) = lhs.split_once(':').ok_or_else(|| format!("expected lang:strategy=voice, got {s:?}"))?;
  Ok((lang.to_string(), strategy.to_string(), voice.to_string()))
}

fn parse_language(tag: &str) -> Option<Language> {
  match tag {
    "de" => Some(Language::De),
    "ru" => Some(Language::Ru),
    "en" => Some(Language::En),
    _ => None,
  }
}

fn parse_strategy(tag: &str) -> Option<SynthStrategy> {
  match tag {
    "FileCut" => Some(SynthStrategy::FileCut),
    "SingleCloud" => Some(SynthStrategy::SingleCloud),
    "BatchCloud" => Some(SynthStrategy::BatchCloud),
    _ => None,
  }
}

/// Validated, job-ready configuration. Unknown options are rejected here
/// (at construction time), not silently absorbed, per the spec's design
/// notes.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub repeat_count: u32,
  pub extra_delay_sec: f64,
  pub file_segment_delay_multiplier: f64,
  pub cap_original_pause: bool,
  pub original_pause_cap_sec: f64,
  pub description_delay_sec: f64,
  pub translation_delay_sec: f64,
  pub batch_break_sec: u32,
  pub edge_step_sec: f64,
  pub end_silence_sec: f64,
  pub max_ssml_length: usize,
  pub voice_amplitude_threshold: u32,
  pub silence_min_duration_sec: f64,
  pub allow_translation: bool,
  pub synth_timeout_ms: u64,
  pub synth_url: String,
  pub tts_rate_per_language: HashMap<Language, String>,
  pub voice_policy: HashMap<(Language, SynthStrategy), String>,
  pub paths: ResolvedPaths,
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
  pub output_dir: PathBuf,
  pub temp_dir: PathBuf,
  pub tts_cache_dir: PathBuf,
  pub silence_cache_dir: PathBuf,
  pub file_segment_dir: PathBuf,
}

impl PipelineConfig {
  pub fn from_cli(cli: &Cli) -> Result<Self> {
    if cli.timing.batch_break_sec == 0 {
      return Err(PipelineError::Config { message: "batch_break_sec must be > 0".to_string() });
    }
    if cli.timing.max_ssml_length == 0 {
      return Err(PipelineError::Config { message: "max_ssml_length must be > 0".to_string() });
    }

    let mut tts_rate_per_language = HashMap::new();
    for (lang_tag, rate) in &cli.synth.tts_rate {
      let lang = parse_language(lang_tag)
        .ok_or_else(|| PipelineError::Config { message: format!("unknown language tag in --tts-rate: {lang_tag:?}") })?;
      if !rate.ends_with('%') {
        return Err(PipelineError::Config { message: format!("rate must end in '%': {rate:?}") });
      }
      tts_rate_per_language.insert(lang, rate.clone());
    }

    let mut voice_policy = HashMap::new();
    for (lang_tag, strategy_tag, voice) in &cli.synth.voice {
      let lang = parse_language(lang_tag)
        .ok_or_else(|| PipelineError::Config { message: format!("unknown language tag in --voice: {lang_tag:?}") })?;
      let strategy = parse_strategy(strategy_tag)
        .ok_or_else(|| PipelineError::Config { message: format!("unknown strategy in --voice: {strategy_tag:?}") })?;
      voice_policy.insert((lang, strategy), voice.clone());
    }

    for dir in [
      &cli.paths.output_dir,
      &cli.paths.temp_dir,
      &cli.paths.tts_cache_dir,
      &cli.paths.silence_cache_dir,
    ] {
      std::fs::create_dir_all(dir)
        .map_err(|e| PipelineError::Config { message: format!("cannot create/write {}: {e}", dir.display()) })?;
    }

    Ok(PipelineConfig {
      repeat_count: cli.timing.repeat_count,
      extra_delay_sec: cli.timing.extra_delay_sec,
      file_segment_delay_multiplier: cli.timing.file_segment_delay_multiplier,
      cap_original_pause: cli.timing.cap_original_pause,
      original_pause_cap_sec: cli.timing.original_pause_cap_sec,
      description_delay_sec: cli.timing.description_delay_sec,
      translation_delay_sec: cli.timing.translation_delay_sec,
      batch_break_sec: cli.timing.batch_break_sec,
      edge_step_sec: cli.timing.edge_step_sec,
      end_silence_sec: cli.timing.end_silence_sec,
      max_ssml_length: cli.timing.max_ssml_length,
      voice_amplitude_threshold: cli.timing.voice_amplitude_threshold,
      silence_min_duration_sec: cli.timing.silence_min_duration_sec,
      allow_translation: cli.timing.allow_translation,
      synth_timeout_ms: cli.synth.synth_timeout_ms,
      synth_url: cli.synth.synth_url.clone(),
      tts_rate_per_language,
      voice_policy,
      paths: ResolvedPaths {
        output_dir: cli.paths.output_dir.clone(),
        temp_dir: cli.paths.temp_dir.clone(),
        tts_cache_dir: cli.paths.tts_cache_dir.clone(),
        silence_cache_dir: cli.paths.silence_cache_dir.clone(),
        file_segment_dir: cli.paths.file_segment_dir.clone(),
      },
    })
  }

  pub fn tts_rate_for(&self, language: Language) -> String {
    self.tts_rate_per_language.get(&language).cloned().unwrap_or_else(|| "100%".to_string())
  }

  pub fn voice_for(&self, language: Language, strategy: SynthStrategy) -> String {
    self
      .voice_policy
      .get(&(language, strategy))
      .cloned()
      .unwrap_or_else(|| default_voice(language))
  }

  #[cfg(test)]
  pub fn for_tests() -> Self {
    PipelineConfig {
      repeat_count: 3,
      extra_delay_sec: 0.5,
      file_segment_delay_multiplier: 1.0,
      cap_original_pause: false,
      original_pause_cap_sec: 3.0,
      description_delay_sec: 0.0,
      translation_delay_sec: 1.0,
      batch_break_sec: 2,
      edge_step_sec: 0.7,
      end_silence_sec: 5.0,
      max_ssml_length: 4800,
      voice_amplitude_threshold: 70,
      silence_min_duration_sec: 1.8,
      allow_translation: true,
      synth_timeout_ms: 20_000,
      synth_url: "http://localhost:5600/synthesize".to_string(),
      tts_rate_per_language: HashMap::new(),
      voice_policy: HashMap::new(),
      paths: ResolvedPaths {
        output_dir: PathBuf::from("out"),
        temp_dir: PathBuf::from("temp"),
        tts_cache_dir: PathBuf::from("tts_cache"),
        silence_cache_dir: PathBuf::from("silence_cache"),
        file_segment_dir: PathBuf::from("recordings"),
      },
    }
  }
}

fn default_voice(language: Language) -> String {
  match language {
    Language::De => "de-DE-Standard-A".to_string(),
    Language::Ru => "ru-RU-Standard-A".to_string(),
    Language::En => "en-US-Standard-B".to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_zero_batch_break_sec() {
    let mut cli = Cli::parse_from(["langcast", "script.txt", "out"]);
    cli.timing.batch_break_sec = 0;
    let err = PipelineConfig::from_cli(&cli).unwrap_err();
    assert_eq!(err.kind_name(), "ConfigError");
  }

  #[test]
  fn rejects_unknown_language_in_tts_rate() {
    let mut cli = Cli::parse_from(["langcast", "script.txt", "out"]);
    cli.synth.tts_rate.push(("xx".to_string(), "90%".to_string()));
    let err = PipelineConfig::from_cli(&cli).unwrap_err();
    assert_eq!(err.kind_name(), "ConfigError");
  }

  #[test]
  fn tts_rate_defaults_to_100_percent() {
    let config = PipelineConfig::for_tests();
    assert_eq!(config.tts_rate_for(Language::De), "100%");
  }
}
