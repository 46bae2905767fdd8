// ------------------------------------------------------------------
//  Job Orchestrator (C8)
// ------------------------------------------------------------------
//
// Drives a job through Planning -> Populating -> Assembling -> Finalizing
// -> Complete, logging each transition at `info` and a terminal `Failed`
// at `error`, with rollback of partial outputs on failure. Grounded in
// the teacher's top-level `main` state flow (setup -> warm-up -> loop),
// generalized into an explicit state machine since this job runs once
// to completion rather than looping forever.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use crate::cache::{SilenceCache, TtsCache};
use crate::concat;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::finalize;
use crate::model::{ArtifactTable, Card, Phrase, Plan};
use crate::planner;
use crate::populate::{MasterHeader, Populator};
use crate::synth::{Decoder, SilenceDetector, Synthesizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
  Planning,
  Populating,
  Assembling,
  Finalizing,
  Complete,
}

impl JobState {
  fn label(&self) -> &'static str {
    match self {
      JobState::Planning => "Planning",
      JobState::Populating => "Populating",
      JobState::Assembling => "Assembling",
      JobState::Finalizing => "Finalizing",
      JobState::Complete => "Complete",
    }
  }
}

#[derive(Debug)]
pub struct JobOutcome {
  pub wav_path: PathBuf,
  pub srt_path: PathBuf,
  pub artifact_count: usize,
  pub caption_count: usize,
  pub scale_factor: f64,
}

pub struct Orchestrator<'a> {
  pub job_id: String,
  pub config: &'a PipelineConfig,
  pub synthesizer: &'a (dyn Synthesizer + 'a),
  pub decoder: &'a (dyn Decoder + 'a),
  pub detector: &'a (dyn SilenceDetector + 'a),
}

impl<'a> Orchestrator<'a> {
  pub fn new(
    job_id: impl Into<String>,
    config: &'a PipelineConfig,
    synthesizer: &'a (dyn Synthesizer + 'a),
    decoder: &'a (dyn Decoder + 'a),
    detector: &'a (dyn SilenceDetector + 'a),
  ) -> Self {
    Orchestrator { job_id: job_id.into(), config, synthesizer, decoder, detector }
  }

  pub fn run(&self, phrases: &[Phrase], output_prefix: &str) -> Result<JobOutcome> {
    let started = Instant::now();
    let job_temp_dir = self.config.paths.temp_dir.join(&self.job_id);
    fs::create_dir_all(&job_temp_dir).map_err(PipelineError::Io)?;

    let wav_path = self.config.paths.output_dir.join(format!("{output_prefix}.wav"));
    let srt_path = self.config.paths.output_dir.join(format!("{output_prefix}.srt"));

    let result = self.run_inner(phrases, &job_temp_dir, &wav_path, &srt_path, started);

    let _ = fs::remove_dir_all(&job_temp_dir);

    match &result {
      Ok(_) => {
        self.log_transition(JobState::Complete, started);
      }
      Err(e) => {
        log::error!(
          "job {} failed after {:.2}s: kind={} context={}",
          self.job_id,
          started.elapsed().as_secs_f64(),
          e.kind_name(),
          e
        );
        let _ = fs::remove_file(&wav_path);
        let _ = fs::remove_file(&srt_path);
      }
    }

    result
  }

  fn run_inner(
    &self,
    phrases: &[Phrase],
    job_temp_dir: &std::path::Path,
    wav_path: &std::path::Path,
    srt_path: &std::path::Path,
    started: Instant,
  ) -> Result<JobOutcome> {
    self.log_transition(JobState::Planning, started);
    let (mut cards, plan): (Vec<Card>, Plan) = planner::plan_phrases(phrases, self.config);

    self.log_transition(JobState::Populating, started);
    let tts_cache = TtsCache::new(&self.config.paths.tts_cache_dir);
    let silence_cache = SilenceCache::new(&self.config.paths.silence_cache_dir);
    let populator = Populator {
      config: self.config,
      tts_cache: &tts_cache,
      silence_cache: &silence_cache,
      synthesizer: self.synthesizer,
      decoder: self.decoder,
      detector: self.detector,
    };
    let master = MasterHeader::new();
    let mut table = ArtifactTable::new();
    populator.populate(&mut cards, &plan, &master, &mut table)?;

    let header = master.get().unwrap_or_default();

    self.log_transition(JobState::Assembling, started);
    let raw_pcm_path = job_temp_dir.join("combined_raw.pcm");
    let concat_result = {
      let file = fs::File::create(&raw_pcm_path).map_err(PipelineError::Io)?;
      let mut writer = std::io::BufWriter::new(file);
      concat::concatenate(&cards, &table, self.config, header, &mut writer)?
    };

    self.log_transition(JobState::Finalizing, started);
    let pcm = fs::read(&raw_pcm_path).map_err(PipelineError::Io)?;
    let report = finalize::finalize(&pcm, &header, concat_result.planned_ms, &concat_result.captions, wav_path, srt_path)?;

    Ok(JobOutcome {
      wav_path: wav_path.to_path_buf(),
      srt_path: srt_path.to_path_buf(),
      artifact_count: table.len(),
      caption_count: concat_result.captions.len(),
      scale_factor: report.scale_factor,
    })
  }

  fn log_transition(&self, state: JobState, started: Instant) {
    log::info!("job {} -> {} ({:.2}s elapsed)", self.job_id, state.label(), started.elapsed().as_secs_f64());
  }
}
