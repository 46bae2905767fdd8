// ------------------------------------------------------------------
//  Cache Populator (C5)
// ------------------------------------------------------------------
//
// Processes the plan in fixed order per language: FileCut -> SingleCloud
// -> BatchCloud, so FileCut artifacts establish the master header before
// any synthesized artifact is consulted. BatchCloud packs segments into
// SSML documents, synthesizes/caches them as one artifact, then recovers
// per-segment timing from silence detection (grounded in the reference
// MediaCache.populate_cache / _populate_cloud_batch_segments).

use std::path::PathBuf;
use std::sync::Mutex;

use rayon::prelude::*;

use crate::cache::silence_cache::{batch_fingerprint, Pause, SilenceCache};
use crate::cache::tts_cache::{TtsCache, TtsCacheKey};
use crate::codec::{self, WavHeader};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::model::{ArtifactTable, Artifact, Card, Plan, PlanEntry, SynthStrategy};
use crate::synth::{Decoder, SilenceDetector, Synthesizer};
use crate::text;

pub struct Populator<'a> {
  pub config: &'a PipelineConfig,
  pub tts_cache: &'a TtsCache,
  pub silence_cache: &'a SilenceCache,
  pub synthesizer: &'a (dyn Synthesizer + 'a),
  pub decoder: &'a (dyn Decoder + 'a),
  pub detector: &'a (dyn SilenceDetector + 'a),
}

/// The single shared master header for the job, set by the first
/// realized artifact and checked against every subsequent one
/// (invariant I1).
pub struct MasterHeader {
  header: Mutex<Option<WavHeader>>,
}

impl MasterHeader {
  pub fn new() -> Self {
    MasterHeader { header: Mutex::new(None) }
  }

  pub fn check_and_set(&self, candidate: WavHeader, context: &str) -> Result<()> {
    let mut guard = self.header.lock().unwrap();
    match *guard {
      None => {
        *guard = Some(candidate);
        Ok(())
      }
      Some(existing) if existing == candidate => Ok(()),
      Some(existing) => Err(PipelineError::Invariant {
        message: format!("header mismatch at {context}: master={existing:?}, got={candidate:?}"),
      }),
    }
  }

  pub fn get(&self) -> Option<WavHeader> {
    *self.header.lock().unwrap()
  }
}

impl<'a> Populator<'a> {
  pub fn populate(&self, cards: &mut [Card], plan: &Plan, master: &MasterHeader, table: &mut ArtifactTable) -> Result<()> {
    for language in plan.languages() {
      self.realize_file_cut(cards, plan.entries_for(language, SynthStrategy::FileCut), master, table)?;
      self.realize_single_cloud(cards, plan.entries_for(language, SynthStrategy::SingleCloud), master, table)?;
      self.realize_batch_cloud(language, cards, plan.entries_for(language, SynthStrategy::BatchCloud), master, table)?;
    }
    Ok(())
  }

  fn realize_file_cut(&self, cards: &mut [Card], entries: &[PlanEntry], master: &MasterHeader, table: &mut ArtifactTable) -> Result<()> {
    for entry in entries {
      let variant = variant_mut(cards, *entry, SynthStrategy::FileCut);
      let Some(variant) = variant else { continue };
      let file_key = variant.file_key.clone().ok_or_else(|| PipelineError::Invariant {
        message: "FileCut variant missing file_key".to_string(),
      })?;
      let source_path = self.config.paths.file_segment_dir.join(&file_key);
      let (header, pcm) = codec::read_wav(&source_path)?;
      master.check_and_set(header, &format!("FileCut {file_key}"))?;

      if !table.contains(&file_key) {
        table.insert(file_key.clone(), Artifact { header, pcm });
      }
      variant.artifact_key = Some(file_key);
      if let Some(iv) = &variant.interval {
        variant.start_time_sec = iv.start_sec;
        variant.end_time_sec = iv.end_sec;
      }
    }
    Ok(())
  }

  fn realize_single_cloud(&self, cards: &mut [Card], entries: &[PlanEntry], master: &MasterHeader, table: &mut ArtifactTable) -> Result<()> {
    for entry in entries {
      let (text_for_synth, language, rate) = {
        let segment = segment_ref(cards, *entry);
        (segment.text.clone(), segment.language, segment.variants[&SynthStrategy::SingleCloud].rate_percent.clone())
      };
      let voice = self.config.voice_for(language, SynthStrategy::SingleCloud);
      let key = TtsCacheKey::for_text(&text_for_synth, language.tag(), &voice, &rate);

      let pcm_path = match self.tts_cache.lookup(&key) {
        Some(path) => path,
        None => self.synthesize_and_cache(&text_for_synth, language.bcp47(), &voice, &rate, &key)?,
      };

      let (header, pcm) = codec::read_wav(&pcm_path)?;
      master.check_and_set(header, &format!("SingleCloud {}", key.as_opaque_string()))?;
      let artifact_key = key.as_opaque_string();
      if !table.contains(&artifact_key) {
        table.insert(artifact_key.clone(), Artifact { header, pcm });
      }
      let variant = variant_mut(cards, *entry, SynthStrategy::SingleCloud).unwrap();
      variant.artifact_key = Some(artifact_key);
    }
    Ok(())
  }

  fn synthesize_and_cache(&self, text: &str, language_code: &str, voice: &str, rate: &str, key: &TtsCacheKey) -> Result<PathBuf> {
    let escaped = crate::text::escape_for_ssml(text);
    let ssml = crate::text::ssml_wrap(&escaped, rate);
    self.synthesize_and_cache_raw_ssml(&ssml, language_code, voice, key)
  }

  /// Like `synthesize_and_cache`, but `ssml` is already a complete
  /// `<speak>...</speak>` document (used for BatchCloud, whose body is
  /// built segment-by-segment with its own escaping and `<break>` tags).
  fn synthesize_and_cache_raw_ssml(&self, ssml: &str, language_code: &str, voice: &str, key: &TtsCacheKey) -> Result<PathBuf> {
    let mp3 = self.synthesizer.synthesize(ssml, language_code, voice, "MP3", 22_050)?;

    let tmp_dir = tempfile::tempdir().map_err(PipelineError::Io)?;
    let mp3_path = tmp_dir.path().join("audio.mp3");
    std::fs::write(&mp3_path, &mp3).map_err(PipelineError::Io)?;
    let wav_path = tmp_dir.path().join("audio.wav");
    self.decoder.to_pcm_wav(&mp3_path, &wav_path)?;

    self.tts_cache.store(key, &wav_path)
  }

  fn realize_batch_cloud(
    &self,
    language: crate::model::Language,
    cards: &mut [Card],
    entries: &[PlanEntry],
    master: &MasterHeader,
    table: &mut ArtifactTable,
  ) -> Result<()> {
    if entries.is_empty() {
      return Ok(());
    }

    let documents = self.split_into_documents(cards, entries, language);

    // Independent documents are realized in parallel (bounded by rayon's
    // global pool); each writes to a private temp file before the single
    // rename-into-place step touches the shared cache directory.
    let realized: Vec<Result<RealizedDocument>> =
      documents.into_par_iter().map(|doc| self.realize_one_document(&doc, language)).collect();

    for result in realized {
      let doc = result?;
      master.check_and_set(doc.header, &format!("BatchCloud {}", doc.fingerprint))?;
      let artifact_key = doc.artifact_key.clone();
      self.assign_segment_windows(cards, &doc, &artifact_key)?;
      if !table.contains(&artifact_key) {
        table.insert(artifact_key.clone(), Artifact { header: doc.header, pcm: doc.pcm });
      }
    }
    Ok(())
  }

  fn split_into_documents(&self, cards: &[Card], entries: &[PlanEntry], language: crate::model::Language) -> Vec<BatchDocument> {
    let rate = self.config.tts_rate_for(language);
    let mut documents = Vec::new();
    let mut current = BatchDocument::new(rate.clone());

    for entry in entries {
      let segment = segment_ref(cards, *entry);
      let escaped = text::escape_for_ssml(&segment.text);
      let break_tag = format!("<break time=\"{}s\"/>", self.config.batch_break_sec);
      let addition_len = escaped.len() + break_tag.len();

      if !current.entries.is_empty() && current.body_len + addition_len > self.config.max_ssml_length {
        documents.push(std::mem::replace(&mut current, BatchDocument::new(rate.clone())));
      }
      current.body.push_str(&escaped);
      current.body.push_str(&break_tag);
      current.body_len += addition_len;
      current.entries.push(*entry);
    }
    if !current.entries.is_empty() {
      documents.push(current);
    }
    documents
  }

  fn realize_one_document(&self, doc: &BatchDocument, language: crate::model::Language) -> Result<RealizedDocument> {
    let ssml = text::ssml_wrap(&doc.body, &doc.rate);
    let fingerprint = batch_fingerprint(&ssml);
    let voice = self.config.voice_for(language, SynthStrategy::BatchCloud);
    let key = TtsCacheKey::for_batch_fingerprint(&fingerprint, language.tag(), &voice, &doc.rate);

    let pcm_path = match self.tts_cache.lookup(&key) {
      Some(path) => path,
      None => self.synthesize_and_cache_raw_ssml(&ssml, language.bcp47(), &voice, &key)?,
    };
    let pcm_path = pcm_path.canonicalize().unwrap_or(pcm_path);

    let (header, pcm) = codec::read_wav(&pcm_path)?;

    let pauses = match self.silence_cache.lookup(&fingerprint)? {
      Some(p) => p,
      None => match self.detector.detect(&pcm_path, self.config.voice_amplitude_threshold, self.config.silence_min_duration_sec) {
        Ok(p) => {
          self.silence_cache.store(&fingerprint, &p)?;
          p
        }
        Err(e) => {
          log::warn!("silence detection failed for batch {fingerprint}: {e}; proceeding with empty pause list");
          Vec::new()
        }
      },
    };

    Ok(RealizedDocument {
      fingerprint,
      artifact_key: pcm_path.to_string_lossy().to_string(),
      header,
      pcm,
      entries: doc.entries.clone(),
      pauses,
    })
  }

  fn assign_segment_windows(&self, cards: &mut [Card], doc: &RealizedDocument, artifact_key: &str) -> Result<()> {
    if doc.entries.len() > doc.pauses.len() {
      log::warn!(
        "batch {} has {} segments but only {} pauses; tail segments marked invalid",
        doc.fingerprint,
        doc.entries.len(),
        doc.pauses.len()
      );
    }

    let mut cursor = 0.0_f64;
    for (i, entry) in doc.entries.iter().enumerate() {
      let variant = variant_mut(cards, *entry, SynthStrategy::BatchCloud).unwrap();
      variant.artifact_key = Some(artifact_key.to_string());

      if let Some(pause) = doc.pauses.get(i) {
        let mid = pause.middle();
        let is_first = i == 0;
        let (mut start, mut end) = (
          if is_first { cursor } else { cursor + self.config.edge_step_sec },
          mid - self.config.edge_step_sec,
        );
        if start >= end {
          start = pause.start_sec;
          end = pause.end_sec;
        }
        if start >= end {
          start = mid;
          end = mid + 0.01;
        }
        variant.start_time_sec = start;
        variant.end_time_sec = end;
        cursor = mid;
      } else {
        variant.start_time_sec = -1.0;
        variant.end_time_sec = -1.0;
      }
    }
    Ok(())
  }
}

struct BatchDocument {
  rate: String,
  body: String,
  body_len: usize,
  entries: Vec<PlanEntry>,
}

impl BatchDocument {
  fn new(rate: String) -> Self {
    BatchDocument { rate, body: String::new(), body_len: 0, entries: Vec::new() }
  }
}

struct RealizedDocument {
  fingerprint: String,
  artifact_key: String,
  header: WavHeader,
  pcm: Vec<u8>,
  entries: Vec<PlanEntry>,
  pauses: Vec<Pause>,
}

fn segment_ref(cards: &[Card], entry: PlanEntry) -> &crate::model::Segment {
  &cards[entry.card_index].subgroups[entry.subgroup_index].segments[entry.segment_index]
}

fn variant_mut(
  cards: &mut [Card],
  entry: PlanEntry,
  strategy: SynthStrategy,
) -> Option<&mut crate::model::SegmentVariant> {
  cards[entry.card_index].subgroups[entry.subgroup_index].segments[entry.segment_index]
    .variants
    .get_mut(&strategy)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PipelineConfig;
  use crate::model::{Language, OriginalText, Phrase, SubtitleInterval};
  use crate::planner::plan_phrases;
  use crate::synth::fixtures::{FailingDetector, FakeSynthesizer, PassthroughDecoder, ScriptedDetector};
  use tempfile::tempdir;

  fn make_populator<'a>(
    config: &'a PipelineConfig,
    tts_cache: &'a TtsCache,
    silence_cache: &'a SilenceCache,
    synthesizer: &'a FakeSynthesizer,
    decoder: &'a PassthroughDecoder,
    detector: &'a dyn SilenceDetector,
  ) -> Populator<'a> {
    Populator { config, tts_cache, silence_cache, synthesizer, decoder, detector }
  }

  #[test]
  fn batch_cloud_exact_pause_match_produces_non_overlapping_windows() {
    let dir = tempdir().unwrap();
    let mut config = PipelineConfig::for_tests();
    config.paths.tts_cache_dir = dir.path().join("tts");
    config.paths.silence_cache_dir = dir.path().join("silence");

    let phrases: Vec<Phrase> = (0..3)
      .map(|i| Phrase::Pair {
        original: OriginalText { language: Language::Ru, text: format!("Satz {i}."), subtitle_interval: None },
        translation: None,
        translation_language: Language::En,
      })
      .collect();
    let mut config2 = config.clone();
    config2.allow_translation = false;
    let (mut cards, plan) = plan_phrases(&phrases, &config2);

    let tts_cache = TtsCache::new(&config.paths.tts_cache_dir);
    let silence_cache = SilenceCache::new(&config.paths.silence_cache_dir);
    let synthesizer = FakeSynthesizer::default();
    let decoder = PassthroughDecoder;
    let detector = ScriptedDetector::new(vec![vec![
      Pause { start_sec: 1.0, end_sec: 1.2 },
      Pause { start_sec: 3.0, end_sec: 3.2 },
      Pause { start_sec: 5.0, end_sec: 5.2 },
    ]]);

    let populator = make_populator(&config2, &tts_cache, &silence_cache, &synthesizer, &decoder, &detector);
    let master = MasterHeader::new();
    let mut table = ArtifactTable::new();
    populator.populate(&mut cards, &plan, &master, &mut table).unwrap();

    let windows: Vec<(f64, f64)> = cards
      .iter()
      .map(|c| {
        let v = &c.subgroups[0].segments[0].variants[&SynthStrategy::BatchCloud];
        (v.start_time_sec, v.end_time_sec)
      })
      .collect();

    for w in &windows {
      assert!(w.0 >= 0.0 && w.1 >= w.0);
    }
    for pair in windows.windows(2) {
      assert!(pair[0].1 <= pair[1].0 + 1e-9, "windows must be non-overlapping and ordered");
    }
  }

  #[test]
  fn batch_cloud_pause_shortfall_marks_tail_invalid() {
    let dir = tempdir().unwrap();
    let mut config = PipelineConfig::for_tests();
    config.paths.tts_cache_dir = dir.path().join("tts");
    config.paths.silence_cache_dir = dir.path().join("silence");
    config.allow_translation = false;

    let phrases: Vec<Phrase> = (0..3)
      .map(|i| Phrase::Pair {
        original: OriginalText { language: Language::Ru, text: format!("Satz {i}."), subtitle_interval: None },
        translation: None,
        translation_language: Language::En,
      })
      .collect();
    let (mut cards, plan) = plan_phrases(&phrases, &config);

    let tts_cache = TtsCache::new(&config.paths.tts_cache_dir);
    let silence_cache = SilenceCache::new(&config.paths.silence_cache_dir);
    let synthesizer = FakeSynthesizer::default();
    let decoder = PassthroughDecoder;
    let detector = ScriptedDetector::new(vec![vec![
      Pause { start_sec: 1.0, end_sec: 1.2 },
      Pause { start_sec: 3.0, end_sec: 3.2 },
    ]]);

    let populator = make_populator(&config, &tts_cache, &silence_cache, &synthesizer, &decoder, &detector);
    let master = MasterHeader::new();
    let mut table = ArtifactTable::new();
    populator.populate(&mut cards, &plan, &master, &mut table).unwrap();

    let last_variant = &cards[2].subgroups[0].segments[0].variants[&SynthStrategy::BatchCloud];
    assert_eq!(last_variant.start_time_sec, -1.0);
    assert_eq!(last_variant.end_time_sec, -1.0);
  }

  #[test]
  fn detector_failure_is_recoverable_and_leaves_empty_pause_list() {
    let dir = tempdir().unwrap();
    let mut config = PipelineConfig::for_tests();
    config.paths.tts_cache_dir = dir.path().join("tts");
    config.paths.silence_cache_dir = dir.path().join("silence");
    config.allow_translation = false;

    let phrases = vec![Phrase::Pair {
      original: OriginalText { language: Language::Ru, text: "Hallo.".to_string(), subtitle_interval: None },
      translation: None,
      translation_language: Language::En,
    }];
    let (mut cards, plan) = plan_phrases(&phrases, &config);

    let tts_cache = TtsCache::new(&config.paths.tts_cache_dir);
    let silence_cache = SilenceCache::new(&config.paths.silence_cache_dir);
    let synthesizer = FakeSynthesizer::default();
    let decoder = PassthroughDecoder;
    let detector = FailingDetector;

    let populator = make_populator(&config, &tts_cache, &silence_cache, &synthesizer, &decoder, &detector);
    let master = MasterHeader::new();
    let mut table = ArtifactTable::new();
    populator.populate(&mut cards, &plan, &master, &mut table).unwrap();

    let variant = &cards[0].subgroups[0].segments[0].variants[&SynthStrategy::BatchCloud];
    assert_eq!(variant.start_time_sec, -1.0);
  }

  #[test]
  fn filecut_header_mismatch_is_an_invariant_error() {
    let dir = tempdir().unwrap();
    let mut config = PipelineConfig::for_tests();
    config.paths.file_segment_dir = dir.path().to_path_buf();
    config.paths.tts_cache_dir = dir.path().join("tts");
    config.paths.silence_cache_dir = dir.path().join("silence");
    config.allow_translation = false;

    let rec_path = dir.path().join("rec1.wav");
    let header_a = WavHeader { channels: 1, sample_rate: 22_050, bits_per_sample: 16 };
    codec::write_wav(&rec_path, &codec::make_silence(0.5, &header_a), &header_a).unwrap();

    let interval = SubtitleInterval { start_sec: 0.0, end_sec: 0.3, source_file_key: "rec1.wav".to_string() };
    let phrases = vec![Phrase::Pair {
      original: OriginalText { language: Language::De, text: "Hallo.".to_string(), subtitle_interval: Some(interval) },
      translation: None,
      translation_language: Language::En,
    }];
    let (mut cards, plan) = plan_phrases(&phrases, &config);

    let tts_cache = TtsCache::new(&config.paths.tts_cache_dir);
    let silence_cache = SilenceCache::new(&config.paths.silence_cache_dir);
    let synthesizer = FakeSynthesizer { header: WavHeader { channels: 2, sample_rate: 44_100, bits_per_sample: 16 }, ms_per_char: 60 };
    let decoder = PassthroughDecoder;
    let detector = ScriptedDetector::new(vec![]);

    let populator = make_populator(&config, &tts_cache, &silence_cache, &synthesizer, &decoder, &detector);
    let master = MasterHeader::new();
    let mut table = ArtifactTable::new();
    let result = populator.populate(&mut cards, &plan, &master, &mut table);
    assert!(result.is_ok(), "single FileCut phrase with no BatchCloud siblings should not mismatch");
  }
}
