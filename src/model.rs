// ------------------------------------------------------------------
//  Data model
// ------------------------------------------------------------------

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::codec::WavHeader;

/// A finite language tag with an associated BCP-47 code. The core treats
/// the code as opaque; only the planner's text-normalization step and the
/// default voice/rate tables know which codes get special handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
  De,
  Ru,
  En,
}

impl Language {
  pub fn bcp47(&self) -> &'static str {
    match self {
      Language::De => "de-DE",
      Language::Ru => "ru-RU",
      Language::En => "en-US",
    }
  }

  pub fn tag(&self) -> &'static str {
    match self {
      Language::De => "de",
      Language::Ru => "ru",
      Language::En => "en",
    }
  }
}

/// One phrase from the external parser (out of scope here; consumed by
/// interface only). The JSON shape below is this crate's own boundary
/// format for that interface — phrase-file parsing from markdown or any
/// other author-facing format is a separate, out-of-scope concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Phrase {
  Description { language: Language, text: String },
  Pair { original: OriginalText, translation: Option<String>, translation_language: Language },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalText {
  pub language: Language,
  pub text: String,
  pub subtitle_interval: Option<SubtitleInterval>,
}

/// Points at a cut in an existing recording; used by the FileCut strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleInterval {
  pub start_sec: f64,
  pub end_sec: f64,
  pub source_file_key: String,
}

impl SubtitleInterval {
  pub fn is_valid(&self) -> bool {
    self.end_sec > self.start_sec && self.start_sec >= 0.0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubgroupRole {
  Description,
  Original,
  Translation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynthStrategy {
  FileCut,
  SingleCloud,
  BatchCloud,
}

#[derive(Debug, Clone)]
pub enum PausePolicy {
  Fixed(f64),
  Dynamic { file_segment_dominated: bool, cap_if_original: bool },
}

/// A single utterance to render.
#[derive(Debug, Clone)]
pub struct Segment {
  pub text: String,
  pub language: Language,
  pub silent: bool,
  pub variants: HashMap<SynthStrategy, SegmentVariant>,
}

impl Segment {
  pub fn is_silent_text(text: &str) -> bool {
    !text.chars().any(|c| c.is_alphabetic())
  }

  /// Preference order for picking a concrete strategy at emission time:
  /// FileCut, then SingleCloud, then BatchCloud.
  pub fn preferred_variant(&self) -> Option<(SynthStrategy, &SegmentVariant)> {
    for strategy in [SynthStrategy::FileCut, SynthStrategy::SingleCloud, SynthStrategy::BatchCloud] {
      if let Some(v) = self.variants.get(&strategy) {
        return Some((strategy, v));
      }
    }
    None
  }
}

#[derive(Debug, Clone)]
pub struct SegmentVariant {
  pub strategy: SynthStrategy,
  pub rate_percent: String,
  pub file_key: Option<String>,
  pub interval: Option<SubtitleInterval>,
  /// Populated once C5 realizes this variant.
  pub artifact_key: Option<String>,
  /// Window inside the artifact, seconds. `-1.0` on both ends means
  /// "use the whole artifact" (valid for FileCut/SingleCloud by
  /// default, or BatchCloud when no pause could be matched).
  pub start_time_sec: f64,
  pub end_time_sec: f64,
}

impl SegmentVariant {
  pub fn new(strategy: SynthStrategy, rate_percent: impl Into<String>) -> Self {
    SegmentVariant {
      strategy,
      rate_percent: rate_percent.into(),
      file_key: None,
      interval: None,
      artifact_key: None,
      start_time_sec: -1.0,
      end_time_sec: -1.0,
    }
  }

  pub fn has_valid_window(&self) -> bool {
    self.start_time_sec >= 0.0 && self.end_time_sec >= self.start_time_sec
  }
}

#[derive(Debug, Clone)]
pub struct Subgroup {
  pub role: SubgroupRole,
  pub segments: Vec<Segment>,
  pub pause_policy: PausePolicy,
  pub caption_text: String,
}

impl Subgroup {
  pub fn has_content(&self) -> bool {
    self.segments.iter().any(|s| !s.silent)
  }
}

#[derive(Debug, Clone)]
pub struct Card {
  pub is_description: bool,
  pub subgroups: Vec<Subgroup>,
}

/// `(WavHeader, pcm_bytes)`. Invariant I1: every artifact used in one job
/// shares one master header.
#[derive(Debug, Clone)]
pub struct Artifact {
  pub header: WavHeader,
  pub pcm: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
  pub index: u32,
  pub start_ms: u64,
  pub end_ms: u64,
  pub text: String,
}

/// Populated by C5, consulted read-only by C6, dropped at job end.
#[derive(Debug, Default)]
pub struct ArtifactTable {
  artifacts: HashMap<String, Artifact>,
}

impl ArtifactTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, key: impl Into<String>, artifact: Artifact) {
    self.artifacts.insert(key.into(), artifact);
  }

  pub fn get(&self, key: &str) -> Option<&Artifact> {
    self.artifacts.get(key)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.artifacts.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.artifacts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.artifacts.is_empty()
  }
}

/// `(language, strategy) -> ordered segments requesting that strategy`.
#[derive(Debug, Default)]
pub struct Plan {
  pub work: HashMap<(Language, SynthStrategy), Vec<PlanEntry>>,
}

/// Points at one segment+variant inside a card's subgroup, so C5 can
/// mutate the owning segment's variant in place once realized.
#[derive(Debug, Clone, Copy)]
pub struct PlanEntry {
  pub card_index: usize,
  pub subgroup_index: usize,
  pub segment_index: usize,
}

impl Plan {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, language: Language, strategy: SynthStrategy, entry: PlanEntry) {
    self.work.entry((language, strategy)).or_default().push(entry);
  }

  pub fn entries_for(&self, language: Language, strategy: SynthStrategy) -> &[PlanEntry] {
    self
      .work
      .get(&(language, strategy))
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  pub fn languages(&self) -> Vec<Language> {
    let mut langs: Vec<Language> = self.work.keys().map(|(l, _)| *l).collect();
    langs.sort();
    langs.dedup();
    langs
  }
}

/// `duration_ms -> pcm bytes`, lazily created.
#[derive(Debug, Default)]
pub struct PauseTable {
  pauses: HashMap<u64, Vec<u8>>,
}

impl PauseTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get_or_create(&mut self, duration_sec: f64, header: &WavHeader) -> &[u8] {
    let ms = crate::codec::duration_ms_for_bytes(crate::codec::frames_for_duration(duration_sec, header), header);
    self
      .pauses
      .entry(ms)
      .or_insert_with(|| crate::codec::make_silence(duration_sec, header))
      .as_slice()
  }
}
