// ------------------------------------------------------------------
//  Segment Planner (C4)
// ------------------------------------------------------------------

use std::collections::HashSet;

use crate::config::PipelineConfig;
use crate::model::{
  Card, OriginalText, PausePolicy, Phrase, Plan, PlanEntry, Segment, SegmentVariant, Subgroup, SubgroupRole,
  SynthStrategy,
};
use crate::text;

/// `(role, language, interval_valid?) -> set<strategy>`, stated as a pure
/// function per the spec's design notes rather than a free-form callback
/// object. Mirrors the ground-truth callback's dispatch: an Original
/// subgroup with a valid subtitle interval always prefers a cut from the
/// existing recording; otherwise the per-language split is German via a
/// single cloud call per segment, Russian and English batched.
pub fn strategy_policy(role: SubgroupRole, language: crate::model::Language, interval_valid: bool) -> HashSet<SynthStrategy> {
  use crate::model::Language;
  let mut strategies = HashSet::new();
  match role {
    SubgroupRole::Original if interval_valid => {
      strategies.insert(SynthStrategy::FileCut);
    }
    _ => match language {
      Language::De => {
        strategies.insert(SynthStrategy::SingleCloud);
      }
      Language::Ru | Language::En => {
        strategies.insert(SynthStrategy::BatchCloud);
      }
    },
  }
  strategies
}

/// Splits text on a pipe separator into multiple segment texts; empty
/// parts yield nothing.
fn split_pipe(text: &str) -> Vec<String> {
  text
    .split('|')
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
    .collect()
}

/// Strips a recognized language-prefix tag (`de:`, `en:`, `rus:`) from
/// the front of a split segment, returning the override language (if
/// any) and the remaining text.
fn strip_language_prefix(text: &str, default_language: crate::model::Language) -> (crate::model::Language, String) {
  use crate::model::Language;
  let trimmed = text.trim_start();
  if let Some(rest) = trimmed.strip_prefix("de:") {
    (Language::De, rest.trim_start().to_string())
  } else if let Some(rest) = trimmed.strip_prefix("en:") {
    (Language::En, rest.trim_start().to_string())
  } else if let Some(rest) = trimmed.strip_prefix("rus:") {
    (Language::Ru, rest.trim_start().to_string())
  } else {
    (default_language, trimmed.to_string())
  }
}

fn build_segments(
  raw_text: &str,
  default_language: crate::model::Language,
  role: SubgroupRole,
  config: &PipelineConfig,
  interval: Option<&crate::model::SubtitleInterval>,
) -> Vec<Segment> {
  split_pipe(raw_text)
    .into_iter()
    .map(|part| {
      let (language, stripped) = strip_language_prefix(&part, default_language);
      let normalized = text::fix_text_segment(&stripped, Some(language));
      let silent = Segment::is_silent_text(&normalized);

      let interval_valid = interval.map(|iv| iv.is_valid()).unwrap_or(false);
      let rate = config.tts_rate_for(language);
      let mut variants = std::collections::HashMap::new();

      if silent {
        return Segment { text: normalized, language, silent, variants };
      }

      for strategy in strategy_policy(role, language, interval_valid) {
        let mut variant = SegmentVariant::new(strategy, rate.clone());
        if strategy == SynthStrategy::FileCut {
          if let Some(iv) = interval {
            variant.file_key = Some(iv.source_file_key.clone());
            variant.interval = Some(iv.clone());
          }
        }
        variants.insert(strategy, variant);
      }

      Segment { text: normalized, language, silent, variants }
    })
    .collect()
}

fn dynamic_pause(role: SubgroupRole) -> PausePolicy {
  match role {
    SubgroupRole::Original => PausePolicy::Dynamic { file_segment_dominated: true, cap_if_original: true },
    _ => PausePolicy::Dynamic { file_segment_dominated: false, cap_if_original: false },
  }
}

/// Transforms a phrase list into cards, registering every non-silent
/// segment's variants in the plan.
pub fn plan_phrases(phrases: &[Phrase], config: &PipelineConfig) -> (Vec<Card>, Plan) {
  let mut cards = Vec::with_capacity(phrases.len());
  let mut plan = Plan::new();

  for phrase in phrases {
    let card = match phrase {
      Phrase::Description { language, text: desc_text } => {
        let segments = build_segments(desc_text, *language, SubgroupRole::Description, config, None);
        Card {
          is_description: true,
          subgroups: vec![Subgroup {
            role: SubgroupRole::Description,
            caption_text: desc_text.clone(),
            pause_policy: PausePolicy::Fixed(config.description_delay_sec),
            segments,
          }],
        }
      }
      Phrase::Pair { original, translation, translation_language } => {
        build_pair_card(original, translation.as_deref(), *translation_language, config)
      }
    };
    cards.push(card);
  }

  for (card_index, card) in cards.iter().enumerate() {
    for (subgroup_index, subgroup) in card.subgroups.iter().enumerate() {
      for (segment_index, segment) in subgroup.segments.iter().enumerate() {
        if segment.silent {
          continue;
        }
        for strategy in segment.variants.keys() {
          plan.push(segment.language, *strategy, PlanEntry { card_index, subgroup_index, segment_index });
        }
      }
    }
  }

  (cards, plan)
}

fn build_pair_card(
  original: &OriginalText,
  translation: Option<&str>,
  translation_language: crate::model::Language,
  config: &PipelineConfig,
) -> Card {
  let original_segments = build_segments(
    &original.text,
    original.language,
    SubgroupRole::Original,
    config,
    original.subtitle_interval.as_ref(),
  );
  let original_subgroup = Subgroup {
    role: SubgroupRole::Original,
    caption_text: original.text.clone(),
    pause_policy: dynamic_pause(SubgroupRole::Original),
    segments: original_segments,
  };

  let mut subgroups = vec![original_subgroup];

  if config.allow_translation {
    let translation_subgroup = match translation {
      Some(t) if !t.trim().is_empty() => {
        let segments = build_segments(t, translation_language, SubgroupRole::Translation, config, None);
        Subgroup {
          role: SubgroupRole::Translation,
          caption_text: t.to_string(),
          pause_policy: dynamic_pause(SubgroupRole::Translation),
          segments,
        }
      }
      _ => {
        log::warn!("pair phrase has no translation; inserting an empty fixed-delay subgroup");
        Subgroup {
          role: SubgroupRole::Translation,
          caption_text: String::new(),
          pause_policy: PausePolicy::Fixed(config.translation_delay_sec),
          segments: Vec::new(),
        }
      }
    };
    subgroups.push(translation_subgroup);
  }

  Card { is_description: false, subgroups }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Language;

  #[test]
  fn pipe_splits_into_multiple_segments() {
    let parts = split_pipe("Hallo|Wie geht's");
    assert_eq!(parts, vec!["Hallo".to_string(), "Wie geht's".to_string()]);
  }

  #[test]
  fn empty_parts_are_dropped() {
    let parts = split_pipe("Hallo||Tschüss");
    assert_eq!(parts, vec!["Hallo".to_string(), "Tschüss".to_string()]);
  }

  #[test]
  fn language_prefix_overrides_default_language() {
    let (lang, rest) = strip_language_prefix("de: Guten Tag", Language::En);
    assert_eq!(lang, Language::De);
    assert_eq!(rest, "Guten Tag");
  }

  #[test]
  fn missing_translation_inserts_empty_fixed_delay_subgroup() {
    let config = PipelineConfig::for_tests();
    let original =
      OriginalText { language: Language::De, text: "Hallo.".to_string(), subtitle_interval: None };
    let card = build_pair_card(&original, None, Language::En, &config);
    assert_eq!(card.subgroups.len(), 2);
    assert!(card.subgroups[1].segments.is_empty());
    assert!(matches!(card.subgroups[1].pause_policy, PausePolicy::Fixed(_)));
  }

  #[test]
  fn valid_subtitle_interval_selects_filecut_strategy() {
    let config = PipelineConfig::for_tests();
    let interval = crate::model::SubtitleInterval { start_sec: 1.0, end_sec: 2.0, source_file_key: "rec1".into() };
    let original =
      OriginalText { language: Language::De, text: "Hallo.".to_string(), subtitle_interval: Some(interval) };
    let segments = build_segments(&original.text, original.language, SubgroupRole::Original, &config, original.subtitle_interval.as_ref());
    assert_eq!(segments.len(), 1);
    assert!(segments[0].variants.contains_key(&SynthStrategy::FileCut));
  }

  #[test]
  fn german_without_interval_prefers_single_cloud() {
    let strategies = strategy_policy(SubgroupRole::Original, Language::De, false);
    assert!(strategies.contains(&SynthStrategy::SingleCloud));
  }

  #[test]
  fn russian_and_english_without_interval_prefer_batch_cloud() {
    assert!(strategy_policy(SubgroupRole::Translation, Language::Ru, false).contains(&SynthStrategy::BatchCloud));
    assert!(strategy_policy(SubgroupRole::Translation, Language::En, false).contains(&SynthStrategy::BatchCloud));
  }

  #[test]
  fn plan_registers_every_non_silent_segment() {
    let config = PipelineConfig::for_tests();
    let phrases = vec![Phrase::Pair {
      original: OriginalText { language: Language::De, text: "Hallo.".to_string(), subtitle_interval: None },
      translation: Some("Hello.".to_string()),
      translation_language: Language::En,
    }];
    let (_cards, plan) = plan_phrases(&phrases, &config);
    let de_entries = plan.entries_for(Language::De, SynthStrategy::SingleCloud);
    let en_entries = plan.entries_for(Language::En, SynthStrategy::BatchCloud);
    assert_eq!(de_entries.len(), 1);
    assert_eq!(en_entries.len(), 1);
  }
}
