// ------------------------------------------------------------------
//  Concatenator (C6)
// ------------------------------------------------------------------

use std::io::Write;

use crate::codec::{self, WavHeader};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::model::{ArtifactTable, Card, Caption, PausePolicy, PauseTable, SubgroupRole, SynthStrategy};

const SILENT_SEGMENT_PAUSE_SEC: f64 = 0.2;

#[derive(Debug)]
pub struct ConcatResult {
  pub total_bytes: usize,
  pub planned_ms: u64,
  pub captions: Vec<Caption>,
}

/// Walks cards in input order, emitting PCM to `out` and building the
/// caption list. `master_header` must already be fixed by C5.
pub fn concatenate(
  cards: &[Card],
  table: &ArtifactTable,
  config: &PipelineConfig,
  master_header: WavHeader,
  out: &mut impl Write,
) -> Result<ConcatResult> {
  let mut cursor_ms: u64 = 0;
  let mut total_bytes: usize = 0;
  let mut captions = Vec::new();
  let mut pause_table = PauseTable::new();
  let mut caption_index: u32 = 1;

  for card in cards {
    let repeat_count = if card.is_description { 1 } else { config.repeat_count };
    for _ in 0..repeat_count {
      for subgroup in &card.subgroups {
        let subgroup_start_ms = cursor_ms;
        let mut dominant_strategy: Option<SynthStrategy> = None;
        let content_start_bytes_ms = cursor_ms;

        for segment in &subgroup.segments {
          if segment.silent {
            let pcm = pause_table.get_or_create(SILENT_SEGMENT_PAUSE_SEC, &master_header);
            write_checked(out, pcm, &mut total_bytes, &master_header)?;
            cursor_ms += codec::duration_ms_for_bytes(pcm.len(), &master_header);
            continue;
          }

          let Some((strategy, variant)) = segment.preferred_variant() else {
            continue;
          };
          dominant_strategy = Some(strategy);

          let artifact_key = variant.artifact_key.as_ref().ok_or_else(|| PipelineError::Invariant {
            message: format!("segment variant for strategy {strategy:?} has no realized artifact"),
          })?;
          let artifact = table.get(artifact_key).ok_or_else(|| PipelineError::Invariant {
            message: format!("artifact {artifact_key} missing from artifact table"),
          })?;
          if artifact.header != master_header {
            return Err(PipelineError::Invariant {
              message: format!("artifact {artifact_key} header {:?} != master {:?}", artifact.header, master_header),
            });
          }

          let window: &[u8] = if variant.has_valid_window() {
            codec::slice_window(&artifact.pcm, variant.start_time_sec, variant.end_time_sec, &master_header)
          } else {
            &artifact.pcm
          };

          write_checked(out, window, &mut total_bytes, &master_header)?;
          cursor_ms += codec::duration_ms_for_bytes(window.len(), &master_header);
        }

        let subgroup_content_ms = cursor_ms - content_start_bytes_ms;

        let pause_sec = match &subgroup.pause_policy {
          PausePolicy::Fixed(sec) => *sec,
          PausePolicy::Dynamic { file_segment_dominated, cap_if_original } => {
            let multiplier =
              if *file_segment_dominated && dominant_strategy == Some(SynthStrategy::FileCut) {
                config.file_segment_delay_multiplier
              } else {
                1.0
              };
            let mut pause = (subgroup_content_ms as f64 / 1000.0) * multiplier + config.extra_delay_sec;
            if *cap_if_original && config.cap_original_pause && subgroup.role == SubgroupRole::Original {
              pause = pause.min(config.original_pause_cap_sec);
            }
            if dominant_strategy == Some(SynthStrategy::BatchCloud) {
              pause += -(config.batch_break_sec as f64) + 2.0 * config.edge_step_sec;
            }
            pause.max(0.0)
          }
        };

        if pause_sec > 0.0 {
          let pcm = pause_table.get_or_create(pause_sec, &master_header);
          write_checked(out, pcm, &mut total_bytes, &master_header)?;
          cursor_ms += codec::duration_ms_for_bytes(pcm.len(), &master_header);
        }

        if subgroup.has_content() {
          // end_ms includes the inter-subgroup pause just emitted above.
          captions.push(Caption {
            index: caption_index,
            start_ms: subgroup_start_ms,
            end_ms: cursor_ms,
            text: subgroup.caption_text.clone(),
          });
          caption_index += 1;
        }
      }
    }
  }

  if config.end_silence_sec > 0.0 {
    let pcm = pause_table.get_or_create(config.end_silence_sec, &master_header);
    write_checked(out, pcm, &mut total_bytes, &master_header)?;
    cursor_ms += codec::duration_ms_for_bytes(pcm.len(), &master_header);
  }

  Ok(ConcatResult { total_bytes, planned_ms: cursor_ms, captions })
}

fn write_checked(out: &mut impl Write, pcm: &[u8], total_bytes: &mut usize, header: &WavHeader) -> Result<()> {
  let bpf = header.bytes_per_frame();
  if bpf > 0 && pcm.len() % bpf != 0 {
    return Err(PipelineError::Invariant { message: format!("emitted slice of {} bytes is not frame-aligned ({bpf} bytes/frame)", pcm.len()) });
  }
  out.write_all(pcm).map_err(PipelineError::Io)?;
  *total_bytes += pcm.len();
  Ok(())
}
