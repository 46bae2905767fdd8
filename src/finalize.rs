// ------------------------------------------------------------------
//  Timeline Finalizer (C7)
// ------------------------------------------------------------------

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::codec::{self, WavHeader};
use crate::error::{PipelineError, Result};
use crate::model::Caption;

/// Below this relative drift between the concatenator's planned cursor and
/// the actual encoded duration, no caption rescaling is applied.
const SCALE_EPSILON: f64 = 0.01;

#[derive(Debug)]
pub struct FinalizeReport {
  pub scale_factor: f64,
  pub actual_ms: u64,
}

/// Writes the final WAV (header + frames) and the matching SRT file,
/// rescaling captions if the encoded duration drifted from the planned
/// cursor by more than [`SCALE_EPSILON`].
pub fn finalize(
  pcm: &[u8],
  header: &WavHeader,
  planned_ms: u64,
  captions: &[Caption],
  wav_path: &Path,
  srt_path: &Path,
) -> Result<FinalizeReport> {
  codec::write_wav(wav_path, pcm, header)?;

  let actual_ms = codec::duration_ms_for_bytes(pcm.len(), header);
  let scale_factor = if planned_ms == 0 {
    1.0
  } else {
    actual_ms as f64 / planned_ms as f64
  };

  let drift = (scale_factor - 1.0).abs();
  let rescale = drift > SCALE_EPSILON;
  if rescale {
    log::warn!(
      "planned cursor {planned_ms}ms diverged from encoded duration {actual_ms}ms (factor {scale_factor:.4}); rescaling captions"
    );
  }

  let scaled: Vec<Caption> = if rescale {
    captions
      .iter()
      .map(|c| Caption {
        index: c.index,
        start_ms: (c.start_ms as f64 * scale_factor).round() as u64,
        end_ms: (c.end_ms as f64 * scale_factor).round() as u64,
        text: c.text.clone(),
      })
      .collect()
  } else {
    captions.to_vec()
  };

  write_srt(&scaled, srt_path)?;

  Ok(FinalizeReport { scale_factor, actual_ms })
}

fn write_srt(captions: &[Caption], path: &Path) -> Result<()> {
  let file = File::create(path).map_err(PipelineError::Io)?;
  let mut w = BufWriter::new(file);

  for caption in captions {
    if caption.end_ms < caption.start_ms {
      return Err(PipelineError::Invariant {
        message: format!("caption {} has end before start ({} -> {})", caption.index, caption.start_ms, caption.end_ms),
      });
    }
    writeln!(w, "{}", caption.index).map_err(PipelineError::Io)?;
    writeln!(w, "{} --> {}", format_timestamp(caption.start_ms), format_timestamp(caption.end_ms)).map_err(PipelineError::Io)?;
    writeln!(w, "{}", crate::text::escape_for_srt(&caption.text)).map_err(PipelineError::Io)?;
    writeln!(w).map_err(PipelineError::Io)?;
  }

  w.flush().map_err(PipelineError::Io)?;
  Ok(())
}

fn format_timestamp(ms: u64) -> String {
  let hours = ms / 3_600_000;
  let minutes = (ms % 3_600_000) / 60_000;
  let seconds = (ms % 60_000) / 1_000;
  let millis = ms % 1_000;
  format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  fn header() -> WavHeader {
    WavHeader { channels: 1, sample_rate: 22_050, bits_per_sample: 16 }
  }

  #[test]
  fn timestamp_formatting_matches_srt_convention() {
    assert_eq!(format_timestamp(0), "00:00:00,000");
    assert_eq!(format_timestamp(61_234), "00:01:01,234");
    assert_eq!(format_timestamp(3_661_001), "01:01:01,001");
  }

  #[test]
  fn no_rescale_when_drift_is_within_epsilon() {
    let dir = tempdir().unwrap();
    let header = header();
    let pcm = codec::make_silence(1.0, &header);
    let planned_ms = codec::duration_ms_for_bytes(pcm.len(), &header);
    let captions = vec![Caption { index: 1, start_ms: 0, end_ms: 500, text: "Hallo.".to_string() }];
    let report = finalize(&pcm, &header, planned_ms, &captions, &dir.path().join("out.wav"), &dir.path().join("out.srt")).unwrap();
    assert!((report.scale_factor - 1.0).abs() < SCALE_EPSILON);

    let written = std::fs::read_to_string(dir.path().join("out.srt")).unwrap();
    assert!(written.starts_with("1\n00:00:00,000 --> 00:00:00,500\nHallo.\n"));
  }

  #[test]
  fn rescales_captions_when_drift_exceeds_epsilon() {
    let dir = tempdir().unwrap();
    let header = header();
    let pcm = codec::make_silence(1.0, &header);
    let planned_ms = codec::duration_ms_for_bytes(pcm.len(), &header) * 2;
    let captions = vec![Caption { index: 1, start_ms: 0, end_ms: 1000, text: "x".to_string() }];
    let report = finalize(&pcm, &header, planned_ms, &captions, &dir.path().join("out.wav"), &dir.path().join("out.srt")).unwrap();
    assert!((report.scale_factor - 0.5).abs() < 0.01);
  }

  #[test]
  fn rejects_caption_ending_before_it_starts() {
    let dir = tempdir().unwrap();
    let header = header();
    let pcm = codec::make_silence(1.0, &header);
    let planned_ms = codec::duration_ms_for_bytes(pcm.len(), &header);
    let captions = vec![Caption { index: 1, start_ms: 500, end_ms: 400, text: "x".to_string() }];
    let err = finalize(&pcm, &header, planned_ms, &captions, &dir.path().join("out.wav"), &dir.path().join("out.srt")).unwrap_err();
    assert_eq!(err.kind_name(), "InvariantError");
  }

  #[test]
  fn accepts_zero_duration_caption() {
    let dir = tempdir().unwrap();
    let header = header();
    let pcm = codec::make_silence(1.0, &header);
    let planned_ms = codec::duration_ms_for_bytes(pcm.len(), &header);
    let captions = vec![Caption { index: 1, start_ms: 500, end_ms: 500, text: "x".to_string() }];
    let report = finalize(&pcm, &header, planned_ms, &captions, &dir.path().join("out.wav"), &dir.path().join("out.srt")).unwrap();
    assert!((report.scale_factor - 1.0).abs() < SCALE_EPSILON);
  }
}
