// ------------------------------------------------------------------
//  Injected capabilities: Synthesizer, Decoder, SilenceDetector (§6)
// ------------------------------------------------------------------
//
// The core depends only on these traits. `HttpSynthesizer` is the one
// concrete provider shipped here, grounded in the teacher's
// `speak_via_opentts_stream` (reqwest::blocking GET against a speech
// endpoint) but adapted to a request/response shape instead of a
// streaming playback channel, since this pipeline writes to disk rather
// than to a live audio device.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::cache::silence_cache::Pause;
use crate::codec;
use crate::error::{PipelineError, Result};

pub trait Synthesizer: Send + Sync {
  /// Synthesizes `ssml` and returns a compressed or uncompressed audio
  /// buffer (MP3 in the reference behavior). `encoding` names the
  /// requested output container (e.g. `"MP3"`).
  fn synthesize(
    &self,
    ssml: &str,
    language_code: &str,
    voice: &str,
    encoding: &str,
    sample_rate: u32,
  ) -> Result<Vec<u8>>;
}

pub trait Decoder: Send + Sync {
  /// Normalizes any supported input into linear-PCM WAV at `out_path`.
  fn to_pcm_wav(&self, in_path: &Path, out_path: &Path) -> Result<()>;
}

pub trait SilenceDetector: Send + Sync {
  /// Detects silent intervals at least `min_silence_sec` long, using
  /// `amplitude_threshold` as an absolute PCM amplitude cutoff. The
  /// mapping to the provider's native scale (e.g. dBFS) is the
  /// provider's concern, not the trait's.
  fn detect(&self, pcm_wav_path: &Path, amplitude_threshold: u32, min_silence_sec: f64) -> Result<Vec<Pause>>;
}

/// HTTP-backed synthesizer, decoder and detector calling a single speech
/// service that accepts SSML and returns WAV/MP3 bytes directly, analogous
/// to how the teacher's OpenTTS client builds a URL with query parameters
/// and streams the response body.
pub struct HttpSynthesizer {
  client: reqwest::blocking::Client,
  base_url: String,
}

impl HttpSynthesizer {
  pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
    let client = reqwest::blocking::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| PipelineError::Config { message: format!("failed to build HTTP client: {e}") })?;
    Ok(HttpSynthesizer { client, base_url: base_url.into() })
  }
}

impl Synthesizer for HttpSynthesizer {
  fn synthesize(
    &self,
    ssml: &str,
    language_code: &str,
    voice: &str,
    encoding: &str,
    sample_rate: u32,
  ) -> Result<Vec<u8>> {
    let resp = self
      .client
      .post(&self.base_url)
      .query(&[
        ("languageCode", language_code),
        ("voiceName", voice),
        ("audioEncoding", encoding),
        ("sampleRateHertz", &sample_rate.to_string()),
      ])
      .body(ssml.to_string())
      .send()
      .map_err(|e| PipelineError::Synth { context: format!("{voice}@{language_code}"), message: e.to_string() })?;

    if !resp.status().is_success() {
      return Err(PipelineError::Synth {
        context: format!("{voice}@{language_code}"),
        message: format!("HTTP {}", resp.status()),
      });
    }

    resp
      .bytes()
      .map(|b| b.to_vec())
      .map_err(|e| PipelineError::Synth { context: format!("{voice}@{language_code}"), message: e.to_string() })
  }
}

/// Shells out to `ffmpeg` to normalize any input container into
/// linear-PCM WAV, mirroring the reference implementation's reliance on
/// an external decoder (pydub/ffmpeg) rather than a hand-rolled MP3
/// decoder — decoding arbitrary compressed audio is explicitly out of
/// this crate's scope.
pub struct FfmpegDecoder {
  binary: String,
  target: codec::WavHeader,
}

impl FfmpegDecoder {
  pub fn new(binary: impl Into<String>, target: codec::WavHeader) -> Self {
    FfmpegDecoder { binary: binary.into(), target }
  }
}

impl Decoder for FfmpegDecoder {
  fn to_pcm_wav(&self, in_path: &Path, out_path: &Path) -> Result<()> {
    let out = Command::new(&self.binary)
      .args([
        "-y",
        "-i",
      ])
      .arg(in_path)
      .args([
        "-ac",
        &self.target.channels.to_string(),
        "-ar",
        &self.target.sample_rate.to_string(),
        "-sample_fmt",
        if self.target.bits_per_sample == 8 { "u8" } else { "s16" },
        "-f",
        "wav",
      ])
      .arg(out_path)
      .output()
      .map_err(|e| PipelineError::Synth { context: in_path.display().to_string(), message: format!("failed to launch {}: {e}", self.binary) })?;

    if !out.status.success() {
      let stderr = String::from_utf8_lossy(&out.stderr);
      return Err(PipelineError::Synth {
        context: in_path.display().to_string(),
        message: format!("{} exited with {}: {stderr}", self.binary, out.status),
      });
    }
    Ok(())
  }
}

/// Local amplitude-threshold silence detector: walks the PCM samples in
/// fixed-size windows and reports runs below `amplitude_threshold` that
/// last at least `min_silence_sec`. The reference implementation converts
/// the same absolute threshold to dBFS for `pydub.silence.detect_silence`;
/// this is a from-scratch equivalent that needs no external process since
/// it operates directly on already-decoded linear PCM.
pub struct AmplitudeSilenceDetector;

impl SilenceDetector for AmplitudeSilenceDetector {
  fn detect(&self, pcm_wav_path: &Path, amplitude_threshold: u32, min_silence_sec: f64) -> Result<Vec<Pause>> {
    let (header, pcm) = codec::read_wav(pcm_wav_path)?;
    if header.bits_per_sample != 16 {
      return Err(PipelineError::Detect {
        fingerprint: pcm_wav_path.display().to_string(),
        message: format!("amplitude detector only supports 16-bit PCM, got {}-bit", header.bits_per_sample),
      });
    }

    let bpf = header.bytes_per_frame();
    if bpf == 0 {
      return Ok(Vec::new());
    }

    let threshold = amplitude_threshold as i32;
    let mut pauses = Vec::new();
    let mut silence_start_frame: Option<usize> = None;
    let frame_count = pcm.len() / bpf;

    for frame_idx in 0..frame_count {
      let offset = frame_idx * bpf;
      let peak = (0..header.channels as usize)
        .map(|ch| {
          let sample_off = offset + ch * 2;
          i16::from_le_bytes([pcm[sample_off], pcm[sample_off + 1]]).unsigned_abs() as i32
        })
        .max()
        .unwrap_or(0);

      if peak <= threshold {
        silence_start_frame.get_or_insert(frame_idx);
      } else if let Some(start_frame) = silence_start_frame.take() {
        push_if_long_enough(&mut pauses, start_frame, frame_idx, &header, min_silence_sec);
      }
    }
    if let Some(start_frame) = silence_start_frame {
      push_if_long_enough(&mut pauses, start_frame, frame_count, &header, min_silence_sec);
    }

    Ok(pauses)
  }
}

fn push_if_long_enough(pauses: &mut Vec<Pause>, start_frame: usize, end_frame: usize, header: &codec::WavHeader, min_silence_sec: f64) {
  let start_sec = start_frame as f64 / header.sample_rate as f64;
  let end_sec = end_frame as f64 / header.sample_rate as f64;
  if end_sec - start_sec >= min_silence_sec {
    pauses.push(Pause { start_sec, end_sec });
  }
}

#[cfg(test)]
pub(crate) mod fixtures {
  //! In-memory fakes for the three injected capabilities (C13), used
  //! across the pipeline's test suite so no network or subprocess is
  //! ever touched by a unit test.

  use std::fs;
  use std::sync::Mutex;

  use super::*;
  use crate::codec::{self, WavHeader};

  /// Deterministic fake synthesizer: returns a silence buffer whose
  /// duration is proportional to the text length, wrapped as a WAV file
  /// (so the fake decoder is a no-op passthrough).
  pub struct FakeSynthesizer {
    pub header: WavHeader,
    pub ms_per_char: u64,
  }

  impl Default for FakeSynthesizer {
    fn default() -> Self {
      FakeSynthesizer { header: WavHeader::default(), ms_per_char: 60 }
    }
  }

  impl Synthesizer for FakeSynthesizer {
    fn synthesize(&self, ssml: &str, _language_code: &str, _voice: &str, _encoding: &str, _sample_rate: u32) -> Result<Vec<u8>> {
      let visible_chars = ssml.chars().filter(|c| c.is_alphanumeric()).count() as u64;
      let duration_sec = (visible_chars * self.ms_per_char) as f64 / 1000.0;
      let pcm = codec::make_silence(duration_sec.max(0.05), &self.header);
      let mut buf = Vec::new();
      write_fake_wav(&mut buf, &pcm, &self.header);
      Ok(buf)
    }
  }

  fn write_fake_wav(buf: &mut Vec<u8>, pcm: &[u8], header: &WavHeader) {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    codec::write_wav(tmp.path(), pcm, header).unwrap();
    buf.extend(fs::read(tmp.path()).unwrap());
  }

  /// Passthrough decoder: the fake synthesizer already emits WAV, so this
  /// just copies bytes.
  pub struct PassthroughDecoder;

  impl Decoder for PassthroughDecoder {
    fn to_pcm_wav(&self, in_path: &Path, out_path: &Path) -> Result<()> {
      fs::copy(in_path, out_path).map_err(PipelineError::Io)?;
      Ok(())
    }
  }

  /// Scripted silence detector: returns a fixed sequence of pause lists,
  /// one per call, so tests can model exact-match and mismatch scenarios
  /// (S2/S3 in the spec's end-to-end scenarios).
  pub struct ScriptedDetector {
    responses: Mutex<Vec<Vec<Pause>>>,
  }

  impl ScriptedDetector {
    pub fn new(responses: Vec<Vec<Pause>>) -> Self {
      ScriptedDetector { responses: Mutex::new(responses) }
    }
  }

  impl SilenceDetector for ScriptedDetector {
    fn detect(&self, _pcm_wav_path: &Path, _amplitude_threshold: u32, _min_silence_sec: f64) -> Result<Vec<Pause>> {
      let mut responses = self.responses.lock().unwrap();
      if responses.is_empty() {
        return Ok(Vec::new());
      }
      Ok(responses.remove(0))
    }
  }

  pub struct FailingDetector;

  impl SilenceDetector for FailingDetector {
    fn detect(&self, _pcm_wav_path: &Path, _amplitude_threshold: u32, _min_silence_sec: f64) -> Result<Vec<Pause>> {
      Err(PipelineError::Detect { fingerprint: "test".to_string(), message: "simulated detector failure".to_string() })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::WavHeader;
  use tempfile::tempdir;

  fn header() -> WavHeader {
    WavHeader { channels: 1, sample_rate: 1_000, bits_per_sample: 16 }
  }

  #[test]
  fn amplitude_detector_finds_silence_bracketed_by_tone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.wav");
    let header = header();

    let mut pcm = Vec::new();
    pcm.extend(std::iter::repeat_n(5000i16.to_le_bytes(), 100).flatten());
    pcm.extend(std::iter::repeat_n(0i16.to_le_bytes(), 2_000).flatten());
    pcm.extend(std::iter::repeat_n(5000i16.to_le_bytes(), 100).flatten());
    codec::write_wav(&path, &pcm, &header).unwrap();

    let pauses = AmplitudeSilenceDetector.detect(&path, 70, 1.0).unwrap();
    assert_eq!(pauses.len(), 1);
    assert!((pauses[0].start_sec - 0.1).abs() < 0.01);
    assert!((pauses[0].end_sec - 2.1).abs() < 0.01);
  }

  #[test]
  fn amplitude_detector_drops_runs_shorter_than_minimum() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("b.wav");
    let header = header();

    let mut pcm = Vec::new();
    pcm.extend(std::iter::repeat_n(5000i16.to_le_bytes(), 100).flatten());
    pcm.extend(std::iter::repeat_n(0i16.to_le_bytes(), 50).flatten());
    pcm.extend(std::iter::repeat_n(5000i16.to_le_bytes(), 100).flatten());
    codec::write_wav(&path, &pcm, &header).unwrap();

    let pauses = AmplitudeSilenceDetector.detect(&path, 70, 1.0).unwrap();
    assert!(pauses.is_empty());
  }

  #[test]
  fn amplitude_detector_rejects_non_16bit_pcm() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("c.wav");
    let header = WavHeader { channels: 1, sample_rate: 8_000, bits_per_sample: 8 };
    codec::write_wav(&path, &codec::make_silence(0.1, &header), &header).unwrap();

    let err = AmplitudeSilenceDetector.detect(&path, 70, 1.0).unwrap_err();
    assert_eq!(err.kind_name(), "DetectError");
  }
}
