// ------------------------------------------------------------------
//  PCM Codec (C1)
// ------------------------------------------------------------------
//
// Hand-rolled RIFF/WAVE chunk walker, in the style of the teacher's
// `stream_wav16le_over_http` (manual `fmt `/`data` chunk scanning over
// a byte stream rather than a third-party WAV crate). We keep full
// control over what counts as "linear PCM" and over 8-bit unsigned
// silence generation, which a canned WAV reader would hide from us.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{PipelineError, Result};

pub const WAV_HEADER_SIZE: u64 = 44;

/// The subset of WAV format fields the pipeline cares about. Every
/// artifact used within one job must share one of these (invariant I1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
  pub channels: u16,
  pub sample_rate: u32,
  pub bits_per_sample: u16,
}

impl Default for WavHeader {
  fn default() -> Self {
    WavHeader { channels: 1, sample_rate: 22_050, bits_per_sample: 16 }
  }
}

impl WavHeader {
  pub fn bytes_per_frame(&self) -> usize {
    self.channels as usize * (self.bits_per_sample as usize / 8)
  }

  fn is_unsigned_8bit(&self) -> bool {
    self.bits_per_sample == 8
  }
}

/// Read just the header of a RIFF/WAVE file, validating it is linear PCM.
pub fn read_header(path: &Path) -> Result<WavHeader> {
  let file = File::open(path).map_err(|source| PipelineError::Input { path: path.to_path_buf(), source })?;
  let mut reader = BufReader::new(file);
  let (header, _data_len) = read_riff_fmt(&mut reader, path)?;
  Ok(header)
}

/// Read the full PCM payload (header stripped) of a RIFF/WAVE file.
pub fn read_frames(path: &Path) -> Result<Vec<u8>> {
  let file = File::open(path).map_err(|source| PipelineError::Input { path: path.to_path_buf(), source })?;
  let mut reader = BufReader::new(file);
  let (_header, data_len) = read_riff_fmt(&mut reader, path)?;
  let mut data = vec![0u8; data_len as usize];
  reader
    .read_exact(&mut data)
    .map_err(|source| PipelineError::Input { path: path.to_path_buf(), source })?;
  Ok(data)
}

/// Read both the header and frames in one pass.
pub fn read_wav(path: &Path) -> Result<(WavHeader, Vec<u8>)> {
  let file = File::open(path).map_err(|source| PipelineError::Input { path: path.to_path_buf(), source })?;
  let mut reader = BufReader::new(file);
  let (header, data_len) = read_riff_fmt(&mut reader, path)?;
  let mut data = vec![0u8; data_len as usize];
  reader
    .read_exact(&mut data)
    .map_err(|source| PipelineError::Input { path: path.to_path_buf(), source })?;
  Ok((header, data))
}

fn read_riff_fmt(reader: &mut impl Read, path: &Path) -> Result<(WavHeader, u32)> {
  let mut riff = [0u8; 12];
  reader
    .read_exact(&mut riff)
    .map_err(|_| PipelineError::Format { context: format!("{}: truncated before RIFF header", path.display()) })?;
  if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
    return Err(PipelineError::Format { context: format!("{}: not a RIFF/WAVE file", path.display()) });
  }

  let mut channels: u16 = 0;
  let mut sample_rate: u32 = 0;
  let mut bits_per_sample: u16 = 0;
  let mut saw_fmt = false;

  loop {
    let mut hdr = [0u8; 8];
    if reader.read_exact(&mut hdr).is_err() {
      return Err(PipelineError::Format { context: format!("{}: missing data chunk", path.display()) });
    }
    let id = &hdr[0..4];
    let size = u32::from_le_bytes(hdr[4..8].try_into().unwrap());

    if id == b"fmt " {
      let mut fmt = vec![0u8; size as usize];
      reader
        .read_exact(&mut fmt)
        .map_err(|_| PipelineError::Format { context: format!("{}: truncated fmt chunk", path.display()) })?;
      if fmt.len() < 16 {
        return Err(PipelineError::Format { context: format!("{}: fmt chunk too small", path.display()) });
      }
      let audio_format = u16::from_le_bytes([fmt[0], fmt[1]]);
      channels = u16::from_le_bytes([fmt[2], fmt[3]]);
      sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
      bits_per_sample = u16::from_le_bytes([fmt[14], fmt[15]]);
      if audio_format != 1 {
        return Err(PipelineError::Format {
          context: format!("{}: unsupported WAV format {audio_format}, need linear PCM (1)", path.display()),
        });
      }
      saw_fmt = true;
    } else if id == b"data" {
      if !saw_fmt {
        return Err(PipelineError::Format { context: format!("{}: data chunk before fmt chunk", path.display()) });
      }
      return Ok((WavHeader { channels, sample_rate, bits_per_sample }, size));
    } else {
      let mut skip = vec![0u8; size as usize];
      reader
        .read_exact(&mut skip)
        .map_err(|_| PipelineError::Format { context: format!("{}: truncated {:?} chunk", path.display(), id) })?;
    }

    if size % 2 == 1 {
      let mut pad = [0u8; 1];
      reader
        .read_exact(&mut pad)
        .map_err(|_| PipelineError::Format { context: format!("{}: truncated chunk padding", path.display()) })?;
    }
  }
}

/// Write a complete RIFF/WAVE file from raw PCM frames and a header.
pub fn write_wav(path: &Path, frames: &[u8], header: &WavHeader) -> Result<()> {
  let file = File::create(path).map_err(PipelineError::Io)?;
  let mut w = BufWriter::new(file);

  let byte_rate = header.sample_rate * header.channels as u32 * (header.bits_per_sample as u32 / 8);
  let block_align = header.bytes_per_frame() as u16;
  let data_len = frames.len() as u32;
  let riff_len = 36 + data_len;

  w.write_all(b"RIFF")?;
  w.write_all(&riff_len.to_le_bytes())?;
  w.write_all(b"WAVE")?;

  w.write_all(b"fmt ")?;
  w.write_all(&16u32.to_le_bytes())?;
  w.write_all(&1u16.to_le_bytes())?; // PCM
  w.write_all(&header.channels.to_le_bytes())?;
  w.write_all(&header.sample_rate.to_le_bytes())?;
  w.write_all(&byte_rate.to_le_bytes())?;
  w.write_all(&block_align.to_le_bytes())?;
  w.write_all(&header.bits_per_sample.to_le_bytes())?;

  w.write_all(b"data")?;
  w.write_all(&data_len.to_le_bytes())?;
  w.write_all(frames)?;
  w.flush()?;
  Ok(())
}

/// Byte count for a duration, aligned down to a whole frame.
pub fn frames_for_duration(sec: f64, header: &WavHeader) -> usize {
  if sec <= 0.0 {
    return 0;
  }
  let bpf = header.bytes_per_frame();
  let raw_bytes = (sec * header.sample_rate as f64 * bpf as f64).floor() as usize;
  raw_bytes - (raw_bytes % bpf)
}

/// Integer millisecond duration for a byte count, floored.
pub fn duration_ms_for_bytes(bytes: usize, header: &WavHeader) -> u64 {
  let bpf = header.bytes_per_frame();
  if bpf == 0 || header.sample_rate == 0 {
    return 0;
  }
  let frames = bytes / bpf;
  (frames as u128 * 1000 / header.sample_rate as u128) as u64
}

/// Generate silence: zero-filled for signed PCM, midpoint-filled (0x80) for
/// unsigned 8-bit. Duration is rounded to the nearest whole frame.
pub fn make_silence(duration_sec: f64, header: &WavHeader) -> Vec<u8> {
  let len = frames_for_duration(duration_sec.max(0.0), header);
  if header.is_unsigned_8bit() {
    vec![0x80u8; len]
  } else {
    vec![0u8; len]
  }
}

/// Clip and frame-align a `[start_sec, end_sec)` window onto a PCM buffer.
pub fn slice_window<'a>(pcm: &'a [u8], start_sec: f64, end_sec: f64, header: &WavHeader) -> &'a [u8] {
  let bpf = header.bytes_per_frame();
  if bpf == 0 {
    return &[];
  }
  let start = frames_for_duration(start_sec.max(0.0), header).min(pcm.len());
  let end = frames_for_duration(end_sec.max(0.0), header).min(pcm.len());
  if end <= start {
    return &[];
  }
  &pcm[start..end]
}
