//! File decoding: Ogg Vorbis via lewton, WAV via hound
//!
//! Both formats decode to interleaved 16-bit PCM. [`FileDecoder`] reads
//! incrementally for streaming channels; [`decode_file`] drains it for
//! buffered assets.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader};
use lewton::inside_ogg::OggStreamReader;
use tracing::debug;

use super::MAX_SAMPLE_RATE;
use crate::error::{AudioError, Result};

/// Fully decoded audio
pub(crate) struct DecodedAudio {
    pub samples: Vec<i16>,
    pub channels: u16,
    pub sample_rate: u32,
}

enum Backend {
    Vorbis {
        reader: OggStreamReader<BufReader<File>>,
        pending: Vec<i16>,
        pending_pos: usize,
    },
    Wav {
        reader: WavReader<BufReader<File>>,
        format: SampleFormat,
        bits: u16,
    },
}

/// Incremental decoder over a sound file.
pub(crate) struct FileDecoder {
    path: PathBuf,
    channels: u16,
    sample_rate: u32,
    /// Frames handed out since the last seek
    position: u64,
    backend: Backend,
}

fn malformed(path: &Path, reason: impl ToString) -> AudioError {
    AudioError::MalformedAsset {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl FileDecoder {
    /// Open a `.ogg` or `.wav` file. Format is chosen by extension.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AudioError::AssetNotFound(path.to_path_buf()));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let (backend, channels, sample_rate) = match extension.as_str() {
            "ogg" => {
                let file = File::open(path)?;
                let reader =
                    OggStreamReader::new(BufReader::new(file)).map_err(|e| malformed(path, e))?;
                let channels = reader.ident_hdr.audio_channels as u16;
                let sample_rate = reader.ident_hdr.audio_sample_rate;
                let backend = Backend::Vorbis {
                    reader,
                    pending: Vec::new(),
                    pending_pos: 0,
                };
                (backend, channels, sample_rate)
            }
            "wav" => {
                let reader = WavReader::open(path).map_err(|e| malformed(path, e))?;
                let spec = reader.spec();
                if spec.sample_format == SampleFormat::Int && !(8..=32).contains(&spec.bits_per_sample)
                {
                    return Err(malformed(path, format!("{}-bit PCM", spec.bits_per_sample)));
                }
                let backend = Backend::Wav {
                    reader,
                    format: spec.sample_format,
                    bits: spec.bits_per_sample,
                };
                (backend, spec.channels, spec.sample_rate)
            }
            _ => return Err(AudioError::UnsupportedFormat(path.to_path_buf())),
        };

        if !(1..=2).contains(&channels) {
            return Err(malformed(path, format!("{channels} channels (mono or stereo only)")));
        }
        if !(1..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(malformed(path, format!("unsupported sample rate {sample_rate} Hz")));
        }

        debug!(
            "Opened {} ({} ch, {} Hz)",
            path.display(),
            channels,
            sample_rate
        );

        Ok(Self {
            path: path.to_path_buf(),
            channels,
            sample_rate,
            position: 0,
            backend,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current read position in frames
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Fill `out` with interleaved samples. Only whole frames are written.
    ///
    /// Returns the number of samples written; fewer than fit in `out` means
    /// the end of the file was reached.
    pub fn read(&mut self, out: &mut [i16]) -> Result<usize> {
        let ch = self.channels as usize;
        let want = out.len() - out.len() % ch;
        let path = &self.path;

        let written = match &mut self.backend {
            Backend::Vorbis {
                reader,
                pending,
                pending_pos,
            } => {
                let mut written = 0;
                while written < want {
                    if *pending_pos < pending.len() {
                        let n = (pending.len() - *pending_pos).min(want - written);
                        out[written..written + n]
                            .copy_from_slice(&pending[*pending_pos..*pending_pos + n]);
                        *pending_pos += n;
                        written += n;
                        continue;
                    }
                    match reader.read_dec_packet_itl().map_err(|e| malformed(path, e))? {
                        Some(packet) => {
                            *pending = packet;
                            *pending_pos = 0;
                        }
                        None => break,
                    }
                }
                written
            }
            Backend::Wav {
                reader,
                format,
                bits,
            } => read_wav(reader, *format, *bits, &mut out[..want]).map_err(|e| malformed(path, e))?,
        };

        self.position += (written / ch) as u64;
        Ok(written)
    }

    /// Move the read position to `frame` (page accuracy for Vorbis).
    pub fn seek(&mut self, frame: u64) -> Result<()> {
        let path = &self.path;
        match &mut self.backend {
            Backend::Vorbis {
                reader,
                pending,
                pending_pos,
            } => {
                reader.seek_absgp_pg(frame).map_err(|e| malformed(path, e))?;
                pending.clear();
                *pending_pos = 0;
            }
            Backend::Wav { reader, .. } => {
                let frame = frame.min(reader.duration() as u64) as u32;
                reader.seek(frame)?;
            }
        }
        self.position = frame;
        Ok(())
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.seek(0)
    }
}

fn read_wav(
    reader: &mut WavReader<BufReader<File>>,
    format: SampleFormat,
    bits: u16,
    out: &mut [i16],
) -> std::result::Result<usize, hound::Error> {
    let mut written = 0;
    match format {
        SampleFormat::Float => {
            for sample in reader.samples::<f32>().take(out.len()) {
                out[written] = (sample? * 32767.0).clamp(-32768.0, 32767.0) as i16;
                written += 1;
            }
        }
        SampleFormat::Int if bits <= 16 => {
            let shift = 16 - bits as u32;
            for sample in reader.samples::<i16>().take(out.len()) {
                out[written] = sample? << shift;
                written += 1;
            }
        }
        SampleFormat::Int => {
            let shift = bits as u32 - 16;
            for sample in reader.samples::<i32>().take(out.len()) {
                out[written] = (sample? >> shift) as i16;
                written += 1;
            }
        }
    }
    Ok(written)
}

/// Decode a whole file into memory.
pub(crate) fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let mut decoder = FileDecoder::open(path)?;
    let mut samples = Vec::new();
    let mut chunk = vec![0i16; 16 * 1024];
    loop {
        let n = decoder.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        samples.extend_from_slice(&chunk[..n]);
    }

    Ok(DecodedAudio {
        samples,
        channels: decoder.channels(),
        sample_rate: decoder.sample_rate(),
    })
}
