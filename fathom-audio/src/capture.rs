//! Microphone input
//!
//! [`CaptureDevice`] is a non-blocking source of mono 16-bit samples.
//! [`CpalCapture`] implements it over a cpal input stream: the cpal callback
//! downmixes into a ring buffer and `read` drains whatever has arrived.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info, warn};

use crate::error::{AudioError, Result};
use crate::output::find_device;

/// Captured samples buffered between the callback and the reader (~0.5 s at 48 kHz)
const CAPTURE_RING_SIZE: usize = 24_000;

/// Non-blocking mono microphone source.
pub trait CaptureDevice: Send {
    fn sample_rate(&self) -> u32;

    /// Copy up to `out.len()` captured samples; returns how many were available.
    fn read(&mut self, out: &mut [i16]) -> usize;
}

/// Names of every input device on the default host
pub fn input_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::DeviceOpen(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// cpal-backed microphone.
///
/// The cpal stream lives on a small keep-alive thread so the capture handle
/// itself stays `Send` on every platform.
pub struct CpalCapture {
    consumer: HeapCons<i16>,
    sample_rate: u32,
    device_name: String,
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalCapture {
    /// Open `preferred` (or the default input) asking for `sample_rate`.
    /// Falls back once to the host default device.
    pub fn open(preferred: Option<&str>, sample_rate: u32) -> Result<Self> {
        match Self::open_on(preferred, sample_rate) {
            Ok(capture) => Ok(capture),
            Err(e) => {
                warn!("Failed to open capture device ({}); retrying with default device", e);
                Self::open_on(None, sample_rate)
            }
        }
    }

    fn open_on(name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let ring = HeapRb::<i16>::new(CAPTURE_RING_SIZE);
        let (producer, consumer) = ring.split();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(u32, String)>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let name = name.map(str::to_string);

        let thread = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || match build_input_stream(name.as_deref(), sample_rate, producer) {
                Ok((stream, rate, device_name)) => {
                    let _ = ready_tx.send(Ok((rate, device_name)));
                    // Blocks until the handle drops its sender
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("Capture stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| AudioError::DeviceOpen(format!("failed to spawn capture thread: {e}")))?;

        let (rate, device_name) = ready_rx
            .recv()
            .map_err(|_| AudioError::DeviceOpen("capture thread exited".into()))??;

        if rate != sample_rate {
            warn!(
                "Capture device '{}' runs at {}Hz, voice expects {}Hz",
                device_name, rate, sample_rate
            );
        }
        info!("Capture device '{}' opened at {}Hz", device_name, rate);

        Ok(Self {
            consumer,
            sample_rate: rate,
            device_name,
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl CaptureDevice for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, out: &mut [i16]) -> usize {
        self.consumer.pop_slice(out)
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Average interleaved frames down to mono i16 and push them into the ring.
fn push_mono<T: Copy>(
    data: &[T],
    channels: usize,
    producer: &mut HeapProd<i16>,
    scratch: &mut Vec<i16>,
    to_f32: impl Fn(T) -> f32,
) {
    scratch.clear();
    for frame in data.chunks_exact(channels) {
        let sum: f32 = frame.iter().map(|s| to_f32(*s)).sum();
        let mono = sum / channels as f32;
        scratch.push((mono * 32767.0).clamp(-32768.0, 32767.0) as i16);
    }
    let pushed = producer.push_slice(scratch);
    if pushed < scratch.len() {
        debug!("Capture ring full: dropped {} samples", scratch.len() - pushed);
    }
}

fn build_input_stream(
    name: Option<&str>,
    sample_rate: u32,
    mut producer: HeapProd<i16>,
) -> Result<(cpal::Stream, u32, String)> {
    let host = cpal::default_host();
    let device = find_device(&host, name, true).ok_or_else(|| {
        AudioError::DeviceOpen(match name {
            Some(name) => format!("no input device named '{name}'"),
            None => "no audio input device available".to_string(),
        })
    })?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

    // Prefer a config that runs at the voice rate; otherwise take the default
    let wanted = cpal::SampleRate(sample_rate);
    let config = device
        .supported_input_configs()
        .ok()
        .and_then(|mut configs| {
            configs.find(|c| c.min_sample_rate() <= wanted && wanted <= c.max_sample_rate())
        })
        .map(|c| c.with_sample_rate(wanted));
    let config = match config {
        Some(config) => config,
        None => device
            .default_input_config()
            .map_err(|e| AudioError::DeviceOpen(format!("failed to get input config: {e}")))?,
    };

    let rate = config.sample_rate().0;
    let channels = config.channels().max(1) as usize;
    let sample_format = config.sample_format();
    let stream_config: cpal::StreamConfig = config.into();
    let on_error = |err: cpal::StreamError| error!("Capture stream error: {}", err);
    let mut scratch: Vec<i16> = Vec::with_capacity(4096);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                push_mono(data, channels, &mut producer, &mut scratch, |s| s);
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                push_mono(data, channels, &mut producer, &mut scratch, |s| s as f32 / 32768.0);
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                push_mono(data, channels, &mut producer, &mut scratch, |s| {
                    (s as f32 - 32768.0) / 32768.0
                });
            },
            on_error,
            None,
        ),
        other => {
            return Err(AudioError::DeviceOpen(format!(
                "unsupported capture format: {other:?}"
            )));
        }
    }
    .map_err(|e| AudioError::DeviceOpen(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| AudioError::DeviceOpen(format!("failed to start input stream: {e}")))?;

    Ok((stream, rate, device_name))
}
