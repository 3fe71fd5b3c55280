//! Audio output: cpal stream fed by a render thread
//!
//! ```text
//! Engine / Worker            Render Thread                cpal Thread
//!       │                          │                          │
//! [source + buffer calls]          │                          │
//!       └──►SoftwareDevice◄──[render block]                   │
//!                                  [push]───────(ring)──────►[pop, convert]
//!                                    ▲                        │
//!                                    └──────(condvar)─────────┘
//! ```
//!
//! The render thread keeps the ring topped up and sleeps on a condvar that
//! the cpal callback signals after every pop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info, warn};

use crate::device::SoftwareDevice;
use crate::error::{AudioError, Result};

/// Ring size in stereo samples (~100 ms at 44.1 kHz)
const RING_BUFFER_SIZE: usize = 8820;

/// Frames rendered per block
const RENDER_BLOCK_FRAMES: usize = 256;

/// Find a device by exact name, or the host default when `name` is `None`.
pub(crate) fn find_device(host: &cpal::Host, name: Option<&str>, input: bool) -> Option<cpal::Device> {
    let Some(name) = name else {
        return if input {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
    };
    let mut devices = if input {
        host.input_devices().ok()?.collect::<Vec<_>>()
    } else {
        host.output_devices().ok()?.collect::<Vec<_>>()
    };
    let index = devices
        .iter()
        .position(|d| d.name().is_ok_and(|n| n == name))?;
    Some(devices.swap_remove(index))
}

/// Names of every output device on the default host
pub fn output_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceOpen(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

struct RenderHandle {
    shutdown: Arc<AtomicBool>,
    wake: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl RenderHandle {
    fn spawn(device: Arc<SoftwareDevice>, mut producer: HeapProd<f32>, sample_rate: u32) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let wake = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_shutdown = shutdown.clone();
        let thread_wake = wake.clone();

        let thread = thread::Builder::new()
            .name("audio-render".into())
            .spawn(move || {
                debug!("Render thread started at {}Hz", sample_rate);
                let mut block = vec![0.0f32; RENDER_BLOCK_FRAMES * 2];
                while !thread_shutdown.load(Ordering::Acquire) {
                    while producer.vacant_len() >= block.len() {
                        device.render(&mut block, sample_rate);
                        producer.push_slice(&block);
                    }

                    let (lock, cvar) = &*thread_wake;
                    let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
                    let _ = cvar
                        .wait_timeout(guard, Duration::from_millis(5))
                        .unwrap_or_else(|e| e.into_inner());
                }
                debug!("Render thread finished");
            })
            .map_err(|e| AudioError::DeviceOpen(format!("failed to spawn render thread: {e}")))?;

        Ok(Self {
            shutdown,
            wake,
            thread: Some(thread),
        })
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.1.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Copy stereo frames from the ring into a device buffer of any channel count.
fn write_output<T: Copy>(
    data: &mut [T],
    channels: usize,
    consumer: &mut HeapCons<f32>,
    scratch: &mut Vec<f32>,
    convert: impl Fn(f32) -> T,
) {
    let frames = data.len() / channels;
    if scratch.len() < frames * 2 {
        scratch.resize(frames * 2, 0.0);
    }
    let stereo = &mut scratch[..frames * 2];
    let popped = consumer.pop_slice(stereo);
    stereo[popped..].fill(0.0);

    for (frame, lr) in data.chunks_mut(channels).zip(stereo.chunks_exact(2)) {
        if channels == 1 {
            frame[0] = convert((lr[0] + lr[1]) * 0.5);
        } else {
            frame[0] = convert(lr[0]);
            frame[1] = convert(lr[1]);
            frame[2..].fill(convert(0.0));
        }
    }
}

/// Output stream playing a [`SoftwareDevice`] on a real sound card.
pub struct DeviceOutput {
    _render: RenderHandle,
    _stream: cpal::Stream,
    sample_rate: u32,
    device_name: String,
}

impl DeviceOutput {
    /// Open `preferred` (or the host default). On failure, retry once
    /// against the host default before giving up.
    pub fn open(device: Arc<SoftwareDevice>, preferred: Option<&str>) -> Result<Self> {
        match Self::open_on(device.clone(), preferred) {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!("Failed to open audio output ({}); retrying with default device", e);
                Self::open_on(device, None)
            }
        }
    }

    fn open_on(device: Arc<SoftwareDevice>, name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let output = find_device(&host, name, false).ok_or_else(|| {
            AudioError::DeviceOpen(match name {
                Some(name) => format!("no output device named '{name}'"),
                None => "no audio output device available".to_string(),
            })
        })?;
        let device_name = output.name().unwrap_or_else(|_| "unknown".to_string());

        let config = output
            .default_output_config()
            .map_err(|e| AudioError::DeviceOpen(format!("failed to get output config: {e}")))?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels().max(1) as usize;
        let sample_format = config.sample_format();
        let stream_config: cpal::StreamConfig = config.into();

        let ring = HeapRb::<f32>::new(RING_BUFFER_SIZE);
        let (producer, mut consumer) = ring.split();

        let render = RenderHandle::spawn(device.clone(), producer, sample_rate)?;
        let wake = render.wake.clone();
        let error_device = device.clone();
        let on_error = move |err: cpal::StreamError| {
            error!("Audio stream error: {}", err);
            error_device.mark_disconnected();
        };
        let mut scratch: Vec<f32> = vec![0.0; 4096];

        let stream = match sample_format {
            cpal::SampleFormat::F32 => output.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    write_output(data, channels, &mut consumer, &mut scratch, |s| s);
                    wake.1.notify_one();
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::I16 => output.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    write_output(data, channels, &mut consumer, &mut scratch, |s| {
                        (s * 32767.0).clamp(-32768.0, 32767.0) as i16
                    });
                    wake.1.notify_one();
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::U16 => output.build_output_stream(
                &stream_config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    write_output(data, channels, &mut consumer, &mut scratch, |s| {
                        (s * 32767.0 + 32768.0).clamp(0.0, 65535.0) as u16
                    });
                    wake.1.notify_one();
                },
                on_error,
                None,
            ),
            other => {
                return Err(AudioError::DeviceOpen(format!(
                    "unsupported sample format: {other:?}"
                )));
            }
        }
        .map_err(|e| AudioError::DeviceOpen(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| AudioError::DeviceOpen(format!("failed to start output stream: {e}")))?;

        info!(
            "Audio output '{}' started at {}Hz, {} channels",
            device_name, sample_rate, channels
        );

        Ok(Self {
            _render: render,
            _stream: stream,
            sample_rate,
            device_name,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}
