//! Buffer-queue rotation for streaming channels

use std::collections::VecDeque;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::asset::{MuffleFilter, Pulled, StreamKind, StreamReader, peak_amplitude};
use crate::config::STREAM_BUFFER_COUNT;
use crate::device::{AudioDevice, BufferId, SourceId, SourceState};
use crate::error::Result;

/// Private buffer set and cursor of one streaming channel.
///
/// Buffers are either free (owned here, not queued) or queued on the source.
/// Every refill first reclaims the buffers the hardware has finished with,
/// then fills free buffers one chunk at a time until the reader runs dry.
pub(crate) struct StreamState {
    reader: StreamReader,
    kind: StreamKind,
    buffers: [BufferId; STREAM_BUFFER_COUNT],
    free: SmallVec<[BufferId; STREAM_BUFFER_COUNT]>,
    /// Queued buffers in play order with the peak amplitude of their chunk
    queued: VecDeque<(BufferId, f32)>,
    chunk: Vec<i16>,
    channels: u16,
    sample_rate: u32,
    reached_end: bool,
    misses: u32,
    miss_threshold: u32,
    amplitude: f32,
    filter: MuffleFilter,
    filtering: bool,
}

impl StreamState {
    /// Allocate the buffer set. Buffers already created are released on failure.
    pub fn new(
        device: &dyn AudioDevice,
        reader: StreamReader,
        channels: u16,
        sample_rate: u32,
        chunk_samples: usize,
        miss_threshold: u32,
    ) -> Result<Self> {
        let mut created: SmallVec<[BufferId; STREAM_BUFFER_COUNT]> = SmallVec::new();
        for _ in 0..STREAM_BUFFER_COUNT {
            match device.create_buffer() {
                Ok(buffer) => created.push(buffer),
                Err(e) => {
                    for buffer in created {
                        let _ = device.delete_buffer(buffer);
                    }
                    return Err(e.into());
                }
            }
        }
        let buffers = [created[0], created[1], created[2], created[3]];

        Ok(Self {
            kind: reader.kind(),
            reader,
            buffers,
            // Popped from the back, so the first buffer is filled first
            free: buffers.iter().rev().copied().collect(),
            queued: VecDeque::with_capacity(STREAM_BUFFER_COUNT),
            chunk: vec![0; chunk_samples.max(1)],
            channels,
            sample_rate,
            reached_end: false,
            misses: 0,
            miss_threshold: miss_threshold.max(1),
            amplitude: 0.0,
            filter: MuffleFilter::new(sample_rate, channels),
            filtering: false,
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn reached_end(&self) -> bool {
        self.reached_end
    }

    pub fn end(&mut self) {
        self.reached_end = true;
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// Move the reader. Already queued chunks still play out.
    pub fn seek(&mut self, frame: u64) -> Result<()> {
        self.filter.reset();
        self.reader.seek(frame)
    }

    /// Samples per chunk
    pub fn chunk_samples(&self) -> usize {
        self.chunk.len()
    }

    /// Ended and the hardware has played out everything queued
    pub fn drained(&self, device: &dyn AudioDevice, source: SourceId) -> bool {
        self.reached_end && !matches!(device.source_state(source), Ok(SourceState::Playing))
    }

    /// Reclaim consumed buffers, fill them with fresh chunks and restart a
    /// stalled source.
    pub fn refill(
        &mut self,
        device: &dyn AudioDevice,
        source: SourceId,
        muffled: bool,
        looping: bool,
    ) -> Result<()> {
        if self.reached_end {
            return Ok(());
        }

        for buffer in device.unqueue_processed(source)? {
            if let Some(at) = self.queued.iter().position(|(b, _)| *b == buffer) {
                self.queued.remove(at);
            }
            self.free.push(buffer);
        }

        if muffled != self.filtering {
            self.filter.reset();
            self.filtering = muffled;
        }

        let mut got_data = false;
        while let Some(&buffer) = self.free.last() {
            let n = match self.reader.pull(&mut self.chunk)? {
                Pulled::Missing => {
                    if self.kind == StreamKind::Network {
                        self.amplitude *= 0.5;
                        self.misses += 1;
                        if self.misses >= self.miss_threshold {
                            debug!(misses = self.misses, "Voice stream timed out");
                            self.reached_end = true;
                        }
                    }
                    break;
                }
                Pulled::Data(n) => n,
            };
            self.misses = 0;

            if self.kind == StreamKind::Reliable && n < self.chunk.len() {
                if looping {
                    self.reader.rewind()?;
                } else {
                    self.reached_end = true;
                }
            }

            if n > 0 {
                let data = &mut self.chunk[..n];
                if self.filtering {
                    self.filter.apply(data);
                }
                device.buffer_data(buffer, data, self.channels, self.sample_rate)?;
                device.queue_buffer(source, buffer)?;
                self.free.pop();
                self.queued.push_back((buffer, peak_amplitude(data)));
                got_data = true;
            }

            // An empty looping stream would otherwise spin on rewind
            if self.reached_end || n == 0 {
                break;
            }
        }

        if got_data && let Some((_, amplitude)) = self.queued.front() {
            self.amplitude = *amplitude;
        }

        if !self.queued.is_empty() && device.source_state(source)? != SourceState::Playing {
            trace!(queued = self.queued.len(), "Restarting stalled stream");
            device.play(source)?;
        }
        Ok(())
    }

    /// Delete the buffer set. The source must already be unbound.
    pub fn release(self, device: &dyn AudioDevice) {
        for buffer in self.buffers {
            if let Err(e) = device.delete_buffer(buffer) {
                warn!("Failed to delete stream buffer {:?}: {}", buffer, e);
            }
        }
    }
}
