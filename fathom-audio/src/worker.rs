//! Background refill of streaming channels
//!
//! One thread wakes every `worker_period_ms`, refills each registered stream
//! and steps fade-outs. It exits when nothing is left to service and is
//! relaunched by the next registration. In manual mode no thread is spawned
//! and the owner drives [`StreamingWorker::tick`] itself.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::channel::PlaybackChannel;

#[derive(Default)]
struct WorkerState {
    channels: Vec<Arc<PlaybackChannel>>,
    running: bool,
    shutdown: bool,
}

struct WorkerShared {
    state: Mutex<WorkerState>,
    wake: Condvar,
    period: Duration,
}

impl WorkerShared {
    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Service every registered channel once. Returns how many remain.
    fn tick(&self) -> usize {
        let snapshot = self.lock().channels.clone();
        let mut finished = Vec::new();

        for channel in &snapshot {
            if channel.is_fading() && channel.step_fade() {
                finished.push(channel.clone());
                continue;
            }
            let keep = if channel.is_streaming() {
                match channel.service_stream() {
                    Ok(keep) => keep,
                    Err(e) => {
                        error!("Dropping stream of {}: {}", channel.asset().name(), e);
                        false
                    }
                }
            } else {
                channel.is_fading()
            };
            if !keep {
                finished.push(channel.clone());
            }
        }

        let mut state = self.lock();
        if !finished.is_empty() {
            state
                .channels
                .retain(|c| !finished.iter().any(|f| Arc::ptr_eq(c, f)));
        }
        state.channels.len()
    }

    fn run(&self) {
        debug!("Streaming worker started");
        let _guard = PanicGuard(self);
        loop {
            self.tick();

            let state = self.lock();
            if state.shutdown || state.channels.is_empty() {
                let mut state = state;
                state.running = false;
                break;
            }
            let _ = self
                .wake
                .wait_timeout(state, self.period)
                .unwrap_or_else(|e| {
                    warn!("Streaming worker mutex poisoned; continuing");
                    e.into_inner()
                });
        }
        debug!("Streaming worker exited");
    }
}

/// Clears `running` when a tick panics so the next registration relaunches
/// the thread.
struct PanicGuard<'a>(&'a WorkerShared);

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Streaming worker panicked");
            self.0.lock().running = false;
        }
    }
}

/// Owner of the streaming thread and the set of channels it services.
pub struct StreamingWorker {
    shared: Arc<WorkerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    manual: bool,
}

impl StreamingWorker {
    pub fn new(period: Duration) -> Self {
        Self::with_mode(period, false)
    }

    /// A worker that never spawns a thread; call [`tick`](Self::tick) to pump it.
    pub fn manual() -> Self {
        Self::with_mode(Duration::ZERO, true)
    }

    fn with_mode(period: Duration, manual: bool) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                state: Mutex::new(WorkerState::default()),
                wake: Condvar::new(),
                period: period.max(Duration::from_millis(1)),
            }),
            thread: Mutex::new(None),
            manual,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    /// Start servicing `channel`. Registering twice is a no-op.
    pub fn register(&self, channel: Arc<PlaybackChannel>) {
        let mut state = self.shared.lock();
        if state.shutdown {
            drop(state);
            channel.dispose();
            return;
        }
        if !state.channels.iter().any(|c| Arc::ptr_eq(c, &channel)) {
            state.channels.push(channel);
        }
        self.spawn_if_idle(&mut state);
    }

    /// Relaunch the thread if channels are waiting and it is not running.
    pub fn ensure_running(&self) {
        let mut state = self.shared.lock();
        if !state.shutdown && !state.channels.is_empty() {
            self.spawn_if_idle(&mut state);
        }
    }

    fn spawn_if_idle(&self, state: &mut WorkerState) {
        if self.manual || state.running {
            return;
        }
        let mut slot = self.thread.lock().unwrap_or_else(|e| e.into_inner());
        // A previous thread has already cleared `running` and is on its way out
        if let Some(old) = slot.take() {
            let _ = old.join();
        }

        let shared = self.shared.clone();
        match thread::Builder::new()
            .name("audio-stream".into())
            .spawn(move || shared.run())
        {
            Ok(handle) => {
                state.running = true;
                *slot = Some(handle);
            }
            Err(e) => error!("Failed to spawn streaming worker: {}", e),
        }
    }

    /// Service every registered channel once on the calling thread.
    pub fn tick(&self) -> usize {
        self.shared.tick()
    }

    /// Channels currently serviced
    pub fn active_count(&self) -> usize {
        self.shared.lock().channels.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Stop the thread and return the channels it was servicing.
    pub fn shutdown(&self) -> Vec<Arc<PlaybackChannel>> {
        let channels = {
            let mut state = self.shared.lock();
            state.shutdown = true;
            std::mem::take(&mut state.channels)
        };
        self.shared.wake.notify_all();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("Streaming worker panicked");
        }
        channels
    }
}

impl Drop for StreamingWorker {
    fn drop(&mut self) {
        for channel in self.shutdown() {
            channel.dispose();
        }
    }
}
