//! Capture Hub: owns every stream, coordinates pause/flush, and mediates
//! the pause/flush state machine. The source's globals (`G_CAPTURE`,
//! `pause`, the exit flag, the config roots) collapse into this single
//! value, threaded explicitly into every worker; only the signal thread
//! holds a narrow `Arc` to its flags.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::capture::{AudioSource, FrameSource, Resampler};
use crate::config::Config;
use crate::error::Result;
use crate::flush;
use crate::output::generate_output_filename;
use crate::stream::video::{build_turn_tokens, VideoWorker};
use crate::stream::{AudioStream, VideoStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Initializing,
    Ready,
    Running,
    Flushing,
    Terminating,
}

pub struct CaptureHub {
    state: Mutex<HubState>,
    pause: Arc<AtomicBool>,
    exit: Arc<AtomicBool>,
    workers_ready: AtomicUsize,
    total_workers: usize,
    cfg: Config,
    video: Arc<VideoStream>,
    audio: Vec<Arc<AudioStream>>,
    flush_lock: Mutex<()>,
}

impl CaptureHub {
    /// `pause`/`exit` must be the same `Arc`s every stream and worker was
    /// built with — the Hub does not own a second copy of the flags, it
    /// mediates the one the streams already share.
    pub fn new(
        cfg: Config,
        video: Arc<VideoStream>,
        audio: Vec<Arc<AudioStream>>,
        total_workers: usize,
        pause: Arc<AtomicBool>,
        exit: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state: Mutex::new(HubState::Initializing),
            pause,
            exit,
            workers_ready: AtomicUsize::new(0),
            total_workers,
            cfg,
            video,
            audio,
            flush_lock: Mutex::new(()),
        }
    }

    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        self.pause.clone()
    }

    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        self.exit.clone()
    }

    pub fn video_stream(&self) -> &Arc<VideoStream> {
        &self.video
    }

    pub fn audio_streams(&self) -> &[Arc<AudioStream>] {
        &self.audio
    }

    pub fn state(&self) -> HubState {
        *self.state.lock().unwrap()
    }

    /// Called once by each worker after its shared-memory/converter (or
    /// device) resources are live. `Initializing -> Ready` once every worker
    /// has reported in; `Ready -> Running` follows immediately by clearing
    /// `pause`.
    pub fn mark_worker_ready(&self) {
        let ready = self.workers_ready.fetch_add(1, Ordering::AcqRel) + 1;
        if ready == self.total_workers {
            *self.state.lock().unwrap() = HubState::Ready;
            self.pause.store(false, Ordering::Release);
            *self.state.lock().unwrap() = HubState::Running;
            log::info!("all {} workers ready, capture running", self.total_workers);
        }
    }

    /// `save(path)`: sets `pause`, waits for workers to park, drains every
    /// stream into a freshly-built muxer/encoder set, then clears `pause`.
    /// Reentrant-safe to call from the signal thread: the heavy lifting runs
    /// here rather than inside an actual signal handler.
    pub fn request_flush(&self) {
        let _serialize = self.flush_lock.lock().unwrap();
        *self.state.lock().unwrap() = HubState::Flushing;
        self.pause.store(true, Ordering::Release);
        // Spin briefly to let all workers park at the top of their loops.
        std::thread::sleep(std::time::Duration::from_millis(20));

        let path = match generate_output_filename(&self.cfg) {
            Ok(p) => p,
            Err(e) => {
                log::error!("failed to build output filename: {e}");
                self.resume_after_flush();
                return;
            }
        };

        match self.run_flush(&path) {
            Ok(()) => log::info!("flush complete: {}", path.display()),
            Err(e) => log::error!("flush failed for {}: {e}", path.display()),
        }

        self.resume_after_flush();
    }

    fn run_flush(&self, path: &PathBuf) -> Result<()> {
        flush::flush(path, &self.cfg, &self.video, &self.audio)
    }

    fn resume_after_flush(&self) {
        self.pause.store(false, Ordering::Release);
        *self.state.lock().unwrap() = HubState::Running;
    }

    /// Termination signal: cooperative exit flag, observed by every worker
    /// at the top of its loop.
    pub fn request_shutdown(&self) {
        *self.state.lock().unwrap() = HubState::Terminating;
        self.exit.store(true, Ordering::Release);
        // Unstick anything parked in the pause spin.
        self.pause.store(false, Ordering::Release);
    }
}

/// Spawns the N video workers of a stream's Worker Ring and returns their
/// join handles. `make_source` constructs each worker's private Frame
/// Source (its own display connection/shared-memory segment).
pub fn spawn_video_workers(
    hub: &Arc<CaptureHub>,
    n: usize,
    mut make_source: impl FnMut(usize) -> Result<Box<dyn FrameSource>>,
) -> Result<Vec<JoinHandle<()>>> {
    let (mut receivers, senders) = build_turn_tokens(n);
    let mut handles = Vec::with_capacity(n);

    for id in 0..n {
        let source = make_source(id)?;
        let my_token = receivers.remove(0);
        let next_token = senders[(id + 1) % n].clone();
        let stream = hub.video_stream().clone();
        let hub_for_thread = hub.clone();

        let mut worker = VideoWorker::new(
            id,
            source,
            stream.src_width,
            stream.src_height,
            stream.dst_width,
            stream.dst_height,
            my_token,
            next_token,
        )?;

        let handle = std::thread::Builder::new()
            .name(format!("spotlight-video-{id}"))
            .spawn(move || {
                hub_for_thread.mark_worker_ready();
                if let Err(e) = worker.run(&stream) {
                    log::error!("video worker {id} terminated: {e}");
                }
            })
            .map_err(|e| crate::error::SpotlightError::Resource(e.to_string()))?;
        handles.push(handle);
    }

    Ok(handles)
}

/// Spawns one audio worker per configured device.
pub fn spawn_audio_workers(
    hub: &Arc<CaptureHub>,
    mut make_source: impl FnMut(usize) -> Result<(Box<dyn AudioSource>, Resampler)>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(hub.audio_streams().len());

    for (idx, stream) in hub.audio_streams().iter().cloned().enumerate() {
        let (mut source, mut resampler) = make_source(idx)?;
        let hub_for_thread = hub.clone();

        let handle = std::thread::Builder::new()
            .name(format!("spotlight-audio-{idx}"))
            .spawn(move || {
                hub_for_thread.mark_worker_ready();
                if let Err(e) = crate::stream::audio::run_audio_worker(&stream, &mut source, &mut resampler) {
                    log::error!("audio worker {idx} terminated: {e}");
                }
            })
            .map_err(|e| crate::error::SpotlightError::Resource(e.to_string()))?;
        handles.push(handle);
    }

    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame_source::SyntheticFrameSource;
    use std::sync::atomic::Ordering as AtomicOrdering;

    fn test_hub(n_video: usize) -> Arc<CaptureHub> {
        let cfg = Config {
            spotlight: Default::default(),
            codec: Default::default(),
            export: Default::default(),
        };
        let pause = Arc::new(AtomicBool::new(true));
        let exit = Arc::new(AtomicBool::new(false));
        let video = Arc::new(VideoStream::new(
            60,
            30,
            64,
            64,
            64,
            64,
            pause.clone(),
            exit.clone(),
        ));
        Arc::new(CaptureHub::new(
            cfg,
            video,
            Vec::new(),
            n_video,
            pause,
            exit,
        ))
    }

    #[test]
    fn ready_transition_requires_every_worker() {
        let hub = test_hub(3);
        assert_eq!(hub.state(), HubState::Initializing);
        hub.mark_worker_ready();
        hub.mark_worker_ready();
        assert_eq!(hub.state(), HubState::Initializing);
        assert!(hub.pause.load(AtomicOrdering::Acquire));
        hub.mark_worker_ready();
        assert_eq!(hub.state(), HubState::Running);
        assert!(!hub.pause.load(AtomicOrdering::Acquire));
    }

    #[test]
    fn shutdown_sets_exit_and_clears_pause() {
        let hub = test_hub(1);
        hub.request_shutdown();
        assert_eq!(hub.state(), HubState::Terminating);
        assert!(hub.exit.load(AtomicOrdering::Acquire));
        assert!(!hub.pause.load(AtomicOrdering::Acquire));
    }

    #[test]
    fn spawned_worker_reports_ready() {
        let hub = test_hub(1);
        let handles = spawn_video_workers(&hub, 1, |_| {
            Ok(Box::new(SyntheticFrameSource { next_value: 0 }) as Box<dyn FrameSource>)
        })
        .unwrap();
        // allow the worker thread to report in
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(hub.state(), HubState::Running);
        hub.request_shutdown();
        for h in handles {
            let _ = h.join();
        }
    }
}
