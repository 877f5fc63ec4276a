//! Video Worker Ring: N cooperating workers that rotate turn-by-turn to
//! produce paced video frames into a stream's Ring Buffer, using a
//! turn-token pacing algorithm.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ffmpeg_next as ffmpeg;

use crate::capture::{FrameSource, PixelConverter};
use crate::error::Result;
use crate::ring_buffer::RingBuffer;

/// Shared state of a Worker Ring: the pacing clock and the process-wide
/// pause/exit flags every worker observes. `pause` and `exit` are owned by
/// the Capture Hub; workers hold only non-owning `Arc` clones.
pub struct WorkerRingShared {
    pub last_capture_timestamp: Mutex<Instant>,
    pub framerate: u32,
    pub pause: Arc<AtomicBool>,
    pub exit: Arc<AtomicBool>,
}

/// A video stream's Ring Buffer plus the turn-token channels that serialize
/// slot reservation across its workers.
pub struct VideoStream {
    pub ring: Mutex<RingBuffer<ffmpeg::frame::Video>>,
    pub shared: Arc<WorkerRingShared>,
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
}

impl VideoStream {
    pub fn new(
        capacity: usize,
        framerate: u32,
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
        pause: Arc<AtomicBool>,
        exit: Arc<AtomicBool>,
    ) -> Self {
        let ring = RingBuffer::new(capacity, || {
            ffmpeg::frame::Video::new(ffmpeg::format::Pixel::YUV420P, dst_width, dst_height)
        });
        Self {
            ring: Mutex::new(ring),
            shared: Arc::new(WorkerRingShared {
                last_capture_timestamp: Mutex::new(Instant::now()),
                framerate,
                pause,
                exit,
            }),
            src_width,
            src_height,
            dst_width,
            dst_height,
        }
    }
}

/// Builds the N per-worker turn-token channels in a ring: worker `k` holds
/// the receiving end of its own token and the sending end of worker
/// `(k+1) mod N`'s token. Worker 0 starts primed (capacity-1 channel holding
/// one token); the rest start empty.
pub fn build_turn_tokens(n: usize) -> (Vec<Receiver<()>>, Vec<SyncSender<()>>) {
    let mut senders = Vec::with_capacity(n);
    let mut receivers = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = sync_channel::<()>(1);
        senders.push(tx);
        receivers.push(rx);
    }
    // worker 0 starts with permission to capture first.
    let _ = senders[0].try_send(());
    (receivers, senders)
}

/// Per-worker private state: a shared-memory image buffer and its own pixel
/// converter instance (never shared across threads — the scaler keeps
/// internal mutable state, a documented source defect).
pub struct VideoWorker<S: FrameSource> {
    pub id: usize,
    pub frame_source: S,
    pub converter: PixelConverter,
    pub image_buffer: Vec<u8>,
    pub my_token: Receiver<()>,
    pub next_token: SyncSender<()>,
}

impl<S: FrameSource> VideoWorker<S> {
    pub fn new(
        id: usize,
        frame_source: S,
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
        my_token: Receiver<()>,
        next_token: SyncSender<()>,
    ) -> Result<Self> {
        let converter = PixelConverter::new(src_width, src_height, dst_width, dst_height)?;
        Ok(Self {
            id,
            frame_source,
            converter,
            image_buffer: vec![0u8; src_width as usize * src_height as usize * 4],
            my_token,
            next_token,
        })
    }

    /// Runs the worker's steady-state capture loop until the Hub's exit flag
    /// is set. Returns when the worker observes termination, having released
    /// no resources of its own (the caller drops `self`, releasing the
    /// shared-memory segment and converter).
    pub fn run(&mut self, stream: &VideoStream) -> Result<()> {
        let frame_time = Duration::from_millis(1000 / stream.shared.framerate as u64);

        loop {
            // Step 1: observe pause; busy-wait (yielding) while set.
            while stream.shared.pause.load(Ordering::Acquire) {
                if stream.shared.exit.load(Ordering::Acquire) {
                    return Ok(());
                }
                std::thread::yield_now();
            }
            if stream.shared.exit.load(Ordering::Acquire) {
                return Ok(());
            }

            // Step 2: wait for this worker's turn-token.
            if self.my_token.recv().is_err() {
                return Ok(());
            }
            if stream.shared.exit.load(Ordering::Acquire) {
                return Ok(());
            }

            // Step 3: pace against the shared clock.
            {
                let mut last = stream.shared.last_capture_timestamp.lock().unwrap();
                let now = Instant::now();
                let elapsed = now.duration_since(*last);
                if elapsed < frame_time {
                    std::thread::sleep(frame_time - elapsed);
                }
                // Step 4: publish the new timestamp.
                *last = Instant::now();
            }

            // Step 5: pass the turn to the next worker immediately so its
            // pacing/capture can overlap with this worker's conversion.
            let _ = self.next_token.try_send(());

            // Step 6: capture into this worker's private image buffer.
            self.frame_source.capture(&mut self.image_buffer)?;

            // Step 7: reserve a slot BEFORE the expensive conversion so the
            // next turn-holder targets a different slot. The lock covers
            // only the reservation itself, not the write that follows, so
            // another worker's reservation (or a later worker's step 8) can
            // proceed while this worker's conversion is still running.
            let frame_ptr = {
                let mut ring = stream.ring.lock().unwrap();
                let (index, _count) = ring.advance();
                ring.slot_ptr(index)
            };

            // Step 8: convert into the reserved slot, unsynchronized — the
            // reservation above is this worker's exclusive claim on the slot
            // until it is reserved again, at least W seconds from now.
            // SAFETY: no other thread holds a pointer to this index; the
            // turn-token/slot-reservation discipline of the worker ring
            // guarantees that.
            self.converter
                .convert(&self.image_buffer, unsafe { &mut *frame_ptr })?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame_source::SyntheticFrameSource;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn make_stream(n_workers: usize, framerate: u32, capacity: usize) -> (Arc<VideoStream>, Arc<AtomicBool>, Arc<AtomicBool>) {
        let pause = Arc::new(AtomicBool::new(true));
        let exit = Arc::new(AtomicBool::new(false));
        let stream = Arc::new(VideoStream::new(
            capacity,
            framerate,
            64,
            64,
            64,
            64,
            pause.clone(),
            exit.clone(),
        ));
        let _ = n_workers;
        (stream, pause, exit)
    }

    #[test]
    fn turn_tokens_rotate_strictly_round_robin() {
        let n = 3;
        let (mut receivers, senders) = build_turn_tokens(n);
        let mut order = Vec::new();
        for _ in 0..(n * 4) {
            for k in 0..n {
                if receivers[k].try_recv().is_ok() {
                    order.push(k);
                    let next = (k + 1) % n;
                    let _ = senders[next].try_send(());
                }
            }
        }
        let expected: Vec<usize> = (0..order.len()).map(|i| i % n).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn pause_blocks_workers_from_advancing() {
        let (stream, pause, exit) = make_stream(1, 1000, 4);
        let (mut receivers, senders) = build_turn_tokens(1);
        let mut worker = VideoWorker::new(
            0,
            SyntheticFrameSource { next_value: 0 },
            64,
            64,
            64,
            64,
            receivers.remove(0),
            senders[0].clone(),
        )
        .unwrap();

        let stream_for_thread = stream.clone();
        let handle = thread::spawn(move || {
            let _ = worker.run(&stream_for_thread);
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(stream.ring.lock().unwrap().frame_count(), 0);

        exit.store(true, Ordering::Release);
        pause.store(false, Ordering::Release);
        handle.join().unwrap();
    }
}
