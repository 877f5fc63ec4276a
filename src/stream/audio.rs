//! Audio Worker: a per-device loop that continuously produces paced
//! audio frames into a Ring Buffer. No inter-worker turn protocol
//! is needed — exactly one worker per device, and the device's own clock
//! paces it (mirrors `audio_encode()` in `audio.c`, which blocks on
//! `pa_simple_read`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::sample::Sample;

use crate::capture::{AudioSource, Resampler};
use crate::error::Result;
use crate::ring_buffer::RingBuffer;

/// An audio stream's Ring Buffer and the encoder-shaped parameters needed to
/// size each incoming block, per the data model's Audio Stream attributes.
pub struct AudioStream {
    pub ring: Mutex<RingBuffer<ffmpeg::frame::Audio>>,
    pub channels: u16,
    pub source_rate: u32,
    /// Samples-per-frame: the encoder's fixed frame size, or 10000 when the
    /// encoder accepts variable frame sizes.
    pub samples_per_frame: usize,
    /// The configured audio codec's preferred sample format — probed once at
    /// construction (see `flush::probe_audio_encoder_params`) and reused
    /// both by the real-time Resampler's destination format and by the
    /// flush-time encoder, so the two never disagree about what a Ring
    /// Buffer frame contains.
    pub dst_format: Sample,
    pub pause: Arc<AtomicBool>,
    pub exit: Arc<AtomicBool>,
}

impl AudioStream {
    pub fn new(
        capacity: usize,
        channels: u16,
        source_rate: u32,
        samples_per_frame: usize,
        dst_channels: u16,
        dst_format: Sample,
        pause: Arc<AtomicBool>,
        exit: Arc<AtomicBool>,
    ) -> Self {
        let ring = RingBuffer::new(capacity, || {
            ffmpeg::frame::Audio::new(
                dst_format,
                samples_per_frame,
                ffmpeg::ChannelLayout::default(dst_channels as i32),
            )
        });
        Self {
            ring: Mutex::new(ring),
            channels,
            source_rate,
            samples_per_frame,
            dst_format,
            pause,
            exit,
        }
    }

    /// Bytes to read per block: `sampleSize (2) * channels * S`.
    pub fn block_bytes(&self) -> usize {
        2 * self.channels as usize * self.samples_per_frame
    }
}

/// Runs the worker's steady-state capture loop until the Hub's exit flag
/// is set.
pub fn run_audio_worker<A: AudioSource>(
    stream: &AudioStream,
    source: &mut A,
    resampler: &mut Resampler,
) -> Result<()> {
    let block_bytes = stream.block_bytes();
    let mut scratch = vec![0u8; block_bytes];

    loop {
        // Step 1: observe pause; busy-wait while set.
        while stream.pause.load(Ordering::Acquire) {
            if stream.exit.load(Ordering::Acquire) {
                return Ok(());
            }
            std::thread::yield_now();
        }
        if stream.exit.load(Ordering::Acquire) {
            return Ok(());
        }

        // Step 2: blocking read of one fixed-size PCM block.
        source.read(&mut scratch)?;

        // Build a packed-S16 input frame from the raw bytes for the
        // resampler, sized S samples per channel.
        let mut src_frame = ffmpeg::frame::Audio::new(
            Sample::I16(ffmpeg_next::format::sample::Type::Packed),
            stream.samples_per_frame,
            ffmpeg::ChannelLayout::default(stream.channels as i32),
        );
        src_frame.data_mut(0)[..block_bytes].copy_from_slice(&scratch);

        // Step 3: resample into the slot at the current writeIndex.
        // Step 4: advance writeIndex/frameCount. Unlike the video worker
        // ring, there is only one writer here, so the write happens before
        // the advance rather than the other way around.
        {
            let mut ring = stream.ring.lock().unwrap();
            let index = ring.write_index();
            let dst_frame = ring.slot_mut(index);
            resampler.convert(&src_frame, dst_frame)?;
            ring.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::audio_source::SyntheticAudioSource;
    use std::thread;

    fn mono_stream(capacity: usize, pause: Arc<AtomicBool>, exit: Arc<AtomicBool>) -> AudioStream {
        AudioStream::new(
            capacity,
            1,
            44_100,
            1_024,
            1,
            Sample::F32(ffmpeg_next::format::sample::Type::Planar),
            pause,
            exit,
        )
    }

    #[test]
    fn block_bytes_is_sample_size_times_channels_times_samples_per_frame() {
        let pause = Arc::new(AtomicBool::new(false));
        let exit = Arc::new(AtomicBool::new(false));
        let stream = mono_stream(4, pause, exit);
        assert_eq!(stream.block_bytes(), 2 * 1 * 1_024);
    }

    /// Pause safety for the audio worker: an exit observed at the top of
    /// the loop returns before any read or ring advance happens.
    #[test]
    fn exit_flag_stops_worker_before_first_read() {
        let pause = Arc::new(AtomicBool::new(false));
        let exit = Arc::new(AtomicBool::new(true));
        let stream = mono_stream(4, pause, exit);

        let mut source = SyntheticAudioSource { pattern: 0 };
        let mut resampler =
            Resampler::new(44_100, 1, 44_100, 1, Sample::F32(ffmpeg_next::format::sample::Type::Planar))
                .unwrap();

        run_audio_worker(&stream, &mut source, &mut resampler).unwrap();
        assert_eq!(stream.ring.lock().unwrap().frame_count(), 0);
    }

    #[test]
    fn worker_advances_ring_until_exit_is_raised() {
        let pause = Arc::new(AtomicBool::new(false));
        let exit = Arc::new(AtomicBool::new(false));
        let stream = Arc::new(mono_stream(4, pause, exit.clone()));

        let stream_for_thread = stream.clone();
        let handle = thread::spawn(move || {
            let mut source = SyntheticAudioSource { pattern: 7 };
            let mut resampler = Resampler::new(
                44_100,
                1,
                44_100,
                1,
                Sample::F32(ffmpeg_next::format::sample::Type::Planar),
            )
            .unwrap();
            run_audio_worker(&stream_for_thread, &mut source, &mut resampler)
        });

        // Let a few blocks flow through before asking the worker to stop;
        // the synthetic source never blocks so this is not timing-sensitive
        // beyond giving the thread a scheduling slice.
        thread::sleep(std::time::Duration::from_millis(50));
        exit.store(true, Ordering::Release);
        handle.join().unwrap().unwrap();

        assert!(stream.ring.lock().unwrap().frame_count() > 0);
    }
}
