//! Audio Source: one input stream per configured device, opened through
//! `cpal`, mirroring `pa_simple_new(..., PA_STREAM_RECORD, ...)` in
//! `audio.c`. `cpal` is callback-driven; this bridges it to a synchronous
//! blocking-read contract with a lock-free SPSC byte ring (`ringbuf`).

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use ringbuf::storage::Heap;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::AudioSource;
use crate::error::{Result, SpotlightError};

const SAMPLE_RATE: u32 = 44_100;
/// How long the ring buffer stays beneath a short audio dropout before
/// `read` treats it as a fatal short read, per the open question in the
/// design notes: short reads are fatal, not buffered and retried forever.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

pub struct CpalAudioSource {
    _stream: cpal::Stream,
    consumer: HeapCons<u8>,
}

impl CpalAudioSource {
    pub fn open(device_name: &str, channels: u16) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .input_devices()
            .map_err(|e| SpotlightError::Resource(format!("enumerating input devices: {e}")))?
            .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
            .ok_or_else(|| {
                SpotlightError::Resource(format!("audio input device '{device_name}' not found"))
            })?;

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        // One second of headroom; the bridge is meant to stay nearly empty
        // under steady capture since the audio worker drains it immediately.
        let ring: HeapRb<u8> = HeapRb::new(SAMPLE_RATE as usize * channels as usize * 2);
        let (producer, consumer): (HeapProd<u8, Heap<u8>>, HeapCons<u8, Heap<u8>>) = ring.split();

        let stream = Self::build_stream(&device, &config, producer)?;
        stream
            .play()
            .map_err(|e| SpotlightError::Resource(format!("starting audio stream: {e}")))?;

        Ok(Self {
            _stream: stream,
            consumer,
        })
    }

    fn build_stream(
        device: &cpal::Device,
        config: &StreamConfig,
        mut producer: HeapProd<u8>,
    ) -> Result<cpal::Stream> {
        let sample_format = device
            .default_input_config()
            .map_err(|e| SpotlightError::Resource(format!("querying default input config: {e}")))?
            .sample_format();

        let err_fn = |e| log::error!("audio input stream error: {e}");

        let stream = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                config,
                move |data: &[i16], _| {
                    let bytes: &[u8] = bytemuck_cast_i16(data);
                    let _ = producer.push_slice(bytes);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(SpotlightError::Configuration(format!(
                    "unsupported input sample format {other:?}, expected i16"
                )))
            }
        };

        stream.map_err(|e| SpotlightError::Resource(format!("building input stream: {e}")))
    }
}

impl AudioSource for CpalAudioSource {
    fn read(&mut self, into: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        let deadline = std::time::Instant::now() + STALL_TIMEOUT;
        while filled < into.len() {
            let n = self.consumer.pop_slice(&mut into[filled..]);
            filled += n;
            if filled < into.len() {
                if std::time::Instant::now() > deadline {
                    return Err(SpotlightError::AudioReadError(format!(
                        "short read: got {filled} of {} bytes before stall timeout",
                        into.len()
                    )));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        Ok(())
    }
}

fn bytemuck_cast_i16(data: &[i16]) -> &[u8] {
    // SAFETY: i16 has no padding/invalid bit patterns; reinterpreting as
    // bytes is always valid, and the resulting slice does not outlive `data`.
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(data)) }
}

/// A deterministic synthetic source for hermetic tests: produces a fixed
/// byte pattern with no wall-clock dependency.
#[cfg(test)]
pub struct SyntheticAudioSource {
    pub pattern: u8,
}

#[cfg(test)]
impl AudioSource for SyntheticAudioSource {
    fn read(&mut self, into: &mut [u8]) -> Result<()> {
        into.fill(self.pattern);
        Ok(())
    }
}
