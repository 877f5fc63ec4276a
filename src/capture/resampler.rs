//! Resampler: converts a PCM block to the audio encoder's sample
//! format/rate/layout via `ffmpeg_next::software::resampling::Context`
//! (`libswresample`), mirroring `swr_alloc`/`swr_init`/`swr_convert` in
//! `audio.c`.

use ffmpeg_next as ffmpeg;
use ffmpeg::format::sample::{Sample, Type as SampleType};
use ffmpeg::software::resampling;
use ffmpeg::ChannelLayout;

use crate::error::{Result, SpotlightError};

pub struct Resampler {
    ctx: resampling::Context,
}

impl Resampler {
    pub fn new(
        src_rate: u32,
        src_channels: u16,
        dst_rate: u32,
        dst_channels: u16,
        dst_format: Sample,
    ) -> Result<Self> {
        let src_layout = ChannelLayout::default(src_channels as i32);
        let dst_layout = ChannelLayout::default(dst_channels as i32);

        let ctx = resampling::Context::get(
            Sample::I16(SampleType::Packed),
            src_layout,
            src_rate,
            dst_format,
            dst_layout,
            dst_rate,
        )
        .map_err(|e| SpotlightError::Resource(format!("creating resampler: {e}")))?;

        Ok(Self { ctx })
    }

    /// Converts `src`, a packed-S16 audio frame, into `dst`, sized by the
    /// caller using the resampler's reported delay plus input samples,
    /// rounded up.
    pub fn convert(&mut self, src: &ffmpeg::frame::Audio, dst: &mut ffmpeg::frame::Audio) -> Result<()> {
        self.ctx
            .run(src, dst)
            .map_err(|e| SpotlightError::Resource(format!("resampling frame: {e}")))?;
        Ok(())
    }

    /// Destination capacity for `input_samples` more input samples: the
    /// resampler's reported delay plus the input, rounded up.
    pub fn output_capacity(&self, input_samples: usize, dst_rate: u32, src_rate: u32) -> usize {
        let delay = self.ctx.delay().map(|d| d.output(dst_rate)).unwrap_or(0);
        let scaled_input = (input_samples as u64 * dst_rate as u64).div_ceil(src_rate as u64);
        delay as usize + scaled_input as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_capacity_matches_input_when_rates_are_equal_and_no_delay() {
        let resampler = Resampler::new(44_100, 1, 44_100, 1, Sample::F32(SampleType::Planar)).unwrap();
        // With matching rates and a freshly-constructed context (no frames
        // run through it yet), the reported delay is zero, so capacity
        // tracks the input size 1:1.
        assert_eq!(resampler.output_capacity(1_024, 44_100, 44_100), 1_024);
    }

    #[test]
    fn output_capacity_scales_with_rate_change() {
        let resampler = Resampler::new(44_100, 1, 22_050, 1, Sample::F32(SampleType::Planar)).unwrap();
        assert_eq!(resampler.output_capacity(1_000, 22_050, 44_100), 500);
    }
}
