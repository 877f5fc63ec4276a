//! Pixel Converter: scales and converts a captured screen image to the
//! video encoder's pixel format via `ffmpeg_next::software::scaling::Context`
//! (`libswscale`). One instance per worker — never shared between threads,
//! mirroring the comment in `video.c`: "the requirement for SwsContext
//! pixfmtScaler was added after adding multi-threading to prevent dropped
//! frames ... sws_scale ... would more often than not cause a SEGFAULT".

use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;

use crate::error::{Result, SpotlightError};

pub struct PixelConverter {
    ctx: scaling::Context,
    src_width: u32,
    src_height: u32,
}

impl PixelConverter {
    /// `src` is always BGRA/RGB32 (what the Frame Source produces); `dst` is
    /// always planar YUV 4:2:0 per the data model.
    pub fn new(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Result<Self> {
        let ctx = scaling::Context::get(
            Pixel::BGRA,
            src_width,
            src_height,
            Pixel::YUV420P,
            dst_width,
            dst_height,
            scaling::Flags::FAST_BILINEAR,
        )
        .map_err(|e| SpotlightError::Resource(format!("creating pixel scaler: {e}")))?;

        Ok(Self {
            ctx,
            src_width,
            src_height,
        })
    }

    /// Converts `src` (a raw BGRA image of `src_width * src_height * 4`
    /// bytes) into `dst`, a pre-allocated YUV420P frame at the target
    /// resolution.
    pub fn convert(&mut self, src: &[u8], dst: &mut ffmpeg::frame::Video) -> Result<()> {
        let expected = self.src_width as usize * self.src_height as usize * 4;
        if src.len() != expected {
            return Err(SpotlightError::Resource(format!(
                "source image is {} bytes, expected {}",
                src.len(),
                expected
            )));
        }

        let mut rgb_frame = ffmpeg::frame::Video::new(Pixel::BGRA, self.src_width, self.src_height);
        let stride = rgb_frame.stride(0);
        let row_bytes = self.src_width as usize * 4;
        let data = rgb_frame.data_mut(0);
        for y in 0..self.src_height as usize {
            let src_off = y * row_bytes;
            let dst_off = y * stride;
            data[dst_off..dst_off + row_bytes].copy_from_slice(&src[src_off..src_off + row_bytes]);
        }

        self.ctx
            .run(&rgb_frame, dst)
            .map_err(|e| SpotlightError::Resource(format!("scaling frame: {e}")))
    }
}
