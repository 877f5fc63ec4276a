//! Capability interfaces for the capture-side collaborators: a screen image
//! source, a PCM audio source, a pixel-format converter and a resampler.
//! Production backends live in `frame_source.rs`/`audio_source.rs`
//! (X11 / cpal); the property tests in `hub.rs`/`stream/*.rs` stand in fakes
//! implementing the same traits so they run without a display server or
//! audio hardware.

pub mod audio_source;
pub mod frame_source;
pub mod pixel_converter;
pub mod resampler;

use crate::error::Result;

/// Captures one screen image into a caller-supplied buffer.
pub trait FrameSource: Send {
    /// Copy the current framebuffer into `into`, which is exactly
    /// `width * height * 4` bytes (BGRA/RGB32, one sample source-resolution
    /// image).
    fn capture(&mut self, into: &mut [u8]) -> Result<()>;
}

/// Reads a fixed-size PCM block from one input device.
pub trait AudioSource: Send {
    /// Block until exactly `into.len()` bytes of signed 16-bit interleaved
    /// PCM have been read. A short read (stream closed before `into` is
    /// filled) is fatal, per the open question in the design notes: this is
    /// preserved current behavior, not a decision to relax later.
    fn read(&mut self, into: &mut [u8]) -> Result<()>;
}

impl FrameSource for Box<dyn FrameSource> {
    fn capture(&mut self, into: &mut [u8]) -> Result<()> {
        (**self).capture(into)
    }
}

impl AudioSource for Box<dyn AudioSource> {
    fn read(&mut self, into: &mut [u8]) -> Result<()> {
        (**self).read(into)
    }
}

pub use pixel_converter::PixelConverter;
pub use resampler::Resampler;
