//! Flush/Mux Engine: drains every Ring Buffer through a freshly-opened
//! encoder into one muxed container. Grounded in `stream_puffer.rs`'s
//! `encode_to_mp4`, which is the same shape: open an output context, add
//! one stream per encoder, write the header, iterate buffered frames
//! through `send_frame`/`receive_packet`/`rescale_ts`/`write_interleaved`,
//! then `write_trailer`.
//!
//! Because every flush opens a brand-new muxer and encoder set and tears
//! them down again before returning, the rebuild-after-flush invariant
//! falls out for free: there is no persistent encoder context for a second
//! header/trailer cycle to corrupt with non-monotonic DTS.

use std::path::Path;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg::{codec, format, Rational};

use crate::config::Config;
use crate::error::{Result, SpotlightError};
use crate::stream::{AudioStream, VideoStream};

/// The two encoder-shaped parameters derived from a configured audio codec
/// at stream-construction time: samples-per-frame S and the codec's
/// preferred sample format. Probed once per device, before the first flush,
/// so the real-time Resampler and Ring Buffer frames already match what the
/// flush-time encoder will demand.
pub struct AudioEncoderParams {
    pub samples_per_frame: usize,
    pub sample_format: format::Sample,
}

/// Opens a throwaway encoder of `codec_name` to read its reported frame size
/// and its preferred sample format, mirroring `alloc_audio_stream()` /
/// `open_audio_stream()` in `audio.c`: `numSamples = codecContext->frame_size`
/// (or `10000` when `AV_CODEC_CAP_VARIABLE_FRAME_SIZE` is set), and
/// `codec->sample_fmts[0]` (falling back to planar float only when the codec
/// declares no formats of its own). This throwaway context is discarded
/// immediately; it exists only to size the Ring Buffer and the real-time
/// Resampler's destination format, well before the first flush builds a
/// real encoder.
pub fn probe_audio_encoder_params(
    codec_name: &str,
    sample_rate: u32,
    channels: u16,
) -> Result<AudioEncoderParams> {
    ffmpeg::init().map_err(codec_err)?;
    let audio_codec = codec::encoder::find_by_name(codec_name)
        .ok_or_else(|| SpotlightError::Codec(format!("audio encoder '{codec_name}' not found")))?;

    let sample_format = pick_audio_sample_format(&audio_codec);

    if audio_codec
        .capabilities()
        .contains(codec::Capabilities::VARIABLE_FRAME_SIZE)
    {
        return Ok(AudioEncoderParams {
            samples_per_frame: 10_000,
            sample_format,
        });
    }

    let mut enc = codec::Context::new().encoder().audio().map_err(codec_err)?;
    enc.set_rate(sample_rate as i32);
    enc.set_channel_layout(ffmpeg::ChannelLayout::default(channels as i32));
    enc.set_format(sample_format);
    enc.set_time_base(Rational::new(1, sample_rate as i32));
    let opened = enc.open_as(audio_codec).map_err(codec_err)?;
    let frame_size = opened.frame_size();
    let samples_per_frame = if frame_size > 0 {
        frame_size as usize
    } else {
        10_000
    };
    Ok(AudioEncoderParams {
        samples_per_frame,
        sample_format,
    })
}

/// The codec's own first advertised sample format (`codec->sample_fmts[0]`
/// in the original), falling back to planar float only when the codec
/// declares no formats of its own.
fn pick_audio_sample_format(codec: &codec::Codec) -> format::Sample {
    codec
        .audio()
        .and_then(|a| a.formats())
        .and_then(|mut formats| formats.next())
        .unwrap_or(format::Sample::F32(format::sample::Type::Planar))
}

fn mux_err(e: impl std::fmt::Display) -> SpotlightError {
    SpotlightError::Mux(e.to_string())
}

fn codec_err(e: impl std::fmt::Display) -> SpotlightError {
    SpotlightError::Codec(e.to_string())
}

/// Runs one full flush: pause, open muxer + encoders, drain every stream,
/// write the trailer, clear pause, and reset every Ring Buffer so the next
/// flush also starts from `frameCount = 0`.
///
/// A codec error opening one stream's encoder degrades only that stream —
/// it is logged and dropped from the container, while the muxer still gets
/// a header/trailer built from whatever streams did open successfully. A
/// mux error (header, interleaved write, or trailer) is likewise logged
/// rather than aborting: the trailer is always attempted regardless of
/// what failed before it.
pub fn flush(
    path: &Path,
    cfg: &Config,
    video: &VideoStream,
    audio: &[Arc<AudioStream>],
) -> Result<()> {
    ffmpeg::init().map_err(codec_err)?;

    let path_str = path
        .to_str()
        .ok_or_else(|| SpotlightError::Configuration("output path is not valid UTF-8".into()))?;
    let mut octx = format::output(path_str).map_err(mux_err)?;

    let global_header = octx
        .format()
        .flags()
        .contains(format::Flags::GLOBAL_HEADER);

    let mut video_entry = match open_video_entry(&mut octx, cfg, video, global_header) {
        Ok(entry) => Some(entry),
        Err(e) => {
            log::error!("video encoder setup failed, dropping video stream from this flush: {e}");
            None
        }
    };

    let mut audio_entries: Vec<Option<(usize, codec::encoder::audio::Audio)>> = audio
        .iter()
        .map(
            |stream| match open_audio_entry(&mut octx, cfg, stream, global_header) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::error!("audio encoder setup failed, dropping a device from this flush: {e}");
                    None
                }
            },
        )
        .collect();

    if let Err(e) = octx.write_header() {
        log::error!("write_header failed: {e}");
    } else {
        if let Some((index, encoder)) = video_entry.as_mut() {
            drain_video(&mut octx, video, encoder, *index);
        }
        for (stream, entry) in audio.iter().zip(audio_entries.iter_mut()) {
            if let Some((index, encoder)) = entry.as_mut() {
                drain_audio(&mut octx, stream, encoder, *index);
            }
        }
    }

    // A mux error here is logged, not fatal: the trailer write is always
    // attempted regardless of what failed before it.
    if let Err(e) = octx.write_trailer() {
        log::error!("write_trailer failed: {e}");
    }

    video.ring.lock().unwrap().reset();
    for stream in audio {
        stream.ring.lock().unwrap().reset();
    }

    Ok(())
}

fn open_video_entry(
    octx: &mut format::context::Output,
    cfg: &Config,
    video: &VideoStream,
    global_header: bool,
) -> Result<(usize, codec::encoder::video::Video)> {
    let video_codec = codec::encoder::find_by_name(&cfg.codec.name)
        .ok_or_else(|| SpotlightError::Codec(format!("encoder '{}' not found", cfg.codec.name)))?;
    let mut vst = octx.add_stream(video_codec).map_err(mux_err)?;
    let stream_index = vst.index();

    let mut video_encoder = codec::Context::new()
        .encoder()
        .video()
        .map_err(codec_err)?;
    video_encoder.set_width(video.dst_width);
    video_encoder.set_height(video.dst_height);
    video_encoder.set_format(format::Pixel::YUV420P);
    video_encoder.set_time_base(Rational::new(1, video.shared.framerate as i32));
    video_encoder.set_frame_rate(Some(Rational::new(video.shared.framerate as i32, 1)));
    video_encoder.set_bit_rate(cfg.codec.bitrate as usize);
    video_encoder.set_gop(10);
    video_encoder.set_max_b_frames(1);
    if global_header {
        video_encoder.set_flags(codec::Flags::GLOBAL_HEADER);
    }

    let video_encoder = if cfg.codec.options.is_empty() {
        video_encoder.open_as(video_codec).map_err(codec_err)?
    } else {
        let mut dict = ffmpeg::Dictionary::new();
        for (k, v) in &cfg.codec.options {
            dict.set(k, v);
        }
        video_encoder
            .open_as_with(video_codec, dict)
            .map_err(codec_err)?
    };
    vst.set_parameters(&video_encoder);
    Ok((stream_index, video_encoder))
}

fn open_audio_entry(
    octx: &mut format::context::Output,
    cfg: &Config,
    stream: &AudioStream,
    global_header: bool,
) -> Result<(usize, codec::encoder::audio::Audio)> {
    let audio_codec = codec::encoder::find_by_name(&cfg.spotlight.audio.codec).ok_or_else(|| {
        SpotlightError::Codec(format!(
            "audio encoder '{}' not found",
            cfg.spotlight.audio.codec
        ))
    })?;

    let mut ast = octx.add_stream(audio_codec).map_err(mux_err)?;
    let stream_index = ast.index();

    let mut enc = codec::Context::new().encoder().audio().map_err(codec_err)?;
    enc.set_rate(stream.source_rate as i32);
    enc.set_channel_layout(ffmpeg::ChannelLayout::default(stream.channels as i32));
    enc.set_format(stream.dst_format);
    enc.set_time_base(Rational::new(1, stream.source_rate as i32));
    enc.set_bit_rate(cfg.spotlight.audio.bitrate as usize);
    if global_header {
        enc.set_flags(codec::Flags::GLOBAL_HEADER);
    }

    let enc = enc.open_as(audio_codec).map_err(codec_err)?;
    ast.set_parameters(&enc);
    Ok((stream_index, enc))
}

fn drain_video(
    octx: &mut format::context::Output,
    stream: &VideoStream,
    encoder: &mut codec::encoder::video::Video,
    stream_index: usize,
) {
    let mut ring = stream.ring.lock().unwrap();
    let frames: Vec<ffmpeg::frame::Video> = ring.iter_oldest_to_newest().cloned().collect();
    drop(ring);

    for (i, frame) in frames.iter().enumerate() {
        let mut frame = frame.clone();
        frame.set_pts(Some(video_pts(i)));
        if let Err(e) = encoder.send_frame(&frame) {
            log::error!("video encoder send_frame failed at frame {i}: {e}");
            continue;
        }
        drain_video_packets(octx, encoder, stream_index);
    }

    if let Err(e) = encoder.send_eof() {
        log::error!("video encoder send_eof failed: {e}");
    }
    drain_video_packets(octx, encoder, stream_index);
}

fn drain_audio(
    octx: &mut format::context::Output,
    stream: &AudioStream,
    encoder: &mut codec::encoder::audio::Audio,
    stream_index: usize,
) {
    let mut ring = stream.ring.lock().unwrap();
    let frames: Vec<ffmpeg::frame::Audio> = ring.iter_oldest_to_newest().cloned().collect();
    drop(ring);

    let mut pts = 0i64;
    for (i, frame) in frames.iter().enumerate() {
        let mut frame = frame.clone();
        let samples = frame.samples() as i64;
        frame.set_pts(Some(pts));
        pts = next_audio_pts(pts, samples);
        if let Err(e) = encoder.send_frame(&frame) {
            log::error!("audio encoder send_frame failed at frame {i}: {e}");
            continue;
        }
        drain_audio_packets(octx, encoder, stream_index);
    }

    if let Err(e) = encoder.send_eof() {
        log::error!("audio encoder send_eof failed: {e}");
    }
    drain_audio_packets(octx, encoder, stream_index);
}

/// The i-th emitted video frame's PTS, rescaled from the codec time base
/// (1/F): simply the emission index.
fn video_pts(i: usize) -> i64 {
    i as i64
}

/// PTS for audio accumulates monotonically by each frame's sample count.
fn next_audio_pts(current: i64, samples_in_frame: i64) -> i64 {
    current + samples_in_frame
}

fn drain_video_packets(
    octx: &mut format::context::Output,
    encoder: &mut codec::encoder::video::Video,
    stream_index: usize,
) {
    let mut packet = ffmpeg::Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        let stream_time_base = match octx.stream(stream_index) {
            Some(s) => s.time_base(),
            None => {
                log::error!("unknown stream index {stream_index} during video drain");
                return;
            }
        };
        packet.rescale_ts(encoder.time_base(), stream_time_base);
        if let Err(e) = packet.write_interleaved(octx) {
            log::error!("write_interleaved failed: {e}");
        }
    }
}

fn drain_audio_packets(
    octx: &mut format::context::Output,
    encoder: &mut codec::encoder::audio::Audio,
    stream_index: usize,
) {
    let mut packet = ffmpeg::Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        let stream_time_base = match octx.stream(stream_index) {
            Some(s) => s.time_base(),
            None => {
                log::error!("unknown stream index {stream_index} during audio drain");
                return;
            }
        };
        packet.rescale_ts(encoder.time_base(), stream_time_base);
        if let Err(e) = packet.write_interleaved(octx) {
            log::error!("write_interleaved failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_pts_is_the_emission_index() {
        assert_eq!(video_pts(0), 0);
        assert_eq!(video_pts(1), 1);
        assert_eq!(video_pts(59), 59);
    }

    #[test]
    fn audio_pts_accumulates_by_samples_per_frame() {
        let mut pts = 0i64;
        for samples in [1024, 1024, 1024, 512] {
            let next = next_audio_pts(pts, samples);
            assert!(next >= pts, "PTS must be non-decreasing");
            pts = next;
        }
        assert_eq!(pts, 1024 + 1024 + 1024 + 512);
    }

    #[test]
    fn audio_pts_starts_at_zero() {
        assert_eq!(next_audio_pts(0, 0), 0);
    }
}
