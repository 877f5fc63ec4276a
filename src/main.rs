use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spotlight::capture::audio_source::CpalAudioSource;
use spotlight::capture::frame_source::{CaptureRect, X11FrameSource};
use spotlight::capture::{AudioSource, FrameSource, Resampler};
use spotlight::config::Config;
use spotlight::flush::probe_audio_encoder_params;
use spotlight::hub::{spawn_audio_workers, spawn_video_workers, CaptureHub};
use spotlight::stream::{AudioStream, VideoStream};

fn main() {
    env_logger::init();

    match run() {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::error!("fatal: {e}");
            std::process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cfg = Config::load(None)?;
    log::info!(
        "starting: framerate={} window={}s threads={}",
        cfg.spotlight.framerate,
        cfg.spotlight.window_size,
        cfg.spotlight.threads
    );

    let pause = Arc::new(AtomicBool::new(true));
    let exit = Arc::new(AtomicBool::new(false));

    let (dst_width, dst_height) = cfg
        .spotlight
        .capture
        .scale
        .resolve(cfg.spotlight.capture.width, cfg.spotlight.capture.height);

    let video_capacity = (cfg.spotlight.framerate * cfg.spotlight.window_size) as usize;
    let video = Arc::new(VideoStream::new(
        video_capacity,
        cfg.spotlight.framerate,
        cfg.spotlight.capture.width,
        cfg.spotlight.capture.height,
        dst_width,
        dst_height,
        pause.clone(),
        exit.clone(),
    ));

    let mut audio_streams = Vec::new();
    let mut audio_device_names = Vec::new();
    let mut audio_channel_counts = Vec::new();
    for (title, device) in &cfg.spotlight.audio.device {
        let channels = device.channel_count()?;
        let params = probe_audio_encoder_params(&cfg.spotlight.audio.codec, 44_100, channels)?;
        let capacity = ((44_100.0 / params.samples_per_frame as f64)
            * cfg.spotlight.window_size as f64)
            .ceil() as usize;

        log::info!(
            "audio device '{title}' ({}): S={} format={:?} capacity={capacity}",
            device.name,
            params.samples_per_frame,
            params.sample_format
        );

        audio_streams.push(Arc::new(AudioStream::new(
            capacity,
            channels,
            44_100,
            params.samples_per_frame,
            channels,
            params.sample_format,
            pause.clone(),
            exit.clone(),
        )));
        audio_device_names.push(device.name.clone());
        audio_channel_counts.push(channels);
    }

    let total_workers = cfg.spotlight.threads + audio_streams.len();
    let hub = Arc::new(CaptureHub::new(
        cfg.clone(),
        video.clone(),
        audio_streams.clone(),
        total_workers,
        pause.clone(),
        exit.clone(),
    ));

    let rect = CaptureRect {
        x: cfg.spotlight.capture.x as i16,
        y: cfg.spotlight.capture.y as i16,
        width: cfg.spotlight.capture.width as u16,
        height: cfg.spotlight.capture.height as u16,
    };

    // One shared display connection for the whole Worker Ring; each
    // worker below only attaches its own private SHM segment over it.
    let (x11_conn, x11_root) = spotlight::capture::frame_source::open_shared_connection(None)?;

    let video_handles = spawn_video_workers(&hub, cfg.spotlight.threads, move |_id| {
        let source = X11FrameSource::attach(x11_conn.clone(), x11_root, rect)?;
        Ok(Box::new(source) as Box<dyn FrameSource>)
    })?;

    let hub_for_audio = hub.clone();
    let audio_handles = spawn_audio_workers(&hub, move |idx| {
        let name = &audio_device_names[idx];
        let channels = audio_channel_counts[idx];
        // Resample into the same format the flush-time encoder was probed
        // with for this device (AudioStream::dst_format), not a hardcoded
        // constant, so real-time frames and flush-time encoder input agree.
        let dst_format = hub_for_audio.audio_streams()[idx].dst_format.clone();
        let source = CpalAudioSource::open(name, channels)?;
        let resampler = Resampler::new(44_100, channels, 44_100, channels, dst_format)?;
        Ok((Box::new(source) as Box<dyn AudioSource>, resampler))
    })?;

    let signal_handle = spotlight::signals::install(hub.clone())?;

    // Worker threads run until the exit flag is observed; the coordinator
    // just waits for termination rather than joining them one by one.
    drop(video_handles);
    drop(audio_handles);

    while !exit.load(Ordering::Acquire) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    let _ = signal_handle.join();
    log::info!("terminated cleanly");
    Ok(())
}
