//! Signal wiring: `SIGUSR1` ("save now") and `SIGINT`/`SIGTERM` (orderly
//! teardown), dispatched onto the Capture Hub from a dedicated thread rather
//! than from inside a signal handler, mirroring `signal(SIGUSR1, save)` /
//! `signal(SIGINT, flush_spotlight)` in `main.c` without running unsafe
//! logic at interrupt time.

use std::sync::Arc;
use std::thread::JoinHandle;

use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;

use crate::error::{Result, SpotlightError};
use crate::hub::CaptureHub;

/// Spawn the signal-handling thread. Returns a join handle the caller may
/// park on (the thread exits once a termination signal is observed).
pub fn install(hub: Arc<CaptureHub>) -> Result<JoinHandle<()>> {
    let mut signals = Signals::new([SIGUSR1, SIGINT, SIGTERM])
        .map_err(|e| SpotlightError::Resource(format!("signal registration failed: {e}")))?;

    let handle = std::thread::Builder::new()
        .name("spotlight-signals".into())
        .spawn(move || {
            for signal in signals.forever() {
                match signal {
                    SIGUSR1 => {
                        log::info!("received SIGUSR1, requesting flush");
                        hub.request_flush();
                    }
                    SIGINT | SIGTERM => {
                        log::info!("received termination signal, requesting shutdown");
                        hub.request_shutdown();
                        break;
                    }
                    other => {
                        log::warn!("ignoring unexpected signal {other}");
                    }
                }
            }
        })
        .map_err(|e| SpotlightError::Resource(format!("failed to spawn signal thread: {e}")))?;

    Ok(handle)
}
