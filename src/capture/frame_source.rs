//! Frame Source: root-window screen capture via the X11 MIT-SHM
//! extension, bound with `x11rb`. Mirrors `XShmCreateImage`/`XShmAttach`/
//! `XShmGetImage` in `video.c`/`main.c`.

use std::sync::Arc;

use x11rb::connection::Connection;
use x11rb::protocol::shm::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{ConnectionExt as _, ImageFormat};
use x11rb::rust_connection::RustConnection;

use super::FrameSource;
use crate::error::{Result, SpotlightError};

/// A capture rectangle on the root window.
#[derive(Debug, Clone, Copy)]
pub struct CaptureRect {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

/// Opens the Worker Ring's single shared display-server connection and
/// validates the MIT-SHM extension is present. Called once; every worker's
/// `X11FrameSource` is then attached onto the returned connection, mirroring
/// the original's `Display* display = XOpenDisplay(NULL)` stored once on the
/// orchestrator in `main.c` and used by every `video_worker()` thread.
pub fn open_shared_connection(display: Option<&str>) -> Result<(Arc<RustConnection>, u32)> {
    let (conn, screen_num) = x11rb::connect(display)
        .map_err(|e| SpotlightError::CaptureUnavailable(format!("X11 connect failed: {e}")))?;

    if conn
        .extension_information(shm::X11_EXTENSION_NAME)
        .map_err(|e| SpotlightError::CaptureUnavailable(e.to_string()))?
        .is_none()
    {
        return Err(SpotlightError::CaptureUnavailable(
            "MIT-SHM extension not present on display".into(),
        ));
    }

    let root = conn.setup().roots[screen_num].root;
    Ok((Arc::new(conn), root))
}

/// Captures `rect` of the root window into a BGRA buffer over the Worker
/// Ring's shared connection. Only the SHM segment and image buffer are
/// per-worker (per the data model's ownership split); the display
/// connection itself is borrowed, not owned.
pub struct X11FrameSource {
    conn: Arc<RustConnection>,
    root: u32,
    seg: shm::Seg,
    shmid: i32,
    shmaddr: *mut u8,
    rect: CaptureRect,
}

// SAFETY: `shmaddr` points at a SysV shared-memory segment owned exclusively
// by this instance and never shared across threads; `conn` is an `Arc` over
// a connection type the `x11rb` crate itself allows concurrent use of (its
// request/reply machinery is internally synchronized).
unsafe impl Send for X11FrameSource {}

impl X11FrameSource {
    /// Attaches a private SHM segment over `conn`, the already-open shared
    /// display connection (see `open_shared_connection`). Call once per
    /// video worker, cloning the same `Arc<RustConnection>` into each call.
    pub fn attach(conn: Arc<RustConnection>, root: u32, rect: CaptureRect) -> Result<Self> {
        let bytes = rect.width as usize * rect.height as usize * 4;
        let shmid = unsafe {
            libc_shmget(bytes)
                .map_err(|e| SpotlightError::Resource(format!("shmget failed: {e}")))?
        };
        let shmaddr = unsafe {
            libc_shmat(shmid)
                .map_err(|e| SpotlightError::Resource(format!("shmat failed: {e}")))?
        };

        let seg = conn
            .generate_id()
            .map_err(|e| SpotlightError::Resource(e.to_string()))?;
        conn.shm_attach(seg, shmid as u32, false)
            .map_err(|e| SpotlightError::Resource(format!("XShmAttach failed: {e}")))?
            .check()
            .map_err(|e| SpotlightError::Resource(format!("XShmAttach failed: {e}")))?;

        Ok(Self {
            conn,
            root,
            seg,
            shmid,
            shmaddr,
            rect,
        })
    }
}

impl FrameSource for X11FrameSource {
    fn capture(&mut self, into: &mut [u8]) -> Result<()> {
        let expected = self.rect.width as usize * self.rect.height as usize * 4;
        if into.len() != expected {
            return Err(SpotlightError::Resource(format!(
                "capture buffer is {} bytes, expected {}",
                into.len(),
                expected
            )));
        }

        let reply = self
            .conn
            .shm_get_image(
                self.root,
                self.rect.x,
                self.rect.y,
                self.rect.width,
                self.rect.height,
                !0,
                ImageFormat::Z_PIXMAP.into(),
                self.seg,
                0,
            )
            .map_err(|e| SpotlightError::DisplayLost(format!("ShmGetImage request failed: {e}")))?
            .reply()
            .map_err(|e| SpotlightError::DisplayLost(format!("ShmGetImage reply failed: {e}")))?;
        let _ = reply;

        unsafe {
            std::ptr::copy_nonoverlapping(self.shmaddr, into.as_mut_ptr(), expected);
        }
        Ok(())
    }
}

impl Drop for X11FrameSource {
    fn drop(&mut self) {
        let _ = self.conn.shm_detach(self.seg);
        unsafe {
            libc_shmdt(self.shmaddr);
            libc_shmctl_rmid(self.shmid);
        }
    }
}

// Thin wrappers around the three SysV shm syscalls this module needs, kept
// local so the rest of the module reads in terms of x11rb types only.
unsafe fn libc_shmget(bytes: usize) -> std::result::Result<i32, std::io::Error> {
    let id = libc::shmget(libc::IPC_PRIVATE, bytes, libc::IPC_CREAT | 0o600);
    if id == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(id)
    }
}

unsafe fn libc_shmat(shmid: i32) -> std::result::Result<*mut u8, std::io::Error> {
    let addr = libc::shmat(shmid, std::ptr::null(), 0);
    if addr as isize == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(addr as *mut u8)
    }
}

unsafe fn libc_shmdt(addr: *mut u8) {
    libc::shmdt(addr as *const _);
}

unsafe fn libc_shmctl_rmid(shmid: i32) {
    libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut());
}

/// A deterministic synthetic source for hermetic tests: every call fills
/// `into` with an incrementing byte pattern so tests can assert on frame
/// identity without a display server.
#[cfg(test)]
pub struct SyntheticFrameSource {
    pub next_value: u8,
}

#[cfg(test)]
impl FrameSource for SyntheticFrameSource {
    fn capture(&mut self, into: &mut [u8]) -> Result<()> {
        into.fill(self.next_value);
        self.next_value = self.next_value.wrapping_add(1);
        Ok(())
    }
}
