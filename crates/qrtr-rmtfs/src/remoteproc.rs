// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Optional MSS remoteproc start/stop coupling (§4.D "Remoteproc sync",
//! `-s`).
//!
//! When enabled, this daemon drives the modem's `qcom-q6v5-mss` remoteproc
//! instance directly: it writes `start` to the instance's `state` sysfs
//! file once the QMI service is up, and `stop` when asked to shut down.
//! Both writes happen on a helper thread (mirroring `rproc.c`'s detached
//! pthreads) so a wedged write never blocks the event loop; the stop path
//! additionally signals a pipe the event loop polls alongside the QMI
//! socket, the same two-fd `select()` shape as `run_rmtfs`.

use log::warn;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::thread;

const RPROC_BASE_PATH: &str = "/sys/bus/platform/drivers/qcom-q6v5-mss";

fn find_state_file() -> Option<PathBuf> {
    for device in std::fs::read_dir(RPROC_BASE_PATH).ok()?.flatten() {
        let rproc_dir = device.path().join("remoteproc");
        let Ok(entries) = std::fs::read_dir(&rproc_dir) else {
            continue;
        };
        for rproc in entries.flatten() {
            let state = rproc.path().join("state");
            if state.exists() {
                return Some(state);
            }
        }
    }
    None
}

pub struct RemoteProc {
    state_path: PathBuf,
    pipe_read: RawFd,
    pipe_write: RawFd,
}

impl RemoteProc {
    /// Locate the MSS remoteproc `state` control file and open a
    /// notification pipe. Returns `None` if no matching remoteproc
    /// instance exists, the way `rproc_init` returns a negative fd.
    pub fn discover() -> Option<Self> {
        let state_path = find_state_file()?;

        let mut fds = [0i32; 2];
        // SAFETY: fds is a valid 2-element out array sized for pipe(2).
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc < 0 {
            return None;
        }

        Some(Self {
            state_path,
            pipe_read: fds[0],
            pipe_write: fds[1],
        })
    }

    /// File descriptor the event loop should poll for the stop
    /// acknowledgment.
    pub fn pipe_fd(&self) -> RawFd {
        self.pipe_read
    }

    fn write_state(path: &Path, value: &'static str) {
        match OpenOptions::new().write(true).open(path) {
            Ok(mut f) => {
                if let Err(e) = f.write_all(value.as_bytes()) {
                    warn!("failed to write remoteproc state {value:?}: {e}");
                }
            }
            Err(e) => warn!("failed to open remoteproc state file: {e}"),
        }
    }

    /// Request the remoteproc instance start, on a helper thread.
    pub fn start(&self) {
        let path = self.state_path.clone();
        thread::spawn(move || Self::write_state(&path, "start"));
    }

    /// Request the remoteproc instance stop, then signal the event loop's
    /// pipe once the write completes.
    pub fn stop(&self) {
        let path = self.state_path.clone();
        let pipe_write = self.pipe_write;
        thread::spawn(move || {
            Self::write_state(&path, "stop");
            // SAFETY: pipe_write is the write end of a pipe owned by this
            // RemoteProc for its whole lifetime; a single byte fits in one
            // write and needs no partial-write handling.
            unsafe {
                libc::write(pipe_write, b"Y".as_ptr() as *const libc::c_void, 1);
            }
        });
    }

    /// Drain one notification byte from the pipe. Returns true once the
    /// stop thread has signaled completion (or the pipe hit EOF), meaning
    /// the event loop should exit.
    pub fn drain_exit_signal(&self) -> bool {
        let mut buf = [0u8; 1];
        // SAFETY: pipe_read is a valid read end owned by this RemoteProc;
        // buf is sized for the single-byte read.
        let n = unsafe { libc::read(self.pipe_read, buf.as_mut_ptr() as *mut libc::c_void, 1) };
        n <= 0 || buf[0] == b'Y'
    }
}

impl Drop for RemoteProc {
    fn drop(&mut self) {
        // SAFETY: both fds are owned exclusively by this RemoteProc and
        // closed exactly once here.
        unsafe {
            libc::close(self.pipe_read);
            libc::close(self.pipe_write);
        }
    }
}
