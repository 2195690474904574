// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shutdown-signal plumbing shared by the three daemons.
//!
//! Each daemon's event loop is a blocking `recv_from`/`poll` cycle, so
//! there's no async runtime to hand a cancellation token to. Instead a
//! single process-wide counter is bumped from the `SIGINT`/`SIGTERM`
//! handler and the loop checks it once per iteration — the handler itself
//! does nothing but the atomic increment, keeping it signal-safe.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct ShutdownSignal {
    count: Arc<AtomicUsize>,
}

impl ShutdownSignal {
    /// Install the `SIGINT`/`SIGTERM` handler and return a handle the
    /// caller's event loop polls.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let count = Arc::new(AtomicUsize::new(0));
        let handler_count = count.clone();
        ctrlc::set_handler(move || {
            handler_count.fetch_add(1, Ordering::SeqCst);
        })?;
        Ok(Self { count })
    }

    /// True once a shutdown signal has been observed.
    pub fn requested(&self) -> bool {
        self.count.load(Ordering::SeqCst) > 0
    }

    /// Raw signal count, for daemons that escalate behaviour on a second
    /// signal (RMTFS: first SIGINT stops the coupled remoteproc, second
    /// breaks the event loop immediately).
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[test]
    fn fresh_signal_is_not_requested() {
        let signal = ShutdownSignal {
            count: Arc::new(StdAtomicUsize::new(0)),
        };
        assert!(!signal.requested());
    }

    #[test]
    fn bumped_counter_is_requested() {
        let signal = ShutdownSignal {
            count: Arc::new(StdAtomicUsize::new(1)),
        };
        assert!(signal.requested());
    }
}
