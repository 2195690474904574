// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Command-line surface. `tqftpserv.c`'s `main` takes no arguments at all
//! and hardcodes its firmware/scratch paths as constants; this surface
//! exposes those paths (and a verbosity switch) as flags instead, matching
//! the shape `qrtr-rmtfs`'s own `config.rs` uses for its daemon.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "tqftpserv")]
#[command(author, version, about = "TQFTPSERV: firmware/scratch file server over QRTR", long_about = None)]
pub struct Args {
    /// Directory holding one subdirectory per `/sys/class/remoteproc`
    /// instance's `firmware` attribute. Defaults to `/sys/class/remoteproc`.
    #[arg(long = "remoteproc-class-dir")]
    pub remoteproc_class_dir: Option<String>,

    /// Base directory firmware images are resolved under. Defaults to
    /// `/lib/firmware`.
    #[arg(long = "firmware-base")]
    pub firmware_base: Option<String>,

    /// Scratch directory backing `/readwrite/` transfers. Defaults to
    /// `/tmp/tqftpserv`.
    #[arg(long = "scratch-dir")]
    pub scratch_dir: Option<String>,

    /// Verbose (debug-level) logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
