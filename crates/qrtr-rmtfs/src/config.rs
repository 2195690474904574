// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Command-line surface (§6 "CLI surface (RMTFS)"), matching `rmtfs.c`'s
//! `getopt(argc, argv, "o:Prsv")`. Note `-s` here means "drive the mss
//! remoteproc sync coupling", not syslog — this daemon's flag surface is
//! not symmetric with `qrtr-ns`'s own `-s`.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "rmtfs")]
#[command(author, version, about = "RMTFS: remote filesystem access service", long_about = None)]
pub struct Args {
    /// Storage root directory (plain files, or a by-partlabel directory
    /// when combined with --use-partitions). Defaults to `/boot`, or
    /// `/dev/disk/by-partlabel` when --use-partitions is set with no
    /// explicit root.
    #[arg(short = 'o', long = "storage-root")]
    pub storage_root: Option<String>,

    /// Serve raw EFS partitions by name/partlabel instead of plain files.
    #[arg(short = 'P', long = "use-partitions")]
    pub use_partitions: bool,

    /// Avoid writing to real storage; buffer writes in memory instead.
    #[arg(short = 'r', long = "read-only")]
    pub read_only: bool,

    /// Drive the mss remoteproc instance's start/stop lifecycle.
    #[arg(short = 's', long = "rproc-sync")]
    pub rproc_sync: bool,

    /// Verbose (debug-level) logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
