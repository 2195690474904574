// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Command-line surface (§6 "CLI surface (NS)").

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "qrtr-ns")]
#[command(author, version, about = "QRTR name server", long_about = None)]
pub struct Args {
    /// Stay in the foreground instead of forking to background.
    #[arg(short = 'f', long)]
    pub foreground: bool,

    /// Log to syslog instead of stderr.
    #[arg(short = 's', long)]
    pub syslog: bool,

    /// Verbose (debug-level) logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Force this node's QRTR address before binding the control socket.
    pub node_id: Option<u32>,
}
