// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Entry point: discover the shared-memory carveout, initialise storage,
//! publish the RMTFS QMI service and dispatch requests until a shutdown
//! signal lands or the transport resets. Mirrors `rmtfs.c`'s `main`/
//! `run_rmtfs`.

mod config;
mod partition;
mod qmi_messages;
mod remoteproc;
mod rmem;
mod service;
mod session;

use clap::Parser;
use config::Args;
use log::{info, warn};
use qrtr_core::qmi::QmiHeader;
use qrtr_core::{Addr, Endpoint, Packet, ServiceId, ShutdownSignal, TransportError};
use remoteproc::RemoteProc;
use rmem::RemoteMemory;
use session::Storage;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

/// Read the message id off a request's header without committing to a
/// particular body schema yet, so the dispatcher can route before the
/// per-message decoder runs.
fn peek_msg_id(buf: &[u8]) -> Option<u16> {
    QmiHeader::decode(buf).ok().map(|(h, _)| h.msg_id)
}

/// Dispatch one request datagram to its handler, returning the reply to
/// send back (if any).
fn handle_request(storage: &mut Storage, rmem: &RemoteMemory, from: Addr, buf: &[u8]) -> Option<Vec<u8>> {
    let msg_id = peek_msg_id(buf)?;
    let resp = match msg_id {
        qmi_messages::MSG_OPEN => service::handle_open(storage, from, buf),
        qmi_messages::MSG_CLOSE => service::handle_close(storage, from, buf),
        qmi_messages::MSG_RW_IOVEC => service::handle_iovec(storage, rmem, from, buf),
        qmi_messages::MSG_ALLOC_BUFF => service::handle_alloc_buf(rmem, from, buf),
        qmi_messages::MSG_GET_DEV_ERROR => service::handle_get_dev_error(storage, from, buf),
        other => {
            warn!("rmtfs: unhandled msg_id {other} from {from}");
            return None;
        }
    };
    Some(resp)
}

/// Poll the QMI socket and, if present, the remoteproc stop-notification
/// pipe. Mirrors `run_rmtfs`'s two-fd `select()` loop.
fn poll_fds(ep: &Endpoint, rproc: Option<&RemoteProc>, timeout_ms: i32) -> (bool, bool) {
    let mut fds = vec![libc::pollfd {
        fd: ep.raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    }];
    if let Some(rproc) = rproc {
        fds.push(libc::pollfd {
            fd: rproc.pipe_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
    }

    // SAFETY: fds is a correctly-sized, fully initialised pollfd array.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if rc <= 0 {
        return (false, false);
    }
    let qmi_ready = fds[0].revents & libc::POLLIN != 0;
    let pipe_ready = fds.get(1).is_some_and(|p| p.revents & libc::POLLIN != 0);
    (qmi_ready, pipe_ready)
}

/// Run one generation of the service loop until a fatal transport reset.
/// Returns `Ok(true)` to ask the caller to reopen and retry, `Ok(false)`
/// once shutdown has been fully handled.
fn run_rmtfs(
    ep: &mut Endpoint,
    storage: &mut Storage,
    rmem: &RemoteMemory,
    rproc: Option<&RemoteProc>,
    signal: &ShutdownSignal,
) -> Result<bool, TransportError> {
    let id = ServiceId::new(qmi_messages::SERVICE, qmi_messages::INSTANCE, qmi_messages::VERSION);
    ep.publish(id)?;
    info!("rmtfs service published ({}.{}.{})", id.service, id.instance, id.version);

    let mut buf = vec![0u8; 4096];
    let mut rproc_sync_handled = false;

    loop {
        if signal.count() > 0 {
            if let Some(rproc) = rproc {
                if !rproc_sync_handled {
                    info!("rmtfs: first shutdown signal, stopping mss rproc");
                    rproc.stop();
                    rproc_sync_handled = true;
                } else if signal.count() > 1 {
                    break;
                }
            } else {
                break;
            }
        }

        let (qmi_ready, pipe_ready) = poll_fds(ep, rproc, 1000);

        if pipe_ready {
            if let Some(rproc) = rproc {
                if rproc.drain_exit_signal() {
                    info!("rmtfs: mss rproc stopped, exiting");
                    break;
                }
            }
        }

        if !qmi_ready {
            continue;
        }

        let (bytes, from) = match ep.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(TransportError::Timeout) => continue,
            Err(TransportError::NetReset) => return Ok(true),
            Err(e) => return Err(e),
        };

        let pkt = match Endpoint::decode_packet(&bytes, from) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!("rmtfs: malformed packet from {from}: {e}");
                continue;
            }
        };

        let Packet::Data { from, data } = pkt else {
            continue;
        };

        if let Some(resp) = handle_request(storage, rmem, from, &data) {
            if let Err(e) = ep.send_to(from.node, from.port, &resp) {
                warn!("rmtfs: send to {from} failed: {e}");
            }
        }
    }

    ep.withdraw(id).ok();
    Ok(false)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let signal = ShutdownSignal::install()?;

    let rmem = RemoteMemory::open()?;
    let mut storage = Storage::new(args.storage_root.as_deref(), args.read_only, args.use_partitions);

    let rproc = if args.rproc_sync {
        match RemoteProc::discover() {
            Some(rproc) => {
                rproc.start();
                Some(rproc)
            }
            None => {
                warn!("rmtfs: --rproc-sync requested but no mss remoteproc instance found");
                None
            }
        }
    } else {
        None
    };

    let mut ep = Endpoint::open(0)?;

    loop {
        match run_rmtfs(&mut ep, &mut storage, &rmem, rproc.as_ref(), &signal) {
            Ok(true) => {
                warn!("rmtfs: transport reset, reopening");
                ep = Endpoint::open(0)?;
            }
            Ok(false) => break,
            Err(e) => return Err(e.into()),
        }
    }

    info!("rmtfs exiting cleanly");
    Ok(())
}
