// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Entry point: publish the TQFTPSERV QMI service, accept RRQ/WRQ on the
//! listening socket and drive each accepted client's reader/writer state
//! machine until it completes or a control packet tears it down. Mirrors
//! `tqftpserv.c`'s `main` and its `select()` loop over the listening
//! socket plus every open client socket.

mod client;
mod config;
mod options;
mod path;
mod protocol;
mod service;

use clap::Parser;
use client::{Outcome, ReaderClient, WriterClient};
use config::Args;
use log::{info, warn};
use path::Translator;
use qrtr_core::containers::IntrusiveList;
use qrtr_core::ctrl::CtrlPacket;
use qrtr_core::{Addr, Endpoint, Packet, ServiceId, ShutdownSignal, TransportError};

const SERVICE: u32 = 4096;
const INSTANCE: u32 = 0;
const VERSION: u8 = 1;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

/// Poll the listening socket and every accepted client's socket in one
/// shot, returning which fds are readable by position
/// `(listener, reader_ready[], writer_ready[])`.
fn poll_all(listener: &Endpoint, readers: &IntrusiveList<ReaderClient>, writers: &IntrusiveList<WriterClient>, timeout_ms: i32) -> (bool, Vec<bool>, Vec<bool>) {
    let mut fds = vec![libc::pollfd {
        fd: listener.raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    }];
    for r in readers.iter() {
        fds.push(libc::pollfd {
            fd: r.raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
    }
    for w in writers.iter() {
        fds.push(libc::pollfd {
            fd: w.raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
    }

    // SAFETY: fds is a correctly-sized, fully initialised pollfd array.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if rc <= 0 {
        return (false, vec![false; readers.len()], vec![false; writers.len()]);
    }

    let listener_ready = fds[0].revents & libc::POLLIN != 0;
    let reader_ready = fds[1..1 + readers.len()].iter().map(|p| p.revents & libc::POLLIN != 0).collect();
    let writer_ready = fds[1 + readers.len()..].iter().map(|p| p.revents & libc::POLLIN != 0).collect();
    (listener_ready, reader_ready, writer_ready)
}

fn handle_listener(translator: &Translator, readers: &mut IntrusiveList<ReaderClient>, writers: &mut IntrusiveList<WriterClient>, from: Addr, data: &[u8]) {
    match protocol::opcode_of(data) {
        Ok(protocol::OP_RRQ) => {
            if let Some(client) = service::handle_rrq(translator, from, &data[2..]) {
                readers.push(client);
            }
        }
        Ok(protocol::OP_WRQ) => {
            if let Some(client) = service::handle_wrq(translator, from, &data[2..]) {
                writers.push(client);
            }
        }
        Ok(op) => warn!("tqftpserv: unexpected opcode {op} on listening socket from {from}"),
        Err(e) => warn!("tqftpserv: malformed packet on listening socket from {from}: {e}"),
    }
}

/// Close every client whose peer matches a BYE (`from.node` only) or
/// DEL_CLIENT (full `node`+`port`) control notification.
fn handle_ctrl(readers: &mut IntrusiveList<ReaderClient>, writers: &mut IntrusiveList<WriterClient>, pkt: CtrlPacket) {
    match pkt {
        CtrlPacket::Bye { from } => {
            readers.remove_matching(|c| c.peer().node == from.node);
            writers.remove_matching(|c| c.peer().node == from.node);
        }
        CtrlPacket::DelClient { node, port, .. } => {
            let addr = Addr::new(node, port);
            readers.remove_matching(|c| c.peer() == addr);
            writers.remove_matching(|c| c.peer() == addr);
        }
        _ => {}
    }
}

/// Run one generation of the service loop until a fatal transport reset on
/// the listening socket. Returns `Ok(true)` to ask the caller to reopen,
/// `Ok(false)` once shutdown has been handled.
fn run_tqftpserv(listener: &mut Endpoint, translator: &Translator, signal: &ShutdownSignal) -> Result<bool, TransportError> {
    let id = ServiceId::new(SERVICE, INSTANCE, VERSION);
    listener.publish(id)?;
    info!("tqftpserv service published ({}.{}.{})", id.service, id.instance, id.version);

    let mut readers: IntrusiveList<ReaderClient> = IntrusiveList::new();
    let mut writers: IntrusiveList<WriterClient> = IntrusiveList::new();
    let mut buf = vec![0u8; 2048];

    loop {
        if signal.requested() {
            break;
        }

        let (listener_ready, reader_ready, writer_ready) = poll_all(listener, &readers, &writers, 1000);

        if listener_ready {
            match listener.recv_from(&mut buf) {
                Ok((bytes, from)) => match Endpoint::decode_packet(&bytes, from) {
                    Ok(Packet::Data { from, data }) => handle_listener(translator, &mut readers, &mut writers, from, &data),
                    Ok(Packet::Ctrl(pkt)) => handle_ctrl(&mut readers, &mut writers, pkt),
                    Err(e) => warn!("tqftpserv: malformed packet from {from}: {e}"),
                },
                Err(TransportError::Timeout) => {}
                Err(TransportError::NetReset) => return Ok(true),
                Err(e) => return Err(e),
            }
        }

        let ready_reader_peers: Vec<Addr> = readers
            .iter()
            .zip(reader_ready.iter())
            .filter(|(_, &ready)| ready)
            .map(|(c, _)| c.peer())
            .collect();
        let mut done_readers = Vec::new();
        for peer in ready_reader_peers {
            if let Some(client) = readers.find_mut(|c| c.peer() == peer) {
                if matches!(client.handle_readable(), Outcome::Done) {
                    done_readers.push(peer);
                }
            }
        }
        readers.remove_matching(|c| done_readers.contains(&c.peer()));

        let ready_writer_peers: Vec<Addr> = writers
            .iter()
            .zip(writer_ready.iter())
            .filter(|(_, &ready)| ready)
            .map(|(c, _)| c.peer())
            .collect();
        let mut done_writers = Vec::new();
        for peer in ready_writer_peers {
            if let Some(client) = writers.find_mut(|c| c.peer() == peer) {
                if matches!(client.handle_readable(), Outcome::Done) {
                    done_writers.push(peer);
                }
            }
        }
        writers.remove_matching(|c| done_writers.contains(&c.peer()));
    }

    listener.withdraw(id).ok();
    Ok(false)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let signal = ShutdownSignal::install()?;

    let translator = Translator::new(
        args.remoteproc_class_dir.unwrap_or_else(|| "/sys/class/remoteproc".to_string()),
        args.firmware_base.unwrap_or_else(|| "/lib/firmware".to_string()),
        args.scratch_dir.unwrap_or_else(|| "/tmp/tqftpserv".to_string()),
    );

    let mut listener = Endpoint::open(0)?;

    loop {
        match run_tqftpserv(&mut listener, &translator, &signal) {
            Ok(true) => {
                warn!("tqftpserv: transport reset, reopening");
                listener = Endpoint::open(0)?;
            }
            Ok(false) => break,
            Err(e) => return Err(e.into()),
        }
    }

    info!("tqftpserv exiting cleanly");
    Ok(())
}
