// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Entry point: bind the control socket, optionally force this node's
//! QRTR address, then dispatch control packets through [`server::Registry`]
//! until a shutdown signal lands or the socket faults.

mod config;
mod server;

use clap::Parser;
use config::Args;
use log::{debug, info, warn};
use qrtr_core::addr::{Addr, PORT_CTRL};
use qrtr_core::transport::{Endpoint, Packet};
use qrtr_core::{ctrl::CtrlPacket, ShutdownSignal, TransportError};
use server::{Outgoing, Registry};
use std::mem;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

/// Force this process's QRTR node address via `RTM_NEWADDR`, mirroring
/// `qrtr_set_address()`: a no-op if the control socket already reports
/// `addr` as its node.
fn set_node_address(addr: u32) -> std::io::Result<()> {
    let current = Endpoint::open(0).and_then(|ep| ep.local_addr());
    if let Ok(current) = current {
        if current.node == addr {
            return Ok(());
        }
    }

    #[repr(C)]
    struct Request {
        nh: libc::nlmsghdr,
        ifa: libc::ifaddrmsg,
        rta: libc::rtattr,
        addr: u32,
    }

    let nlmsg_len = mem::size_of::<libc::nlmsghdr>() + mem::size_of::<libc::ifaddrmsg>();
    let rta_len = mem::size_of::<libc::rtattr>() + mem::size_of::<u32>();
    let req = Request {
        nh: libc::nlmsghdr {
            nlmsg_len: (nlmsg_len + rta_len) as u32,
            nlmsg_type: libc::RTM_NEWADDR,
            nlmsg_flags: (libc::NLM_F_REQUEST | libc::NLM_F_ACK) as u16,
            nlmsg_seq: 0,
            nlmsg_pid: 0,
        },
        ifa: libc::ifaddrmsg {
            ifa_family: 42, // AF_QIPCRTR, see qrtr-core::transport
            ifa_prefixlen: 0,
            ifa_flags: 0,
            ifa_scope: 0,
            ifa_index: 0,
        },
        rta: libc::rtattr {
            rta_len: rta_len as u16,
            rta_type: libc::IFA_LOCAL,
        },
        addr,
    };

    // SAFETY: AF_NETLINK/SOCK_DGRAM/NETLINK_ROUTE is a valid socket triple;
    // the return value is checked before use.
    let sock = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_DGRAM, libc::NETLINK_ROUTE) };
    if sock < 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: req is a fully initialised, correctly sized netlink request
    // buffer; sock is the just-created valid socket.
    let rc = unsafe {
        libc::send(
            sock,
            &req as *const _ as *const libc::c_void,
            req.nh.nlmsg_len as usize,
            0,
        )
    };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        // SAFETY: sock was just opened and is not used again on this path.
        unsafe { libc::close(sock) };
        return Err(err);
    }

    let mut resp_buf = [0u8; 64];
    // SAFETY: resp_buf is a valid, correctly-lengthed destination buffer.
    let rc = unsafe {
        libc::recv(
            sock,
            resp_buf.as_mut_ptr() as *mut libc::c_void,
            resp_buf.len(),
            0,
        )
    };
    // SAFETY: sock is not used again after this call.
    unsafe { libc::close(sock) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Mirrors `ns.c`'s `ctrl_pkt_strings` table, used for the unconditional
/// per-command debug line logged before dispatch.
fn ctrl_pkt_name(pkt: &CtrlPacket) -> &'static str {
    match pkt {
        CtrlPacket::Hello { .. } => "hello",
        CtrlPacket::Bye { .. } => "bye",
        CtrlPacket::DelClient { .. } => "del-client",
        CtrlPacket::NewServer { .. } => "new-server",
        CtrlPacket::DelServer { .. } => "del-server",
        CtrlPacket::NewLookup { .. } => "new-lookup",
        CtrlPacket::DelLookup { .. } => "del-lookup",
        CtrlPacket::Unknown { .. } => "unknown",
    }
}

fn send_all(ep: &Endpoint, outgoing: Vec<Outgoing>) {
    for out in outgoing {
        if let Err(e) = ep.send_to(out.to.node, out.to.port, &out.bytes) {
            warn!("send to {} failed: {e}", out.to);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Some(node_id) = args.node_id {
        set_node_address(node_id)?;
    }

    let signal = ShutdownSignal::install()?;

    let mut ep = Endpoint::open(PORT_CTRL)?;
    let local = ep.local_addr()?;
    let mut registry = Registry::new(local.node);
    info!("qrtr-ns starting on node {}", local.node);

    let bcast = Addr::broadcast_ctrl();
    ep.send_to(bcast.node, bcast.port, &qrtr_core::ctrl::encode_hello())?;

    let mut buf = vec![0u8; 4096];
    while !signal.requested() {
        let (bytes, from) = match ep.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(TransportError::Timeout) => continue,
            Err(TransportError::NetReset) => {
                warn!("control socket reset, reopening");
                ep = Endpoint::open(PORT_CTRL)?;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let pkt = match Endpoint::decode_packet(&bytes, from) {
            Ok(Packet::Ctrl(pkt)) => pkt,
            Ok(Packet::Data { .. }) => continue,
            Err(e) => {
                debug!("malformed control packet from {from}: {e}");
                continue;
            }
        };

        debug!("{} from {from}", ctrl_pkt_name(&pkt));

        let outgoing = match pkt {
            CtrlPacket::Hello { from } => registry.handle_hello(from),
            CtrlPacket::Bye { from } => registry.handle_bye(from.node),
            CtrlPacket::DelClient { from, node, port } => {
                match registry.handle_del_client(from, node, port) {
                    Ok(out) => out,
                    Err(()) => {
                        debug!("rejected spoofed del_client from {from}");
                        continue;
                    }
                }
            }
            CtrlPacket::NewServer { from, id, server } => {
                match registry.handle_new_server(from, id.service, id.raw(), server.node, server.port) {
                    Ok(out) => out,
                    Err(()) => {
                        debug!("rejected new_server from {from}");
                        continue;
                    }
                }
            }
            CtrlPacket::DelServer { from, id, server } => {
                match registry.handle_del_server(from, id.service, id.raw(), server.node, server.port) {
                    Ok(out) => out,
                    Err(()) => {
                        debug!("rejected del_server from {from}");
                        continue;
                    }
                }
            }
            CtrlPacket::NewLookup { from, id } => {
                match registry.handle_new_lookup(from, id.service, id.raw()) {
                    Ok(out) => out,
                    Err(()) => {
                        debug!("rejected remote new_lookup from {from}");
                        continue;
                    }
                }
            }
            CtrlPacket::DelLookup { from, id } => {
                registry.handle_del_lookup(from, id.service, id.raw());
                continue;
            }
            CtrlPacket::Unknown { from, cmd } => {
                debug!("unhandled control command {cmd:#x} from {from}");
                continue;
            }
        };

        send_all(&ep, outgoing);
    }

    info!("qrtr-ns exiting cleanly");
    Ok(())
}
