// SPDX-License-Identifier: Apache-2.0 OR MIT

//! QRTR datagram transport (§4.A).
//!
//! Thin wrapper around the `AF_QIPCRTR` socket family the kernel exposes
//! for talking to on-SoC coprocessors. Modeled on
//! `hdds::transport::shm::segment::ShmSegment`'s raw-syscall wrapper style:
//! every `unsafe` block carries its own safety argument and failures are
//! converted to a hand-rolled error enum rather than panicking.

use crate::addr::{Addr, ServiceId, NODE_BROADCAST, PORT_CTRL};
use crate::ctrl::{self, CtrlPacket};
use crate::error::TransportError;
use std::mem;
use std::os::unix::io::RawFd;

/// Linux's `AF_QIPCRTR` address family number. Not present in `libc`, so we
/// carry it ourselves the way the original `libqrtr.h` does.
const AF_QIPCRTR: libc::sa_family_t = 42;

/// Mirrors the kernel's `struct sockaddr_qrtr`.
#[repr(C)]
#[derive(Clone, Copy)]
struct SockaddrQrtr {
    sq_family: libc::sa_family_t,
    sq_node: u32,
    sq_port: u32,
}

impl SockaddrQrtr {
    fn new(node: u32, port: u32) -> Self {
        Self {
            sq_family: AF_QIPCRTR,
            sq_node: node,
            sq_port: port,
        }
    }

    fn as_addr(&self) -> Addr {
        Addr::new(self.sq_node, self.sq_port)
    }
}

/// A classified incoming datagram (§4.A `decode_packet`).
#[derive(Debug, Clone)]
pub enum Packet {
    Ctrl(CtrlPacket),
    Data { from: Addr, data: Vec<u8> },
}

/// An open QRTR datagram endpoint.
///
/// Carries a 1-second receive timeout as a liveness floor (§4.A): `recv_from`
/// never blocks forever, so the owning event loop always gets a chance to
/// check its shutdown signal counter.
pub struct Endpoint {
    fd: RawFd,
}

impl Endpoint {
    /// Open a QRTR datagram endpoint. If `local_port` is non-zero, bind to
    /// that well-known port; otherwise leave the port ephemeral (kernel
    /// assigned).
    pub fn open(local_port: u32) -> Result<Self, TransportError> {
        // SAFETY: socket(2) with a valid family/type/protocol triple; the
        // return value is checked below before use.
        let fd = unsafe { libc::socket(AF_QIPCRTR as libc::c_int, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let tv = libc::timeval {
            tv_sec: 1,
            tv_usec: 0,
        };
        // SAFETY: fd is the just-created valid socket; tv is a fully
        // initialised, correctly sized timeval.
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const _ as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            // SAFETY: fd was just opened above and is not used again on
            // this error path.
            unsafe { libc::close(fd) };
            return Err(err.into());
        }

        if local_port != 0 {
            // The kernel auto-binds a fresh socket to its node with an
            // ephemeral port; query that node id, then explicitly rebind to
            // the caller's well-known port on the same node.
            let mut probe = SockaddrQrtr::new(0, 0);
            let mut probe_len = mem::size_of::<SockaddrQrtr>() as libc::socklen_t;
            // SAFETY: probe/probe_len are correctly sized out parameters;
            // fd is the just-created valid socket.
            let rc = unsafe {
                libc::getsockname(fd, &mut probe as *mut _ as *mut libc::sockaddr, &mut probe_len)
            };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                // SAFETY: fd was just opened above and is not used again.
                unsafe { libc::close(fd) };
                return Err(err.into());
            }

            let sq = SockaddrQrtr::new(probe.sq_node, local_port);
            // SAFETY: sq is a fully initialised, correctly sized
            // sockaddr_qrtr; fd is valid.
            let rc = unsafe {
                libc::bind(
                    fd,
                    &sq as *const _ as *const libc::sockaddr,
                    mem::size_of::<SockaddrQrtr>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                // SAFETY: fd was just opened above and is not used again.
                unsafe { libc::close(fd) };
                return Err(err.into());
            }
        }

        Ok(Self { fd })
    }

    /// The endpoint's own `(node, port)`, as reported by `getsockname`.
    pub fn local_addr(&self) -> Result<Addr, TransportError> {
        let mut sq = SockaddrQrtr::new(0, 0);
        let mut len = mem::size_of::<SockaddrQrtr>() as libc::socklen_t;
        // SAFETY: sq and len are correctly sized/initialised out
        // parameters for getsockname; fd is valid for the endpoint's
        // lifetime.
        let rc = unsafe {
            libc::getsockname(self.fd, &mut sq as *mut _ as *mut libc::sockaddr, &mut len)
        };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(sq.as_addr())
    }

    /// Unreliable datagram send.
    pub fn send_to(&self, node: u32, port: u32, bytes: &[u8]) -> Result<(), TransportError> {
        let sq = SockaddrQrtr::new(node, port);
        // SAFETY: bytes is a valid slice for its own length; sq is a fully
        // initialised sockaddr_qrtr of the expected size; fd is valid.
        let rc = unsafe {
            libc::sendto(
                self.fd,
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
                0,
                &sq as *const _ as *const libc::sockaddr,
                mem::size_of::<SockaddrQrtr>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Receive up to the configured timeout, returning the payload and the
    /// sender's address.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(Vec<u8>, Addr), TransportError> {
        let mut sq = SockaddrQrtr::new(0, 0);
        let mut sl = mem::size_of::<SockaddrQrtr>() as libc::socklen_t;
        // SAFETY: buf is a valid, correctly-lengthed destination buffer;
        // sq/sl are correctly sized out parameters; fd is valid.
        let rc = unsafe {
            libc::recvfrom(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut sq as *mut _ as *mut libc::sockaddr,
                &mut sl,
            )
        };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok((buf[..rc as usize].to_vec(), sq.as_addr()))
    }

    /// Readability check with a caller-supplied timeout.
    pub fn poll(&self, timeout_ms: i32) -> Result<bool, TransportError> {
        let mut fds = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: fds is a single, correctly initialised pollfd; nfds
        // matches the array length of 1.
        let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(rc > 0 && (fds.revents & libc::POLLIN) != 0)
    }

    /// Classify a datagram received with `decode_packet`'s source address.
    pub fn decode_packet(bytes: &[u8], src: Addr) -> Result<Packet, TransportError> {
        if src.is_ctrl_port() {
            ctrl::decode_ctrl_packet(bytes, src).map(Packet::Ctrl)
        } else {
            Ok(Packet::Data {
                from: src,
                data: bytes.to_vec(),
            })
        }
    }

    /// Post a NEW_SERVER control packet advertising `id` at this endpoint's
    /// own address.
    pub fn publish(&self, id: ServiceId) -> Result<(), TransportError> {
        let local = self.local_addr()?;
        let buf = ctrl::encode_new_server(id, local);
        self.send_to(local.node, PORT_CTRL, &buf)
    }

    /// Post a DEL_SERVER control packet withdrawing `id`.
    pub fn withdraw(&self, id: ServiceId) -> Result<(), TransportError> {
        let local = self.local_addr()?;
        let buf = ctrl::encode_del_server(id, local);
        self.send_to(local.node, PORT_CTRL, &buf)
    }

    /// Subscribe to NS notifications for `id` (0 fields mean "any").
    pub fn new_lookup(&self, id: ServiceId) -> Result<(), TransportError> {
        let local = self.local_addr()?;
        let buf = ctrl::encode_new_lookup(id);
        self.send_to(local.node, PORT_CTRL, &buf)
    }

    /// Unsubscribe from NS notifications for `id`.
    pub fn del_lookup(&self, id: ServiceId) -> Result<(), TransportError> {
        let local = self.local_addr()?;
        let buf = ctrl::encode_del_lookup(id);
        self.send_to(local.node, PORT_CTRL, &buf)
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Reserved destination for control-channel broadcasts.
    pub const fn broadcast_addr() -> Addr {
        Addr::new(NODE_BROADCAST, PORT_CTRL)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        // SAFETY: fd is owned exclusively by this Endpoint and closed
        // exactly once here.
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_packet_classifies_data_vs_ctrl() {
        let data_pkt = Endpoint::decode_packet(b"hello", Addr::new(1, 5000)).unwrap();
        assert!(matches!(data_pkt, Packet::Data { .. }));

        let ctrl_bytes = ctrl::encode_hello();
        let ctrl_pkt = Endpoint::decode_packet(&ctrl_bytes, Addr::new(1, PORT_CTRL)).unwrap();
        assert!(matches!(ctrl_pkt, Packet::Ctrl(CtrlPacket::Hello { .. })));
    }
}
