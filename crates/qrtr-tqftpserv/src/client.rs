// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-client reader/writer state machines (§4.E), mirroring
//! `tftp_client`/`handle_reader`/`handle_writer` in `tqftpserv.c`: each
//! client owns a freshly opened, peer-scoped [`Endpoint`] plus the open
//! file it serves. A datagram whose source doesn't match the client's
//! peer is discarded and closes the client, matching the original's
//! `sq.sq_node != client->sq.sq_node` check.

use crate::protocol::{self, ERR_ILLEGAL_OPERATION};
use log::{debug, warn};
use qrtr_core::{Addr, Endpoint, TransportError};
use std::fs::File;
use std::io::Write as _;
use std::os::unix::fs::FileExt;
use std::os::unix::io::RawFd;

pub enum Outcome {
    Continue,
    Done,
}

pub struct ReaderClient {
    ep: Endpoint,
    peer: Addr,
    file: File,
    blksize: usize,
    wsize: usize,
}

impl ReaderClient {
    pub fn new(ep: Endpoint, peer: Addr, file: File, blksize: usize, wsize: usize) -> Self {
        Self {
            ep,
            peer,
            file,
            blksize: blksize.max(1),
            wsize: wsize.max(1),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.ep.raw_fd()
    }

    pub fn peer(&self) -> Addr {
        self.peer
    }

    /// Send one DATA block, returning the number of payload bytes sent.
    /// A short (including zero-length) block terminates the transfer, so
    /// it is still sent: the client needs to see it to stop asking.
    fn send_block(&mut self, block: u16, offset: u64) -> Option<usize> {
        let mut chunk = vec![0u8; self.blksize];
        let n = self.file.read_at(&mut chunk, offset).unwrap_or(0);
        chunk.truncate(n);
        let pkt = protocol::encode_data(block, &chunk);
        match self.ep.send_to(self.peer.node, self.peer.port, &pkt) {
            Ok(()) => Some(n),
            Err(e) => {
                warn!("tqftpserv: send data to {} failed: {e}", self.peer);
                None
            }
        }
    }

    /// Send the unsolicited first DATA block for an RRQ with no options.
    pub fn send_initial_block(&mut self) {
        self.send_block(1, 0);
    }

    /// Send a fully pre-built packet (used for the OACK reply).
    pub fn send_raw(&self, pkt: &[u8]) {
        if let Err(e) = self.ep.send_to(self.peer.node, self.peer.port, pkt) {
            warn!("tqftpserv: send to {} failed: {e}", self.peer);
        }
    }

    pub fn file_len(&self) -> u64 {
        self.file.metadata().map(|m| m.len()).unwrap_or(0)
    }

    /// Handle one readable event on this client's socket.
    pub fn handle_readable(&mut self) -> Outcome {
        let mut buf = [0u8; 128];
        let (bytes, from) = match self.ep.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(TransportError::Timeout) => return Outcome::Continue,
            Err(e) => {
                warn!("tqftpserv: reader recv failed: {e}");
                return Outcome::Done;
            }
        };

        if from != self.peer {
            debug!("tqftpserv: discarding spoofed message from {from}, expected {}", self.peer);
            return Outcome::Done;
        }

        match protocol::opcode_of(&bytes) {
            Ok(protocol::OP_ERROR) => {
                if let Ok((code, msg)) = protocol::decode_error(&bytes) {
                    warn!("tqftpserv: peer returned error {code}: {msg}");
                }
                Outcome::Done
            }
            Ok(protocol::OP_ACK) => {
                let last = protocol::decode_ack(&bytes).unwrap_or(0);
                for block in last..last.saturating_add(self.wsize as u16) {
                    match self.send_block(block + 1, block as u64 * self.blksize as u64) {
                        Some(n) if n == self.blksize => continue,
                        Some(_) => return Outcome::Done,
                        None => return Outcome::Done,
                    }
                }
                Outcome::Continue
            }
            Ok(op) => {
                debug!("tqftpserv: expected ACK, got opcode {op}");
                Outcome::Done
            }
            Err(e) => {
                debug!("tqftpserv: malformed reader packet: {e}");
                Outcome::Done
            }
        }
    }
}

pub struct WriterClient {
    ep: Endpoint,
    peer: Addr,
    file: File,
}

impl WriterClient {
    pub fn new(ep: Endpoint, peer: Addr, file: File) -> Self {
        Self { ep, peer, file }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.ep.raw_fd()
    }

    pub fn peer(&self) -> Addr {
        self.peer
    }

    /// Acknowledge block 0, completing the WRQ handshake.
    pub fn send_initial_ack(&mut self) -> bool {
        self.ep.send_to(self.peer.node, self.peer.port, &protocol::encode_ack(0)).is_ok()
    }

    pub fn handle_readable(&mut self) -> Outcome {
        let mut buf = [0u8; 516];
        let (bytes, from) = match self.ep.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(TransportError::Timeout) => return Outcome::Continue,
            Err(e) => {
                warn!("tqftpserv: writer recv failed: {e}");
                return Outcome::Done;
            }
        };

        if from != self.peer {
            return Outcome::Done;
        }

        let (block, payload) = match protocol::decode_data(&bytes) {
            Ok(pair) => pair,
            Err(_) => {
                let op = protocol::opcode_of(&bytes).unwrap_or(0);
                warn!("tqftpserv: expected DATA opcode, got {op}");
                self.ep
                    .send_to(self.peer.node, self.peer.port, &protocol::encode_error(ERR_ILLEGAL_OPERATION, "Expected DATA opcode"))
                    .ok();
                return Outcome::Done;
            }
        };

        if let Err(e) = self.file.write_all(payload) {
            warn!("tqftpserv: failed to write data: {e}");
            return Outcome::Done;
        }

        self.ep.send_to(self.peer.node, self.peer.port, &protocol::encode_ack(block)).ok();

        if payload.len() == 512 {
            Outcome::Continue
        } else {
            Outcome::Done
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    fn scratch_file(contents: &[u8]) -> File {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(contents).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f
    }

    fn recv_data(ep: &Endpoint) -> (u16, Vec<u8>) {
        let mut buf = [0u8; 1024];
        let (bytes, _) = ep.recv_from(&mut buf).unwrap();
        let (block, payload) = protocol::decode_data(&bytes).unwrap();
        (block, payload.to_vec())
    }

    #[test]
    fn ack_triggers_window_sized_burst_of_data_blocks() {
        let reader_ep = Endpoint::open(0).unwrap();
        let reader_addr = reader_ep.local_addr().unwrap();
        let peer_ep = Endpoint::open(0).unwrap();
        let peer_addr = peer_ep.local_addr().unwrap();

        let blksize = 8;
        let wsize = 3;
        let file = scratch_file(&[1u8; blksize * wsize]); // exactly wsize full blocks
        let mut client = ReaderClient::new(reader_ep, peer_addr, file, blksize, wsize);

        peer_ep.send_to(reader_addr.node, reader_addr.port, &protocol::encode_ack(0)).unwrap();
        assert!(matches!(client.handle_readable(), Outcome::Continue));

        for expected_block in 1..=wsize as u16 {
            let (block, payload) = recv_data(&peer_ep);
            assert_eq!(block, expected_block);
            assert_eq!(payload.len(), blksize);
        }
    }

    #[test]
    fn short_block_ends_transfer_after_fewer_than_wsize_sends() {
        let reader_ep = Endpoint::open(0).unwrap();
        let reader_addr = reader_ep.local_addr().unwrap();
        let peer_ep = Endpoint::open(0).unwrap();
        let peer_addr = peer_ep.local_addr().unwrap();

        let blksize = 8;
        // One full block plus a short tail; window asks for 4 but only 2
        // exist before the file runs out.
        let file = scratch_file(&[2u8; blksize + 3]);
        let mut client = ReaderClient::new(reader_ep, peer_addr, file, blksize, 4);

        peer_ep.send_to(reader_addr.node, reader_addr.port, &protocol::encode_ack(0)).unwrap();
        assert!(matches!(client.handle_readable(), Outcome::Done));

        let (block1, payload1) = recv_data(&peer_ep);
        assert_eq!(block1, 1);
        assert_eq!(payload1.len(), blksize);

        let (block2, payload2) = recv_data(&peer_ep);
        assert_eq!(block2, 2);
        assert_eq!(payload2.len(), 3);
    }

    #[test]
    fn zero_length_file_ends_transfer_on_first_empty_block() {
        let reader_ep = Endpoint::open(0).unwrap();
        let reader_addr = reader_ep.local_addr().unwrap();
        let peer_ep = Endpoint::open(0).unwrap();
        let peer_addr = peer_ep.local_addr().unwrap();

        let file = scratch_file(&[]);
        let mut client = ReaderClient::new(reader_ep, peer_addr, file, 512, 4);

        peer_ep.send_to(reader_addr.node, reader_addr.port, &protocol::encode_ack(0)).unwrap();
        assert!(matches!(client.handle_readable(), Outcome::Done));

        let (block, payload) = recv_data(&peer_ep);
        assert_eq!(block, 1);
        assert!(payload.is_empty());
    }

    #[test]
    fn reader_closes_on_spoofed_source() {
        let reader_ep = Endpoint::open(0).unwrap();
        let reader_addr = reader_ep.local_addr().unwrap();
        let peer_ep = Endpoint::open(0).unwrap();
        let peer_addr = peer_ep.local_addr().unwrap();
        let attacker_ep = Endpoint::open(0).unwrap();

        let file = scratch_file(&[0u8; 16]);
        let mut client = ReaderClient::new(reader_ep, peer_addr, file, 8, 2);

        attacker_ep.send_to(reader_addr.node, reader_addr.port, &protocol::encode_ack(0)).unwrap();
        assert!(matches!(client.handle_readable(), Outcome::Done));
    }

    #[test]
    fn writer_closes_on_spoofed_source() {
        let writer_ep = Endpoint::open(0).unwrap();
        let writer_addr = writer_ep.local_addr().unwrap();
        let peer_ep = Endpoint::open(0).unwrap();
        let peer_addr = peer_ep.local_addr().unwrap();
        let attacker_ep = Endpoint::open(0).unwrap();

        let file = scratch_file(&[]);
        let mut client = WriterClient::new(writer_ep, peer_addr, file);

        attacker_ep
            .send_to(writer_addr.node, writer_addr.port, &protocol::encode_data(1, &[0u8; 512]))
            .unwrap();
        assert!(matches!(client.handle_readable(), Outcome::Done));
    }

    #[test]
    fn writer_continues_on_full_block_completes_on_short_block() {
        let writer_ep = Endpoint::open(0).unwrap();
        let writer_addr = writer_ep.local_addr().unwrap();
        let peer_ep = Endpoint::open(0).unwrap();
        let peer_addr = peer_ep.local_addr().unwrap();

        let file = scratch_file(&[]);
        let mut client = WriterClient::new(writer_ep, peer_addr, file);

        peer_ep.send_to(writer_addr.node, writer_addr.port, &protocol::encode_data(1, &[9u8; 512])).unwrap();
        assert!(matches!(client.handle_readable(), Outcome::Continue));

        peer_ep.send_to(writer_addr.node, writer_addr.port, &protocol::encode_data(2, &[9u8; 10])).unwrap();
        assert!(matches!(client.handle_readable(), Outcome::Done));
    }
}
