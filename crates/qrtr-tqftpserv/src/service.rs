// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RRQ/WRQ handling (§4.E), mirroring `handle_rrq`/`handle_wrq`: parse the
//! request, translate its path, open a fresh peer-scoped endpoint, and
//! either start a reader (sending OACK or the first DATA block) or a
//! writer (sending ACK 0).

use crate::client::{ReaderClient, WriterClient};
use crate::options::RequestOptions;
use crate::path::Translator;
use crate::protocol::{self, ERR_FILE_NOT_FOUND};
use log::{debug, warn};
use qrtr_core::{Addr, Endpoint};

pub fn handle_rrq(translator: &Translator, from: Addr, body: &[u8]) -> Option<ReaderClient> {
    let req = match protocol::decode_request(body) {
        Ok(req) => req,
        Err(e) => {
            debug!("tqftpserv: malformed RRQ from {from}: {e}");
            return None;
        }
    };
    if !req.mode.eq_ignore_ascii_case("octet") {
        debug!("tqftpserv: RRQ mode {:?} not octet, reject", req.mode);
        return None;
    }

    let opts = RequestOptions::parse(&req.options);

    let ep = match Endpoint::open(0) {
        Ok(ep) => ep,
        Err(e) => {
            warn!("tqftpserv: unable to open socket for RRQ from {from}: {e}");
            return None;
        }
    };

    let file = match translator.open(&req.filename, false) {
        Ok(f) => f,
        Err(e) => {
            debug!("tqftpserv: unable to open {} ({e}), reject", req.filename);
            ep.send_to(from.node, from.port, &protocol::encode_error(ERR_FILE_NOT_FOUND, "file not found")).ok();
            return None;
        }
    };

    debug!("tqftpserv: RRQ {} (octet)", req.filename);

    let mut client = ReaderClient::new(ep, from, file, opts.blksize, opts.wsize);
    if opts.negotiated {
        let size = client.file_len();
        let oack = opts.to_oack(size);
        client.send_raw(&oack);
    } else {
        client.send_initial_block();
    }
    Some(client)
}

pub fn handle_wrq(translator: &Translator, from: Addr, body: &[u8]) -> Option<WriterClient> {
    let req = match protocol::decode_request(body) {
        Ok(req) => req,
        Err(e) => {
            debug!("tqftpserv: malformed WRQ from {from}: {e}");
            return None;
        }
    };
    if !req.mode.eq_ignore_ascii_case("octet") {
        debug!("tqftpserv: WRQ mode {:?} not octet, reject", req.mode);
        return None;
    }

    debug!("tqftpserv: WRQ {} (octet)", req.filename);

    let file = match translator.open(&req.filename, true) {
        Ok(f) => f,
        Err(e) => {
            debug!("tqftpserv: unable to open {} ({e}), reject", req.filename);
            return None;
        }
    };

    let ep = match Endpoint::open(0) {
        Ok(ep) => ep,
        Err(e) => {
            warn!("tqftpserv: unable to open socket for WRQ from {from}: {e}");
            return None;
        }
    };

    let mut client = WriterClient::new(ep, from, file);
    if !client.send_initial_ack() {
        warn!("tqftpserv: unable to send initial ack to {from}");
        return None;
    }
    Some(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;

    fn translator(root: &std::path::Path) -> Translator {
        fs::create_dir_all(root.join("class")).unwrap();
        Translator::new(root.join("class"), root.join("firmware"), root.join("scratch"))
    }

    fn encode_request(op: u16, filename: &str, mode: &str, options: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&op.to_be_bytes());
        buf.extend_from_slice(filename.as_bytes());
        buf.push(0);
        buf.extend_from_slice(mode.as_bytes());
        buf.push(0);
        for (k, v) in options {
            buf.extend_from_slice(k.as_bytes());
            buf.push(0);
            buf.extend_from_slice(v.as_bytes());
            buf.push(0);
        }
        buf
    }

    #[test]
    fn handle_rrq_rejects_unknown_path() {
        let root = tempfile::tempdir().unwrap();
        let t = translator(root.path());
        let req = encode_request(protocol::OP_RRQ, "/etc/shadow", "octet", &[]);
        let from = Addr::new(1, 9000);
        assert!(handle_rrq(&t, from, &req[2..]).is_none());
    }

    #[test]
    fn handle_rrq_opens_reader_for_existing_scratch_file() {
        let root = tempfile::tempdir().unwrap();
        let t = translator(root.path());
        fs::create_dir_all(root.path().join("scratch")).unwrap();
        let mut f = File::create(root.path().join("scratch").join("a.bin")).unwrap();
        f.write_all(&vec![7u8; 1024]).unwrap();

        let req = encode_request(protocol::OP_RRQ, "/readwrite/a.bin", "octet", &[("blksize", "256")]);
        let from = Addr::new(1, 9000);
        let client = handle_rrq(&t, from, &req[2..]);
        assert!(client.is_some());
    }

    #[test]
    fn handle_wrq_rejects_non_octet_mode() {
        let root = tempfile::tempdir().unwrap();
        let t = translator(root.path());
        let req = encode_request(protocol::OP_WRQ, "/readwrite/b.bin", "netascii", &[]);
        let from = Addr::new(1, 9000);
        assert!(handle_wrq(&t, from, &req[2..]).is_none());
    }
}
