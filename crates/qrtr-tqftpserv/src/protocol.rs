// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire format for the TFTP-style protocol (§4.E): big-endian opcodes,
//! null-terminated strings, a trailing run of `key\0value\0` option pairs
//! on RRQ/WRQ and OACK. Mirrors `tqftpserv.c`'s packet layouts.

use std::fmt;

pub const OP_RRQ: u16 = 1;
pub const OP_WRQ: u16 = 2;
pub const OP_DATA: u16 = 3;
pub const OP_ACK: u16 = 4;
pub const OP_ERROR: u16 = 5;
pub const OP_OACK: u16 = 6;

pub const ERR_FILE_NOT_FOUND: u16 = 1;
pub const ERR_ILLEGAL_OPERATION: u16 = 4;

#[derive(Debug)]
pub enum ProtoError {
    Truncated,
    NotUtf8,
    UnexpectedOpcode { want: u16, got: u16 },
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated tftp packet"),
            Self::NotUtf8 => write!(f, "non-utf8 string in tftp packet"),
            Self::UnexpectedOpcode { want, got } => {
                write!(f, "expected opcode {want}, got {got}")
            }
        }
    }
}

impl std::error::Error for ProtoError {}

fn read_u16(buf: &[u8], off: usize) -> Result<u16, ProtoError> {
    buf.get(off..off + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(ProtoError::Truncated)
}

/// Read a NUL-terminated string starting at `off`, returning it and the
/// offset just past the terminator.
fn read_cstr(buf: &[u8], off: usize) -> Result<(String, usize), ProtoError> {
    let nul = buf[off..].iter().position(|&b| b == 0).ok_or(ProtoError::Truncated)?;
    let s = std::str::from_utf8(&buf[off..off + nul]).map_err(|_| ProtoError::NotUtf8)?;
    Ok((s.to_string(), off + nul + 1))
}

fn write_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

pub fn opcode_of(buf: &[u8]) -> Result<u16, ProtoError> {
    read_u16(buf, 0)
}

/// A parsed RRQ/WRQ: filename, mode, and any trailing option pairs in the
/// order they appeared (unknown options are kept, filtered out later by
/// the caller — matches `tqftpserv.c` logging but ignoring them).
pub struct Request {
    pub filename: String,
    pub mode: String,
    pub options: Vec<(String, String)>,
}

/// Parse an RRQ or WRQ body (opcode already consumed by the caller).
pub fn decode_request(buf: &[u8]) -> Result<Request, ProtoError> {
    let (filename, mut off) = read_cstr(buf, 0)?;
    let (mode, mode_end) = read_cstr(buf, off)?;
    off = mode_end;

    let mut options = Vec::new();
    while off < buf.len() {
        let (key, key_end) = read_cstr(buf, off)?;
        let (value, value_end) = read_cstr(buf, key_end)?;
        options.push((key, value));
        off = value_end;
    }

    Ok(Request { filename, mode, options })
}

pub fn encode_data(block: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&OP_DATA.to_be_bytes());
    buf.extend_from_slice(&block.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

pub fn decode_data(buf: &[u8]) -> Result<(u16, &[u8]), ProtoError> {
    let op = opcode_of(buf)?;
    if op != OP_DATA {
        return Err(ProtoError::UnexpectedOpcode { want: OP_DATA, got: op });
    }
    let block = read_u16(buf, 2)?;
    Ok((block, &buf[4..]))
}

pub fn encode_ack(block: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4);
    buf.extend_from_slice(&OP_ACK.to_be_bytes());
    buf.extend_from_slice(&block.to_be_bytes());
    buf
}

pub fn decode_ack(buf: &[u8]) -> Result<u16, ProtoError> {
    let op = opcode_of(buf)?;
    if op != OP_ACK {
        return Err(ProtoError::UnexpectedOpcode { want: OP_ACK, got: op });
    }
    read_u16(buf, 2)
}

pub fn encode_error(code: u16, msg: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + msg.len() + 1);
    buf.extend_from_slice(&OP_ERROR.to_be_bytes());
    buf.extend_from_slice(&code.to_be_bytes());
    write_cstr(&mut buf, msg);
    buf
}

pub fn decode_error(buf: &[u8]) -> Result<(u16, String), ProtoError> {
    let op = opcode_of(buf)?;
    if op != OP_ERROR {
        return Err(ProtoError::UnexpectedOpcode { want: OP_ERROR, got: op });
    }
    let code = read_u16(buf, 2)?;
    let (msg, _) = read_cstr(buf, 4)?;
    Ok((code, msg))
}

/// Build an OACK listing the accepted option subset, in the fixed order
/// `tqftpserv.c::tftp_send_oack` uses: blksize, timeoutms, tsize, wsize,
/// rsize. Each `Some` entry is written; `None` is omitted entirely.
pub fn encode_oack(blksize: Option<usize>, timeoutms: Option<u32>, tsize: Option<u64>, wsize: Option<usize>, rsize: Option<usize>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    buf.extend_from_slice(&OP_OACK.to_be_bytes());
    if let Some(v) = blksize {
        write_cstr(&mut buf, "blksize");
        write_cstr(&mut buf, &v.to_string());
    }
    if let Some(v) = timeoutms {
        write_cstr(&mut buf, "timeoutms");
        write_cstr(&mut buf, &v.to_string());
    }
    if let Some(v) = tsize {
        write_cstr(&mut buf, "tsize");
        write_cstr(&mut buf, &v.to_string());
    }
    if let Some(v) = wsize {
        write_cstr(&mut buf, "wsize");
        write_cstr(&mut buf, &v.to_string());
    }
    if let Some(v) = rsize {
        write_cstr(&mut buf, "rsize");
        write_cstr(&mut buf, &v.to_string());
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_request_with_options() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&OP_RRQ.to_be_bytes());
        write_cstr(&mut buf, "/readonly/firmware/image/modem.mbn");
        write_cstr(&mut buf, "octet");
        write_cstr(&mut buf, "blksize");
        write_cstr(&mut buf, "1024");
        write_cstr(&mut buf, "tsize");
        write_cstr(&mut buf, "0");

        let req = decode_request(&buf[2..]).unwrap();
        assert_eq!(req.filename, "/readonly/firmware/image/modem.mbn");
        assert_eq!(req.mode, "octet");
        assert_eq!(req.options, vec![("blksize".to_string(), "1024".to_string()), ("tsize".to_string(), "0".to_string())]);
    }

    #[test]
    fn decode_request_without_options() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&OP_WRQ.to_be_bytes());
        write_cstr(&mut buf, "/readwrite/scratch.bin");
        write_cstr(&mut buf, "octet");

        let req = decode_request(&buf[2..]).unwrap();
        assert_eq!(req.filename, "/readwrite/scratch.bin");
        assert!(req.options.is_empty());
    }

    #[test]
    fn data_ack_roundtrip() {
        let data = encode_data(3, b"hello");
        let (block, payload) = decode_data(&data).unwrap();
        assert_eq!(block, 3);
        assert_eq!(payload, b"hello");

        let ack = encode_ack(7);
        assert_eq!(decode_ack(&ack).unwrap(), 7);
    }

    #[test]
    fn oack_omits_absent_options() {
        let oack = encode_oack(Some(1024), None, Some(0), None, None);
        assert_eq!(opcode_of(&oack).unwrap(), OP_OACK);
        let body = &oack[2..];
        assert!(body.windows(7).any(|w| w == b"blksize"));
        assert!(body.windows(5).any(|w| w == b"tsize"));
        assert!(!body.windows(9).any(|w| w == b"timeoutms"));
    }

    #[test]
    fn error_roundtrip() {
        let err = encode_error(ERR_FILE_NOT_FOUND, "file not found");
        let (code, msg) = decode_error(&err).unwrap();
        assert_eq!(code, ERR_FILE_NOT_FOUND);
        assert_eq!(msg, "file not found");
    }
}
