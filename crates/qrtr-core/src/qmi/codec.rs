// SPDX-License-Identifier: Apache-2.0 OR MIT

//! TLV body encode/decode (§4.B).
//!
//! Each TLV item is `{ tag: u8, length: u16, value: [u8; length] }`,
//! little-endian. `TlvWriter` appends items in schema order; `TlvItems`
//! parses a body into a tag-indexed table in one pass, so callers can pull
//! fields out in any order and unknown tags are simply never looked up.

use super::header::{MsgType, QmiHeader, HEADER_LEN};
use crate::error::QmiError;

/// Width, in bytes, of a TLV array element's length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenWidth {
    One = 1,
    Two = 2,
    Four = 4,
}

/// Appends TLV items to a growing message body.
#[derive(Default)]
pub struct TlvWriter {
    buf: Vec<u8>,
}

impl TlvWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push_item(&mut self, tag: u8, value: &[u8]) {
        self.buf.push(tag);
        self.buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(value);
    }

    /// Write an OPT_FLAG-style presence marker: a single `0x01` byte iff
    /// `set`, omitted entirely otherwise.
    pub fn write_flag(&mut self, tag: u8, set: bool) {
        if set {
            self.push_item(tag, &[1]);
        }
    }

    pub fn write_u8(&mut self, tag: u8, v: u8) {
        self.push_item(tag, &[v]);
    }

    pub fn write_u16(&mut self, tag: u8, v: u16) {
        self.push_item(tag, &v.to_le_bytes());
    }

    pub fn write_u32(&mut self, tag: u8, v: u32) {
        self.push_item(tag, &v.to_le_bytes());
    }

    pub fn write_u64(&mut self, tag: u8, v: u64) {
        self.push_item(tag, &v.to_le_bytes());
    }

    /// Write a NUL-terminated string. The explicit TLV length still carries
    /// the true byte count, per §4.B ("strings are null-terminated but also
    /// carry an explicit length").
    pub fn write_string(&mut self, tag: u8, s: &str) {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.push_item(tag, &bytes);
    }

    /// Write raw bytes as-is, used for array/struct elements the caller has
    /// already serialised (e.g. a nested message's own TLV body).
    pub fn write_bytes(&mut self, tag: u8, bytes: &[u8]) {
        self.push_item(tag, bytes);
    }

    /// Write a variable-length array: a `len_width`-byte count prefix
    /// followed by `count` fixed-size elements.
    pub fn write_array<T>(&mut self, tag: u8, len_width: LenWidth, items: &[T], encode_elem: impl Fn(&T, &mut Vec<u8>)) {
        let mut value = Vec::new();
        match len_width {
            LenWidth::One => value.push(items.len() as u8),
            LenWidth::Two => value.extend_from_slice(&(items.len() as u16).to_le_bytes()),
            LenWidth::Four => value.extend_from_slice(&(items.len() as u32).to_le_bytes()),
        }
        for item in items {
            encode_elem(item, &mut value);
        }
        self.push_item(tag, &value);
    }

    pub fn into_body(self) -> Vec<u8> {
        self.buf
    }
}

/// A TLV body parsed into a tag-indexed table.
pub struct TlvItems<'a> {
    items: Vec<(u8, &'a [u8])>,
}

impl<'a> TlvItems<'a> {
    pub fn parse(body: &'a [u8]) -> Result<Self, QmiError> {
        let mut items = Vec::new();
        let mut off = 0;
        while off < body.len() {
            if off + 3 > body.len() {
                return Err(QmiError::Truncated);
            }
            let tag = body[off];
            let len = u16::from_le_bytes([body[off + 1], body[off + 2]]) as usize;
            let start = off + 3;
            let end = start + len;
            if end > body.len() {
                return Err(QmiError::Truncated);
            }
            items.push((tag, &body[start..end]));
            off = end;
        }
        Ok(Self { items })
    }

    pub fn has(&self, tag: u8) -> bool {
        self.items.iter().any(|(t, _)| *t == tag)
    }

    pub fn get(&self, tag: u8) -> Option<&'a [u8]> {
        self.items.iter().find(|(t, _)| *t == tag).map(|(_, v)| *v)
    }

    pub fn get_u8(&self, tag: u8) -> Result<u8, QmiError> {
        let v = self.get(tag).ok_or(QmiError::MissingRequiredElement { tlv_tag: tag })?;
        v.first().copied().ok_or(QmiError::Truncated)
    }

    pub fn get_u16(&self, tag: u8) -> Result<u16, QmiError> {
        let v = self.get(tag).ok_or(QmiError::MissingRequiredElement { tlv_tag: tag })?;
        let arr: [u8; 2] = v.try_into().map_err(|_| QmiError::Truncated)?;
        Ok(u16::from_le_bytes(arr))
    }

    pub fn get_u32(&self, tag: u8) -> Result<u32, QmiError> {
        let v = self.get(tag).ok_or(QmiError::MissingRequiredElement { tlv_tag: tag })?;
        let arr: [u8; 4] = v.try_into().map_err(|_| QmiError::Truncated)?;
        Ok(u32::from_le_bytes(arr))
    }

    pub fn get_u64(&self, tag: u8) -> Result<u64, QmiError> {
        let v = self.get(tag).ok_or(QmiError::MissingRequiredElement { tlv_tag: tag })?;
        let arr: [u8; 8] = v.try_into().map_err(|_| QmiError::Truncated)?;
        Ok(u64::from_le_bytes(arr))
    }

    /// True iff an OPT_FLAG-style presence marker for `tag` was set.
    pub fn flag(&self, tag: u8) -> bool {
        self.get(tag).map(|v| v.first() == Some(&1)).unwrap_or(false)
    }

    pub fn get_string(&self, tag: u8) -> Result<String, QmiError> {
        let v = self.get(tag).ok_or(QmiError::MissingRequiredElement { tlv_tag: tag })?;
        let trimmed = match v.iter().position(|&b| b == 0) {
            Some(nul) => &v[..nul],
            None => v,
        };
        String::from_utf8(trimmed.to_vec()).map_err(|_| QmiError::InvalidString { tlv_tag: tag })
    }

    /// Parse a variable-length array: a `len_width`-byte count prefix
    /// followed by that many fixed-size elements, each decoded by
    /// `decode_elem`.
    pub fn get_array<T>(
        &self,
        tag: u8,
        len_width: LenWidth,
        elem_size: usize,
        decode_elem: impl Fn(&[u8]) -> Result<T, QmiError>,
    ) -> Result<Vec<T>, QmiError> {
        let v = self.get(tag).ok_or(QmiError::MissingRequiredElement { tlv_tag: tag })?;
        let prefix_len = len_width as usize;
        if v.len() < prefix_len {
            return Err(QmiError::Truncated);
        }
        let count = match len_width {
            LenWidth::One => v[0] as usize,
            LenWidth::Two => u16::from_le_bytes([v[0], v[1]]) as usize,
            LenWidth::Four => u32::from_le_bytes([v[0], v[1], v[2], v[3]]) as usize,
        };
        let rest = &v[prefix_len..];
        if rest.len() != count * elem_size {
            return Err(QmiError::ArrayOverflow { tlv_tag: tag });
        }
        rest.chunks_exact(elem_size).map(decode_elem).collect()
    }
}

/// Assemble a complete message: header followed by a pre-built TLV body.
pub fn encode_message(flags: MsgType, txn_id: u16, msg_id: u16, body: Vec<u8>) -> Vec<u8> {
    let header = QmiHeader {
        flags,
        txn_id,
        msg_id,
        msg_len: body.len() as u16,
    };
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    header.encode(&mut buf);
    buf.extend_from_slice(&body);
    buf
}

/// Check the header against the expected flags/msg_id and parse the body
/// into a tag-indexed table.
pub fn decode_message(
    buf: &[u8],
    expected_flags: MsgType,
    expected_msg_id: u16,
) -> Result<(QmiHeader, TlvItems<'_>), QmiError> {
    let (header, body) = QmiHeader::decode(buf)?;
    if header.flags != expected_flags || header.msg_id != expected_msg_id {
        return Err(QmiError::UnexpectedHeader {
            want_msg_id: expected_msg_id,
            got_msg_id: header.msg_id,
        });
    }
    let items = TlvItems::parse(body)?;
    Ok((header, items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let mut w = TlvWriter::new();
        w.write_u32(0x01, 0xDEAD_BEEF);
        w.write_string(0x10, "modem_fs1");
        let body = w.into_body();
        let msg = encode_message(MsgType::Request, 1, 0x20, body);
        let (_, items) = decode_message(&msg, MsgType::Request, 0x20).unwrap();
        assert_eq!(items.get_u32(0x01).unwrap(), 0xDEAD_BEEF);
        assert_eq!(items.get_string(0x10).unwrap(), "modem_fs1");
    }

    #[test]
    fn optional_flag_guards_value() {
        let mut w = TlvWriter::new();
        w.write_flag(0x10, true);
        w.write_u32(0x11, 7);
        let body = w.into_body();
        let items = TlvItems::parse(&body).unwrap();
        assert!(items.flag(0x10));
        assert_eq!(items.get_u32(0x11).unwrap(), 7);

        let mut w2 = TlvWriter::new();
        w2.write_flag(0x10, false);
        let body2 = w2.into_body();
        let items2 = TlvItems::parse(&body2).unwrap();
        assert!(!items2.flag(0x10));
    }

    #[test]
    fn array_roundtrip() {
        let mut w = TlvWriter::new();
        w.write_array(0x02, LenWidth::One, &[1u32, 2, 3], |v, buf| {
            buf.extend_from_slice(&v.to_le_bytes())
        });
        let body = w.into_body();
        let items = TlvItems::parse(&body).unwrap();
        let decoded = items
            .get_array(0x02, LenWidth::One, 4, |chunk| {
                Ok(u32::from_le_bytes(chunk.try_into().unwrap()))
            })
            .unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn unknown_tag_is_skipped_not_fatal() {
        let mut w = TlvWriter::new();
        w.write_u32(0x01, 1);
        w.write_u32(0x99, 2);
        let body = w.into_body();
        let items = TlvItems::parse(&body).unwrap();
        assert_eq!(items.get_u32(0x01).unwrap(), 1);
        assert!(!items.has(0x55));
    }

    #[test]
    fn header_mismatch_is_unexpected_header() {
        let msg = encode_message(MsgType::Request, 1, 0x20, Vec::new());
        let result = decode_message(&msg, MsgType::Response, 0x20);
        assert!(matches!(result, Err(QmiError::UnexpectedHeader { .. })));
    }

    #[test]
    fn truncated_item_header_errors() {
        let buf = [0x01u8, 0x02];
        assert!(matches!(TlvItems::parse(&buf), Err(QmiError::Truncated)));
    }
}
