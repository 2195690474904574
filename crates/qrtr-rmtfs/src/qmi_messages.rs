// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RMTFS QMI message schema and encode/decode (`qmi_rmtfs.c`/`.h`).
//!
//! Service `14`, version `1`, instance `0`. Six message ids; this daemon
//! only ever receives requests for the first five and answers with the
//! matching response. `FORCE_SYNC_IND` is encodable for completeness with
//! the upstream schema but, like the original daemon, is never actually
//! sent: `rmtfs_iovec`'s `is_force_sync` flag is logged, not acted on.

use qrtr_core::qmi::{decode_message, encode_message, LenWidth, MsgType, QmiHeader, TlvItems, TlvWriter};
use qrtr_core::QmiError;

pub const SERVICE: u32 = 14;
pub const VERSION: u8 = 1;
pub const INSTANCE: u32 = 0;

pub const MSG_OPEN: u16 = 1;
pub const MSG_CLOSE: u16 = 2;
pub const MSG_RW_IOVEC: u16 = 3;
pub const MSG_ALLOC_BUFF: u16 = 4;
pub const MSG_GET_DEV_ERROR: u16 = 5;
pub const MSG_FORCE_SYNC_IND: u16 = 6;

pub const RESULT_SUCCESS: u16 = 0;
pub const RESULT_FAILURE: u16 = 1;

pub const ERR_NONE: u16 = 0;
pub const ERR_INTERNAL: u16 = 1;
pub const ERR_MALFORMED_MSG: u16 = 2;

const TAG_RESULT: u8 = 2;
const TAG_OPTIONAL_VALUE: u8 = 0x10;

/// `{ result: u16, error: u16 }`, little-endian, carried as a nested
/// struct TLV under tag 2 in every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QmiResult {
    pub result: u16,
    pub error: u16,
}

impl QmiResult {
    pub const SUCCESS: Self = Self {
        result: RESULT_SUCCESS,
        error: ERR_NONE,
    };

    /// Mirrors `qmi_result_error`: only the first failure sticks.
    pub fn set_error(&mut self, error: u16) {
        if self.result == RESULT_FAILURE {
            return;
        }
        self.result = RESULT_FAILURE;
        self.error = error;
    }

    fn write(self, w: &mut TlvWriter) {
        let mut bytes = Vec::with_capacity(4);
        bytes.extend_from_slice(&self.result.to_le_bytes());
        bytes.extend_from_slice(&self.error.to_le_bytes());
        w.write_bytes(TAG_RESULT, &bytes);
    }

    fn read(items: &TlvItems<'_>) -> Result<Self, QmiError> {
        let bytes = items.get(TAG_RESULT).ok_or(QmiError::MissingRequiredElement { tlv_tag: TAG_RESULT })?;
        if bytes.len() != 4 {
            return Err(QmiError::Truncated);
        }
        Ok(Self {
            result: u16::from_le_bytes([bytes[0], bytes[1]]),
            error: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IovecEntry {
    pub sector_addr: u32,
    pub phys_offset: u32,
    pub num_sector: u32,
}

pub struct OpenRequest {
    pub path: String,
}

pub struct OpenResponse {
    pub result: QmiResult,
    pub caller_id: Option<u32>,
}

pub struct CloseRequest {
    pub caller_id: u32,
}

pub struct CloseResponse {
    pub result: QmiResult,
}

pub struct IovecRequest {
    pub caller_id: u32,
    pub is_write: bool,
    pub entries: Vec<IovecEntry>,
    pub is_force_sync: bool,
}

pub struct IovecResponse {
    pub result: QmiResult,
}

pub struct AllocBufRequest {
    pub caller_id: u32,
    pub buff_size: u32,
}

pub struct AllocBufResponse {
    pub result: QmiResult,
    pub buff_address: Option<u64>,
}

pub struct DevErrorRequest {
    pub caller_id: u32,
}

pub struct DevErrorResponse {
    pub result: QmiResult,
    pub status: Option<u8>,
}

/// Decode a request's txn id up front, independent of whether its body
/// turns out to be malformed: a response always needs the txn id to reach
/// the right waiter, even when it's reporting `ERR_MALFORMED_MSG`.
fn decode_txn(buf: &[u8]) -> u16 {
    QmiHeader::decode(buf).map(|(h, _)| h.txn_id).unwrap_or(0)
}

fn decode_body(buf: &[u8], msg_id: u16) -> Result<TlvItems<'_>, QmiError> {
    let (_, items) = decode_message(buf, MsgType::Request, msg_id)?;
    Ok(items)
}

pub fn decode_open_request(buf: &[u8]) -> (u16, Result<OpenRequest, QmiError>) {
    let req = (|| {
        let items = decode_body(buf, MSG_OPEN)?;
        Ok(OpenRequest { path: items.get_string(1)? })
    })();
    (decode_txn(buf), req)
}

pub fn encode_open_response(txn_id: u16, resp: OpenResponse) -> Vec<u8> {
    let mut w = TlvWriter::new();
    resp.result.write(&mut w);
    if let Some(id) = resp.caller_id {
        w.write_u32(TAG_OPTIONAL_VALUE, id);
    }
    encode_message(MsgType::Response, txn_id, MSG_OPEN, w.into_body())
}

pub fn decode_close_request(buf: &[u8]) -> (u16, Result<CloseRequest, QmiError>) {
    let req = (|| Ok(CloseRequest { caller_id: decode_body(buf, MSG_CLOSE)?.get_u32(1)? }))();
    (decode_txn(buf), req)
}

pub fn encode_close_response(txn_id: u16, resp: CloseResponse) -> Vec<u8> {
    let mut w = TlvWriter::new();
    resp.result.write(&mut w);
    encode_message(MsgType::Response, txn_id, MSG_CLOSE, w.into_body())
}

fn encode_iovec_entry(e: &IovecEntry, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&e.sector_addr.to_le_bytes());
    buf.extend_from_slice(&e.phys_offset.to_le_bytes());
    buf.extend_from_slice(&e.num_sector.to_le_bytes());
}

fn decode_iovec_entry(chunk: &[u8]) -> Result<IovecEntry, QmiError> {
    Ok(IovecEntry {
        sector_addr: u32::from_le_bytes(chunk[0..4].try_into().unwrap()),
        phys_offset: u32::from_le_bytes(chunk[4..8].try_into().unwrap()),
        num_sector: u32::from_le_bytes(chunk[8..12].try_into().unwrap()),
    })
}

pub fn decode_iovec_request(buf: &[u8]) -> (u16, Result<IovecRequest, QmiError>) {
    let req = (|| {
        let items = decode_body(buf, MSG_RW_IOVEC)?;
        let entries = items.get_array(3, LenWidth::One, 12, decode_iovec_entry)?;
        Ok(IovecRequest {
            caller_id: items.get_u32(1)?,
            is_write: items.get_u8(2)? != 0,
            entries,
            is_force_sync: items.get_u8(4).unwrap_or(0) != 0,
        })
    })();
    (decode_txn(buf), req)
}

pub fn encode_iovec_response(txn_id: u16, resp: IovecResponse) -> Vec<u8> {
    let mut w = TlvWriter::new();
    resp.result.write(&mut w);
    encode_message(MsgType::Response, txn_id, MSG_RW_IOVEC, w.into_body())
}

pub fn decode_alloc_buf_request(buf: &[u8]) -> (u16, Result<AllocBufRequest, QmiError>) {
    let req = (|| {
        let items = decode_body(buf, MSG_ALLOC_BUFF)?;
        Ok(AllocBufRequest {
            caller_id: items.get_u32(1)?,
            buff_size: items.get_u32(2)?,
        })
    })();
    (decode_txn(buf), req)
}

pub fn encode_alloc_buf_response(txn_id: u16, resp: AllocBufResponse) -> Vec<u8> {
    let mut w = TlvWriter::new();
    resp.result.write(&mut w);
    if let Some(addr) = resp.buff_address {
        w.write_u64(TAG_OPTIONAL_VALUE, addr);
    }
    encode_message(MsgType::Response, txn_id, MSG_ALLOC_BUFF, w.into_body())
}

pub fn decode_dev_error_request(buf: &[u8]) -> (u16, Result<DevErrorRequest, QmiError>) {
    let req = (|| Ok(DevErrorRequest { caller_id: decode_body(buf, MSG_GET_DEV_ERROR)?.get_u32(1)? }))();
    (decode_txn(buf), req)
}

pub fn encode_dev_error_response(txn_id: u16, resp: DevErrorResponse) -> Vec<u8> {
    let mut w = TlvWriter::new();
    resp.result.write(&mut w);
    if let Some(status) = resp.status {
        w.write_u8(TAG_OPTIONAL_VALUE, status);
    }
    encode_message(MsgType::Response, txn_id, MSG_GET_DEV_ERROR, w.into_body())
}

/// Unused by the daemon itself; kept so the schema matches
/// `rmtfs_force_sync_ei` in full.
pub fn encode_force_sync_ind(caller_ids: &[u32]) -> Vec<u8> {
    let mut w = TlvWriter::new();
    w.write_array(1, LenWidth::One, caller_ids, |v, buf| buf.extend_from_slice(&v.to_le_bytes()));
    encode_message(MsgType::Indication, 0, MSG_FORCE_SYNC_IND, w.into_body())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_request_roundtrip() {
        let mut w = TlvWriter::new();
        w.write_string(1, "/boot/modem_fs1");
        let msg = encode_message(MsgType::Request, 5, MSG_OPEN, w.into_body());
        let (txn, req) = decode_open_request(&msg);
        assert_eq!(txn, 5);
        assert_eq!(req.unwrap().path, "/boot/modem_fs1");
    }

    #[test]
    fn open_response_omits_caller_id_on_failure() {
        let mut result = QmiResult::SUCCESS;
        result.set_error(ERR_INTERNAL);
        let buf = encode_open_response(1, OpenResponse { result, caller_id: None });
        let (_, items) = decode_message(&buf, MsgType::Response, MSG_OPEN).unwrap();
        assert!(!items.has(TAG_OPTIONAL_VALUE));
    }

    #[test]
    fn iovec_request_roundtrip() {
        let mut w = TlvWriter::new();
        w.write_u32(1, 3);
        w.write_u8(2, 1);
        w.write_array(
            3,
            LenWidth::One,
            &[IovecEntry {
                sector_addr: 10,
                phys_offset: 0x1000,
                num_sector: 2,
            }],
            encode_iovec_entry,
        );
        w.write_u8(4, 0);
        let msg = encode_message(MsgType::Request, 9, MSG_RW_IOVEC, w.into_body());
        let (txn, req) = decode_iovec_request(&msg);
        assert_eq!(txn, 9);
        let req = req.unwrap();
        assert_eq!(req.caller_id, 3);
        assert!(req.is_write);
        assert_eq!(req.entries.len(), 1);
        assert_eq!(req.entries[0].num_sector, 2);
        assert!(!req.is_force_sync);
    }

    #[test]
    fn dev_error_response_carries_status_on_success() {
        let buf = encode_dev_error_response(
            2,
            DevErrorResponse {
                result: QmiResult::SUCCESS,
                status: Some(7),
            },
        );
        let (_, items) = decode_message(&buf, MsgType::Response, MSG_GET_DEV_ERROR).unwrap();
        assert_eq!(items.get_u8(TAG_OPTIONAL_VALUE).unwrap(), 7);
    }
}
