// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy shared by the transport and QMI codec layers.
//!
//! Hand-rolled `Display`/`std::error::Error` impls, following the style of
//! `hdds::transport::shm::ShmError` rather than a derive-macro crate: these
//! are small, closed sets of variants that read better spelled out.

use std::fmt;
use std::io;

/// Errors from the QRTR transport layer (§4.A, §7 "Transient"/"Reset"/"Fatal").
#[derive(Debug)]
pub enum TransportError {
    /// The underlying socket call failed for a reason other than a
    /// recoverable timeout.
    Io(io::Error),
    /// The kernel reset the transport (`ENETRESET`); callers must reopen
    /// and republish rather than treat this as an ordinary I/O error.
    NetReset,
    /// `recv_from`/`poll` timed out or would block; not an error the
    /// caller needs to log, just resume waiting.
    Timeout,
    /// A received datagram was too short to contain even a control header,
    /// or a control command carried an unrecognised union form.
    MalformedControlPacket,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "transport I/O error: {e}"),
            Self::NetReset => write!(f, "transport reset (ENETRESET)"),
            Self::Timeout => write!(f, "transport receive timed out"),
            Self::MalformedControlPacket => write!(f, "malformed control packet"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.raw_os_error() {
            Some(libc::ENETRESET) => Self::NetReset,
            Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => Self::Timeout,
            _ => Self::Io(e),
        }
    }
}

/// Errors from QMI TLV encode/decode (§4.B, §7 "MalformedMessage").
#[derive(Debug, PartialEq, Eq)]
pub enum QmiError {
    /// The header's `flags` or `msg_id` did not match what the caller
    /// expected to decode.
    UnexpectedHeader { want_msg_id: u16, got_msg_id: u16 },
    /// A required (non-optional, or optional-with-guard-set) element was
    /// absent from the decoded TLV stream.
    MissingRequiredElement { tlv_tag: u8 },
    /// An array element's wire length prefix did not fit the descriptor's
    /// declared element size, or declared more elements than fit in the
    /// struct's fixed-size buffer.
    ArrayOverflow { tlv_tag: u8 },
    /// A string element was not valid UTF-8, or its declared length
    /// exceeded the destination buffer.
    InvalidString { tlv_tag: u8 },
    /// The byte buffer ended in the middle of a TLV item or header.
    Truncated,
}

impl fmt::Display for QmiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedHeader {
                want_msg_id,
                got_msg_id,
            } => write!(
                f,
                "unexpected QMI header: wanted msg_id {want_msg_id}, got {got_msg_id}"
            ),
            Self::MissingRequiredElement { tlv_tag } => {
                write!(f, "missing required TLV element, tag {tlv_tag:#x}")
            }
            Self::ArrayOverflow { tlv_tag } => {
                write!(f, "array element overflow, tag {tlv_tag:#x}")
            }
            Self::InvalidString { tlv_tag } => write!(f, "invalid string, tag {tlv_tag:#x}"),
            Self::Truncated => write!(f, "truncated QMI message"),
        }
    }
}

impl std::error::Error for QmiError {}
