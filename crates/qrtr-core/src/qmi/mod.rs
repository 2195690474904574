// SPDX-License-Identifier: Apache-2.0 OR MIT

//! QMI TLV message framing and codec (§4.B).

mod codec;
mod header;

pub use codec::{decode_message, encode_message, LenWidth, TlvItems, TlvWriter};
pub use header::{MsgType, QmiHeader, HEADER_LEN};
