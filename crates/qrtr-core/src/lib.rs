// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared substrate for the QRTR platform daemons: socket transport,
//! control-packet codec, QMI TLV codec, generic containers and the
//! shutdown-signal handle used by every daemon's event loop.

pub mod addr;
pub mod containers;
pub mod ctrl;
pub mod error;
pub mod qmi;
pub mod signal;
pub mod transport;

pub use addr::{Addr, ServiceId, NODE_BROADCAST, PORT_CTRL};
pub use error::{QmiError, TransportError};
pub use signal::ShutdownSignal;
pub use transport::{Endpoint, Packet};
