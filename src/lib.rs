#![cfg_attr(docsrs, feature(doc_cfg))]
//! Host-side driver for Prolific PL2303 USB-to-serial bridges.
//!
//! This crate brings a freshly enumerated PL2303 into a serial-ready state and
//! afterwards applies baud rate, data bits, stop bits and parity changes using
//! the chip's control-transfer command set.
//!
//! The protocol core ([`Pl2303`], [`Session`]) is generic over a [`UsbConnection`]
//! and two [`BulkWorker`]s, so it can run on any USB stack.
//!
//! ### Native platforms (crate feature `native`, enabled by default)
//!
//! Use [`host::find_device`] or [`rusb`] to locate the device and pass an opened
//! handle to [`host::open`]. Serial data then flows through the returned
//! [`host::SerialSender`] and [`host::SerialReceiver`].
//!

pub mod endpoint;
pub mod error;
pub mod init;
pub mod line;
pub mod serial;
pub mod transport;
pub mod worker;

#[cfg(feature = "native")]
#[cfg_attr(docsrs, doc(cfg(feature = "native")))]
pub mod host;

use std::time::Duration;

pub use endpoint::{resolve_endpoints, Direction, EndpointInfo, EndpointPair, TransferType};
pub use error::{Error, Result};
pub use init::{InitCommand, InitData, InitReport, PL2303_INIT};
pub use line::{DataBits, FlowControl, LineCoding, Parity, StopBits};
pub use serial::{OpenOptions, Pl2303, Session};
pub use transport::{ControlRequest, Data, UsbConnection};
pub use worker::BulkWorker;

/// Prolific Technology vendor id.
pub const VID_PROLIFIC: u16 = 0x067b;

/// PL2303 product id.
pub const PID_PL2303: u16 = 0x2303;

/// Vendor request, host to device.
pub const REQTYPE_HOST_TO_DEVICE_VENDOR: u8 = 0x40;
/// Vendor request, device to host.
pub const REQTYPE_DEVICE_TO_HOST_VENDOR: u8 = 0xc0;
/// Class request to the interface, host to device.
pub const REQTYPE_HOST_TO_DEVICE_CLASS: u8 = 0x21;

/// Vendor register access. Used for reads as well.
pub const VENDOR_WRITE_REQUEST: u8 = 0x01;
/// CDC `SET_LINE_CODING`.
pub const SET_LINE_CODING: u8 = 0x20;
/// CDC `SET_CONTROL_LINE_STATE`.
pub const SET_CONTROL_LINE_STATE: u8 = 0x22;

/// Timeout applied to every control transfer unless configured otherwise.
pub const TIMEOUT: Duration = Duration::from_secs(5);
