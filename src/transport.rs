//! USB transport used by the driver.
//!
//! The driver needs very little from the USB stack: claiming the interface,
//! listing its endpoints and issuing control transfers. [`UsbConnection`]
//! captures exactly that, so the protocol can run over libusb or a recording mock.

use std::{fmt, io::Result, sync::Arc, time::Duration};

use crate::endpoint::EndpointInfo;

/// Setup stage of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlRequest {
    /// `bmRequestType`.
    pub request_type: u8,
    /// `bRequest`.
    pub request: u8,
    /// `wValue`.
    pub value: u16,
    /// `wIndex`.
    pub index: u16,
}

impl ControlRequest {
    /// Creates a new control request.
    pub const fn new(request_type: u8, request: u8, value: u16, index: u16) -> Self {
        Self { request_type, request, value, index }
    }

    /// Whether the data stage flows from device to host.
    pub const fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

impl fmt::Display for ControlRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "type={:#04x} request={:#04x} value={:#06x} index={:#06x}",
            self.request_type, self.request, self.value, self.index
        )
    }
}

/// Data stage of a control transfer.
#[derive(Debug)]
pub enum Data<'a> {
    /// Device to host. The buffer receives the response.
    In(&'a mut [u8]),
    /// Host to device. May be empty.
    Out(&'a [u8]),
}

impl Data<'_> {
    /// Length of the data stage in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::In(buf) => buf.len(),
            Self::Out(buf) => buf.len(),
        }
    }

    /// Whether the transfer has no data stage.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An open USB device connection.
///
/// All methods block until the operation completes or times out.
pub trait UsbConnection {
    /// Claims the interface for exclusive use.
    fn claim_interface(&self, interface: u8) -> Result<()>;

    /// Releases a previously claimed interface.
    fn release_interface(&self, interface: u8) -> Result<()>;

    /// Lists the endpoints of the interface in descriptor order.
    fn endpoints(&self, interface: u8) -> Result<Vec<EndpointInfo>>;

    /// Performs a control transfer and returns the number of bytes transferred
    /// in the data stage.
    fn control_transfer(&self, request: ControlRequest, data: Data<'_>, timeout: Duration) -> Result<usize>;
}

impl<T: UsbConnection + ?Sized> UsbConnection for &T {
    fn claim_interface(&self, interface: u8) -> Result<()> {
        (**self).claim_interface(interface)
    }

    fn release_interface(&self, interface: u8) -> Result<()> {
        (**self).release_interface(interface)
    }

    fn endpoints(&self, interface: u8) -> Result<Vec<EndpointInfo>> {
        (**self).endpoints(interface)
    }

    fn control_transfer(&self, request: ControlRequest, data: Data<'_>, timeout: Duration) -> Result<usize> {
        (**self).control_transfer(request, data, timeout)
    }
}

impl<T: UsbConnection + ?Sized> UsbConnection for Arc<T> {
    fn claim_interface(&self, interface: u8) -> Result<()> {
        (**self).claim_interface(interface)
    }

    fn release_interface(&self, interface: u8) -> Result<()> {
        (**self).release_interface(interface)
    }

    fn endpoints(&self, interface: u8) -> Result<Vec<EndpointInfo>> {
        (**self).endpoints(interface)
    }

    fn control_transfer(&self, request: ControlRequest, data: Data<'_>, timeout: Duration) -> Result<usize> {
        (**self).control_transfer(request, data, timeout)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn direction_from_request_type() {
        assert!(ControlRequest::new(0xc0, 1, 0x8484, 0).is_in());
        assert!(!ControlRequest::new(0x40, 1, 0x0404, 0).is_in());
        assert!(!ControlRequest::new(0x21, 0x20, 0, 0).is_in());
    }

    #[test]
    fn display() {
        let req = ControlRequest::new(0x40, 0x01, 0x0505, 0x1311);
        assert_eq!(req.to_string(), "type=0x40 request=0x01 value=0x0505 index=0x1311");
    }
}
