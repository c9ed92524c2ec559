//! libusb transport and session setup.

use rusb::{Device, DeviceHandle, GlobalContext, UsbContext};
use std::{
    io::{self, ErrorKind},
    sync::Arc,
    time::Duration,
};
use tokio::task::spawn_blocking;

use super::{guard::InUseGuard, BulkReader, BulkWriter, SerialReceiver, SerialSender};
use crate::{
    endpoint::{Direction, EndpointInfo, TransferType},
    serial::{OpenOptions, Session},
    transport::{ControlRequest, Data, UsbConnection},
    Error, Result, PID_PL2303, VID_PROLIFIC,
};

/// Session on a device opened through libusb.
pub type HostSession<C> = Session<Arc<DeviceHandle<C>>, BulkReader<C>, BulkWriter<C>>;

pub(crate) fn to_io_err(error: rusb::Error) -> io::Error {
    let kind = match error {
        rusb::Error::Io => ErrorKind::ConnectionAborted,
        rusb::Error::InvalidParam => ErrorKind::InvalidInput,
        rusb::Error::Access => ErrorKind::PermissionDenied,
        rusb::Error::NoDevice => ErrorKind::NotFound,
        rusb::Error::NotFound => ErrorKind::NotFound,
        rusb::Error::Busy => ErrorKind::ResourceBusy,
        rusb::Error::Timeout => ErrorKind::TimedOut,
        rusb::Error::Overflow => ErrorKind::OutOfMemory,
        rusb::Error::Pipe => ErrorKind::BrokenPipe,
        rusb::Error::Interrupted => ErrorKind::Interrupted,
        rusb::Error::NoMem => ErrorKind::OutOfMemory,
        rusb::Error::NotSupported => ErrorKind::Unsupported,
        rusb::Error::BadDescriptor => ErrorKind::InvalidInput,
        rusb::Error::Other => ErrorKind::Other,
    };

    io::Error::new(kind, error)
}

fn endpoint_info(ep: &rusb::EndpointDescriptor) -> EndpointInfo {
    EndpointInfo {
        address: ep.address(),
        direction: match ep.direction() {
            rusb::Direction::In => Direction::In,
            rusb::Direction::Out => Direction::Out,
        },
        transfer_type: match ep.transfer_type() {
            rusb::TransferType::Control => TransferType::Control,
            rusb::TransferType::Isochronous => TransferType::Isochronous,
            rusb::TransferType::Bulk => TransferType::Bulk,
            rusb::TransferType::Interrupt => TransferType::Interrupt,
        },
        max_packet_size: ep.max_packet_size(),
    }
}

impl<C: UsbContext> UsbConnection for DeviceHandle<C> {
    fn claim_interface(&self, interface: u8) -> io::Result<()> {
        DeviceHandle::claim_interface(self, interface).map_err(to_io_err)
    }

    fn release_interface(&self, interface: u8) -> io::Result<()> {
        DeviceHandle::release_interface(self, interface).map_err(to_io_err)
    }

    fn endpoints(&self, interface: u8) -> io::Result<Vec<EndpointInfo>> {
        let cfg = self.device().active_config_descriptor().map_err(to_io_err)?;
        let iface =
            cfg.interfaces().find(|i| i.number() == interface).ok_or(rusb::Error::NotFound).map_err(to_io_err)?;

        // Default alternate setting only.
        let endpoints = iface
            .descriptors()
            .filter(|desc| desc.setting_number() == 0)
            .flat_map(|desc| desc.endpoint_descriptors().map(|ep| endpoint_info(&ep)).collect::<Vec<_>>())
            .collect();

        Ok(endpoints)
    }

    fn control_transfer(&self, request: ControlRequest, data: Data<'_>, timeout: Duration) -> io::Result<usize> {
        let ControlRequest { request_type, request, value, index } = request;
        match data {
            Data::In(buf) => self.read_control(request_type, request, value, index, buf, timeout),
            Data::Out(buf) => self.write_control(request_type, request, value, index, buf, timeout),
        }
        .map_err(to_io_err)
    }
}

/// Finds the first attached PL2303.
pub fn find_device() -> Result<Device<GlobalContext>> {
    let devices = rusb::devices().map_err(to_io_err)?;
    devices
        .iter()
        .find(|dev| {
            dev.device_descriptor()
                .is_ok_and(|desc| desc.vendor_id() == VID_PROLIFIC && desc.product_id() == PID_PL2303)
        })
        .ok_or_else(|| Error::Usb(io::Error::new(ErrorKind::NotFound, "no PL2303 found")))
}

/// Opens a session on the device.
///
/// Claims the interface, initializes the chip and starts the bulk reader and writer threads.
/// The handle may be shared, but only one session may be open per device handle and interface;
/// opening a second one fails with [`ErrorKind::ResourceBusy`] until the first is closed.
pub async fn open<C: UsbContext + 'static>(
    hnd: Arc<DeviceHandle<C>>, options: OpenOptions,
) -> Result<(HostSession<C>, SerialSender, SerialReceiver)> {
    let guard = Arc::new(InUseGuard::new(hnd.as_raw() as usize, options.interface)?);

    if options.detach_kernel_driver {
        if let Err(err) = hnd.set_auto_detach_kernel_driver(true) {
            tracing::debug!("kernel driver auto-detach unavailable: {err}");
        }
    }

    let dev = hnd.device();
    let name = format!("{}-{}:{}", dev.bus_number(), dev.address(), options.interface);

    let (reader, rx) = BulkReader::new(hnd.clone(), &name, guard.clone());
    let (writer, tx) = BulkWriter::new(hnd.clone(), &name, guard);

    tracing::debug!("opening PL2303 {name}");
    let session = spawn_blocking(move || Session::open(hnd, reader, writer, &options))
        .await
        .map_err(|err| Error::Usb(io::Error::other(err)))??;

    Ok((session, tx, rx))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(to_io_err(rusb::Error::Timeout).kind(), ErrorKind::TimedOut);
        assert_eq!(to_io_err(rusb::Error::Pipe).kind(), ErrorKind::BrokenPipe);
        assert_eq!(to_io_err(rusb::Error::Access).kind(), ErrorKind::PermissionDenied);
    }

    fn assert_send<T: Send>(_: &T) {}

    /// Verify that the open future is Send.
    #[test]
    fn open_is_send() {
        fn check<C: UsbContext + 'static>(hnd: Arc<DeviceHandle<C>>) {
            let fut = open(hnd, OpenOptions::new());
            assert_send(&fut);
        }
        let _ = check::<GlobalContext>;
    }
}
