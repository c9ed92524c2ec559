//! Bulk endpoint discovery.

use std::fmt;

use crate::{Error, Result};

/// Endpoint direction, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::In => write!(f, "IN"),
            Self::Out => write!(f, "OUT"),
        }
    }
}

/// Endpoint transfer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    /// Control endpoint.
    Control,
    /// Isochronous endpoint.
    Isochronous,
    /// Bulk endpoint.
    Bulk,
    /// Interrupt endpoint.
    Interrupt,
}

/// Endpoint descriptor fields relevant to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointInfo {
    /// Endpoint address including the direction bit.
    pub address: u8,
    /// Direction.
    pub direction: Direction,
    /// Transfer type.
    pub transfer_type: TransferType,
    /// Maximum packet size.
    pub max_packet_size: u16,
}

impl EndpointInfo {
    fn is_bulk(&self, direction: Direction) -> bool {
        self.transfer_type == TransferType::Bulk && self.direction == direction
    }
}

/// The bulk IN and bulk OUT endpoints of the claimed interface.
///
/// Resolved once when the session opens and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointPair {
    /// Bulk IN endpoint, serial data from the device.
    pub input: EndpointInfo,
    /// Bulk OUT endpoint, serial data to the device.
    pub output: EndpointInfo,
}

/// Picks the bulk IN and bulk OUT endpoints of `interface`.
///
/// The first match of each direction wins; all other endpoints are ignored.
pub fn resolve_endpoints(interface: u8, endpoints: impl IntoIterator<Item = EndpointInfo>) -> Result<EndpointPair> {
    let mut input = None;
    let mut output = None;

    for ep in endpoints {
        if input.is_none() && ep.is_bulk(Direction::In) {
            input = Some(ep);
        } else if output.is_none() && ep.is_bulk(Direction::Out) {
            output = Some(ep);
        }
    }

    let input = input.ok_or(Error::EndpointNotFound { interface, direction: Direction::In })?;
    let output = output.ok_or(Error::EndpointNotFound { interface, direction: Direction::Out })?;
    tracing::debug!("using bulk endpoints IN {:#04x} and OUT {:#04x}", input.address, output.address);

    Ok(EndpointPair { input, output })
}

#[cfg(test)]
mod test {
    use super::*;

    fn ep(address: u8, transfer_type: TransferType) -> EndpointInfo {
        let direction = if address & 0x80 != 0 { Direction::In } else { Direction::Out };
        EndpointInfo { address, direction, transfer_type, max_packet_size: 64 }
    }

    #[test]
    fn pl2303_layout() {
        // Interrupt IN, bulk OUT, bulk IN as exposed by the chip.
        let eps = [ep(0x81, TransferType::Interrupt), ep(0x02, TransferType::Bulk), ep(0x83, TransferType::Bulk)];
        let pair = resolve_endpoints(0, eps).unwrap();
        assert_eq!(pair.input.address, 0x83);
        assert_eq!(pair.output.address, 0x02);
    }

    #[test]
    fn order_does_not_matter() {
        let eps = [ep(0x83, TransferType::Bulk), ep(0x81, TransferType::Interrupt), ep(0x02, TransferType::Bulk)];
        let pair = resolve_endpoints(0, eps).unwrap();
        assert_eq!(pair.input.address, 0x83);
        assert_eq!(pair.output.address, 0x02);
    }

    #[test]
    fn first_match_wins() {
        let eps = [
            ep(0x82, TransferType::Bulk),
            ep(0x01, TransferType::Bulk),
            ep(0x84, TransferType::Bulk),
            ep(0x03, TransferType::Bulk),
        ];
        let pair = resolve_endpoints(0, eps).unwrap();
        assert_eq!(pair.input.address, 0x82);
        assert_eq!(pair.output.address, 0x01);
    }

    #[test]
    fn missing_bulk_out() {
        let eps = [ep(0x81, TransferType::Interrupt), ep(0x83, TransferType::Bulk), ep(0x02, TransferType::Interrupt)];
        match resolve_endpoints(3, eps) {
            Err(Error::EndpointNotFound { interface: 3, direction: Direction::Out }) => (),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_bulk_in() {
        let eps = [ep(0x02, TransferType::Bulk)];
        match resolve_endpoints(0, eps) {
            Err(Error::EndpointNotFound { direction: Direction::In, .. }) => (),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn no_endpoints() {
        assert!(resolve_endpoints(0, Vec::<EndpointInfo>::new()).is_err());
    }
}
