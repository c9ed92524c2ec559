//! Driver errors.

use std::io::{self, ErrorKind};

use crate::{endpoint::Direction, transport::ControlRequest};

/// Driver error.
///
/// Transport failures keep the [`io::Error`] reported by the USB stack as their source.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The interface could not be claimed.
    #[error("cannot claim interface {interface}: {source}")]
    InterfaceClaimFailed {
        /// Interface number.
        interface: u8,
        /// Transport error.
        #[source]
        source: io::Error,
    },
    /// The interface lacks a required bulk endpoint.
    #[error("interface {interface} has no bulk {direction} endpoint")]
    EndpointNotFound {
        /// Interface number.
        interface: u8,
        /// Direction of the missing endpoint.
        direction: Direction,
    },
    /// A control transfer failed or moved fewer bytes than requested.
    #[error("control transfer ({request}) failed: {source}")]
    Transfer {
        /// The failed request.
        request: ControlRequest,
        /// Transport error.
        #[source]
        source: io::Error,
    },
    /// Other USB failure.
    #[error("USB error: {0}")]
    Usb(#[from] io::Error),
}

/// Driver result.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The I/O error kind best describing this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InterfaceClaimFailed { source, .. } => match source.kind() {
                ErrorKind::Other => ErrorKind::ResourceBusy,
                kind => kind,
            },
            Self::EndpointNotFound { .. } => ErrorKind::NotFound,
            Self::Transfer { source, .. } => source.kind(),
            Self::Usb(err) => err.kind(),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Usb(err) => err,
            other => io::Error::new(other.kind(), other),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn io_kind_is_preserved() {
        let err = Error::Transfer {
            request: ControlRequest::new(0x21, 0x20, 0, 0),
            source: io::Error::new(ErrorKind::TimedOut, "timeout"),
        };
        assert_eq!(io::Error::from(err).kind(), ErrorKind::TimedOut);

        let err = Error::EndpointNotFound { interface: 0, direction: Direction::Out };
        assert_eq!(err.to_string(), "interface 0 has no bulk OUT endpoint");
        assert_eq!(io::Error::from(err).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn claim_failure_defaults_to_busy() {
        let err = Error::InterfaceClaimFailed { interface: 0, source: io::Error::other("claim") };
        assert_eq!(err.kind(), ErrorKind::ResourceBusy);
    }
}
