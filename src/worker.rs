//! Bulk transfer workers.

use crate::{endpoint::EndpointInfo, Result};

/// A background task streaming serial data over one bulk endpoint.
///
/// A [`Session`](crate::Session) hands each worker its endpoint once the chip
/// is initialized, starts it, and stops it before the interface is released.
pub trait BulkWorker {
    /// Sets the endpoint used by the next start.
    fn set_endpoint(&mut self, endpoint: EndpointInfo);

    /// Starts the worker, stopping a running instance first.
    fn restart(&mut self) -> Result<()>;

    /// Signals the worker to stop and waits until it no longer uses the device.
    ///
    /// Does nothing if the worker is not running.
    fn stop(&mut self);
}

impl<T: BulkWorker + ?Sized> BulkWorker for Box<T> {
    fn set_endpoint(&mut self, endpoint: EndpointInfo) {
        (**self).set_endpoint(endpoint)
    }

    fn restart(&mut self) -> Result<()> {
        (**self).restart()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}
