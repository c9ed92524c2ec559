//! Bulk reader and writer threads.

use bytes::{Bytes, BytesMut};
use rusb::{DeviceHandle, UsbContext};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{guard::InUseGuard, stored_error, SerialReceiver, SerialSender, SharedError};
use crate::{endpoint::EndpointInfo, worker::BulkWorker, Error, Result};

/// Timeout of a single bulk transfer; bounds how long stopping takes.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

const BUFFER_SIZE: usize = 4096;
const QUEUE_LEN: usize = 16;

pub(crate) enum Outgoing {
    Data(Bytes),
    Stop,
}

fn not_configured() -> Error {
    Error::Usb(std::io::Error::new(std::io::ErrorKind::InvalidInput, "worker endpoint not set"))
}

/// Reads serial data from the bulk IN endpoint on a dedicated thread.
pub struct BulkReader<C: UsbContext> {
    hnd: Arc<DeviceHandle<C>>,
    name: String,
    endpoint: Option<EndpointInfo>,
    /// Held while the thread is not running. Dropped on read failure, which ends the receiver.
    tx: Option<mpsc::Sender<BytesMut>>,
    error: SharedError,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Option<mpsc::Sender<BytesMut>>>>,
    _guard: Arc<InUseGuard>,
}

impl<C: UsbContext> fmt::Debug for BulkReader<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BulkReader")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl<C: UsbContext + 'static> BulkReader<C> {
    pub(crate) fn new(hnd: Arc<DeviceHandle<C>>, name: &str, guard: Arc<InUseGuard>) -> (Self, SerialReceiver) {
        let (tx, rx) = mpsc::channel(QUEUE_LEN);
        let error = SharedError::default();
        let recv = SerialReceiver { rx, error: error.clone(), name: name.into() };
        let this = Self {
            hnd,
            name: name.to_string(),
            endpoint: None,
            tx: Some(tx),
            error,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
            _guard: guard,
        };
        (this, recv)
    }
}

impl<C: UsbContext + 'static> BulkWorker for BulkReader<C> {
    fn set_endpoint(&mut self, endpoint: EndpointInfo) {
        self.endpoint = Some(endpoint);
    }

    fn restart(&mut self) -> Result<()> {
        self.stop();

        let ep = self.endpoint.ok_or_else(not_configured)?.address;
        let Some(tx) = self.tx.take() else {
            return Err(Error::Usb(stored_error(&self.error, "worker channel closed")));
        };

        let hnd = self.hnd.clone();
        let error = self.error.clone();
        self.stop = Arc::new(AtomicBool::new(false));
        let stop = self.stop.clone();
        let thread = thread::Builder::new()
            .name(format!("PL2303 {} in", self.name))
            .spawn(move || in_thread(hnd, tx, ep, error, stop))?;
        self.thread = Some(thread);

        Ok(())
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else { return };
        self.stop.store(true, Ordering::Relaxed);
        match thread.join() {
            Ok(tx) => self.tx = tx,
            Err(_) => tracing::error!("reader thread of {} panicked", self.name),
        }
    }
}

/// Writes serial data to the bulk OUT endpoint on a dedicated thread.
pub struct BulkWriter<C: UsbContext> {
    hnd: Arc<DeviceHandle<C>>,
    name: String,
    endpoint: Option<EndpointInfo>,
    /// Held while the thread is not running. Dropped on write failure, which ends the sender.
    rx: Option<mpsc::Receiver<Outgoing>>,
    wake: mpsc::WeakSender<Outgoing>,
    error: SharedError,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Option<mpsc::Receiver<Outgoing>>>>,
    _guard: Arc<InUseGuard>,
}

impl<C: UsbContext> fmt::Debug for BulkWriter<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BulkWriter")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl<C: UsbContext + 'static> BulkWriter<C> {
    pub(crate) fn new(hnd: Arc<DeviceHandle<C>>, name: &str, guard: Arc<InUseGuard>) -> (Self, SerialSender) {
        let (tx, rx) = mpsc::channel(QUEUE_LEN);
        let error = SharedError::default();
        let this = Self {
            hnd,
            name: name.to_string(),
            endpoint: None,
            rx: Some(rx),
            wake: tx.downgrade(),
            error: error.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
            _guard: guard,
        };
        let sender = SerialSender { tx, error, name: name.into() };
        (this, sender)
    }
}

impl<C: UsbContext + 'static> BulkWorker for BulkWriter<C> {
    fn set_endpoint(&mut self, endpoint: EndpointInfo) {
        self.endpoint = Some(endpoint);
    }

    fn restart(&mut self) -> Result<()> {
        self.stop();

        let ep = self.endpoint.ok_or_else(not_configured)?.address;
        let Some(rx) = self.rx.take() else {
            return Err(Error::Usb(stored_error(&self.error, "worker channel closed")));
        };

        let hnd = self.hnd.clone();
        let error = self.error.clone();
        self.stop = Arc::new(AtomicBool::new(false));
        let stop = self.stop.clone();
        let thread = thread::Builder::new()
            .name(format!("PL2303 {} out", self.name))
            .spawn(move || out_thread(hnd, rx, ep, error, stop))?;
        self.thread = Some(thread);

        Ok(())
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else { return };
        self.stop.store(true, Ordering::Relaxed);

        // Wake the thread if it waits for data. If the queue is full it is busy
        // writing and notices the flag after the current transfer.
        if let Some(tx) = self.wake.upgrade() {
            let _ = tx.try_send(Outgoing::Stop);
        }

        match thread.join() {
            Ok(rx) => self.rx = rx,
            Err(_) => tracing::error!("writer thread of {} panicked", self.name),
        }
    }
}

fn in_thread<C: UsbContext>(
    hnd: Arc<DeviceHandle<C>>, tx: mpsc::Sender<BytesMut>, ep: u8, error: SharedError, stop: Arc<AtomicBool>,
) -> Option<mpsc::Sender<BytesMut>> {
    'outer: while !stop.load(Ordering::Relaxed) {
        let mut buf = BytesMut::zeroed(BUFFER_SIZE);
        match hnd.read_bulk(ep, &mut buf, POLL_TIMEOUT) {
            Ok(0) => (),
            Ok(n) => {
                #[cfg(feature = "trace-transfers")]
                tracing::trace!("received {n} bytes");
                buf.truncate(n);

                let mut pending = buf;
                loop {
                    match tx.try_send(pending) {
                        Ok(()) => break,
                        Err(TrySendError::Full(data)) if !stop.load(Ordering::Relaxed) => {
                            pending = data;
                            thread::sleep(POLL_TIMEOUT / 10);
                        }
                        Err(TrySendError::Full(_)) => break 'outer,
                        Err(TrySendError::Closed(_)) => {
                            tracing::debug!("receiver dropped");
                            return None;
                        }
                    }
                }
            }
            Err(rusb::Error::Timeout) => (),
            Err(err) => {
                tracing::warn!("receiving failed: {err}");
                *error.lock().unwrap() = Some(err);
                return None;
            }
        }
    }

    Some(tx)
}

/// Waits for the next data to send.
///
/// Returns `None` when stopping or when all senders are gone. A `Stop` queued
/// for an earlier thread that exited through the flag is skipped.
fn next_outgoing(rx: &mut mpsc::Receiver<Outgoing>, stop: &AtomicBool) -> Option<Bytes> {
    loop {
        match rx.blocking_recv()? {
            Outgoing::Data(data) => return Some(data),
            Outgoing::Stop if stop.load(Ordering::Relaxed) => return None,
            Outgoing::Stop => tracing::trace!("skipping stale stop request"),
        }
    }
}

fn out_thread<C: UsbContext>(
    hnd: Arc<DeviceHandle<C>>, mut rx: mpsc::Receiver<Outgoing>, ep: u8, error: SharedError, stop: Arc<AtomicBool>,
) -> Option<mpsc::Receiver<Outgoing>> {
    'outer: while let Some(mut data) = next_outgoing(&mut rx, &stop) {

        while !data.is_empty() {
            if stop.load(Ordering::Relaxed) {
                break 'outer;
            }

            match hnd.write_bulk(ep, &data, POLL_TIMEOUT) {
                Ok(n) => {
                    #[cfg(feature = "trace-transfers")]
                    tracing::trace!("sent {n} bytes");
                    let _ = data.split_to(n);
                }
                Err(rusb::Error::Timeout) => (),
                Err(err) => {
                    tracing::warn!("sending failed: {err}");
                    *error.lock().unwrap() = Some(err);
                    return None;
                }
            }
        }

        if stop.load(Ordering::Relaxed) {
            break;
        }
    }

    Some(rx)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stale_stop_is_skipped() {
        let (tx, mut rx) = mpsc::channel(QUEUE_LEN);
        let stop = AtomicBool::new(false);

        tx.try_send(Outgoing::Stop).unwrap();
        tx.try_send(Outgoing::Data(Bytes::from_static(b"abc"))).unwrap();
        assert_eq!(next_outgoing(&mut rx, &stop).unwrap(), Bytes::from_static(b"abc"));

        stop.store(true, Ordering::Relaxed);
        tx.try_send(Outgoing::Stop).unwrap();
        assert!(next_outgoing(&mut rx, &stop).is_none());
    }

    #[test]
    fn senders_gone() {
        let (tx, mut rx) = mpsc::channel(QUEUE_LEN);
        let stop = AtomicBool::new(false);

        tx.try_send(Outgoing::Data(Bytes::from_static(b"x"))).unwrap();
        drop(tx);
        assert_eq!(next_outgoing(&mut rx, &stop).unwrap(), Bytes::from_static(b"x"));
        assert!(next_outgoing(&mut rx, &stop).is_none());
    }
}
