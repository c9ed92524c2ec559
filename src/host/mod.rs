//! Native host backend using libusb.
//!
//! Use [`find_device`] or [`rusb`] to find the device, open it and pass the
//! handle to [`open`]. Serial data is exchanged through the returned
//! [`SerialSender`] and [`SerialReceiver`]; the [`HostSession`] controls the
//! line configuration and closes the device.
//!
//! Errors from the data path have an inner error type of [`rusb::Error`].
//!

use bytes::{Bytes, BytesMut};
use futures::{sink, stream, Sink, SinkExt, Stream, StreamExt};
use std::{
    fmt,
    future::Future,
    io::{Error, ErrorKind, Result},
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};
use tokio::sync::mpsc;

mod guard;
mod native;
mod worker;

pub use native::*;
pub use worker::{BulkReader, BulkWriter};

use worker::Outgoing;

type SharedError = Arc<Mutex<Option<rusb::Error>>>;

fn stored_error(error: &SharedError, stopped: &str) -> Error {
    match *error.lock().unwrap() {
        Some(err) => to_io_err(err),
        None => Error::new(ErrorKind::BrokenPipe, stopped.to_string()),
    }
}

/// Sends data to the serial port.
pub struct SerialSender {
    tx: mpsc::Sender<Outgoing>,
    error: SharedError,
    name: Arc<str>,
}

impl fmt::Debug for SerialSender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("SerialSender").field(&self.name).finish()
    }
}

impl SerialSender {
    /// Queue data for transmission.
    ///
    /// ## Cancel safety
    /// If canceled, no data will have been queued.
    pub async fn send(&self, data: Bytes) -> Result<()> {
        match self.tx.send(Outgoing::Data(data)).await {
            Ok(()) => Ok(()),
            Err(_) => Err(stored_error(&self.error, "serial writer stopped")),
        }
    }

    /// Wait until the writer has stopped.
    pub fn closed(&self) -> impl Future<Output = ()> {
        let tx = self.tx.clone();
        async move { tx.closed().await }
    }

    /// Turns this into a sink.
    pub fn into_sink(self) -> SerialSink {
        let sink = sink::unfold(self, |this, data: Bytes| async move {
            this.send(data).await?;
            Ok(this)
        });

        SerialSink(Box::pin(sink))
    }
}

/// Sink of data to the serial port.
pub struct SerialSink(Pin<Box<dyn Sink<Bytes, Error = Error> + Send + Sync + 'static>>);

impl fmt::Debug for SerialSink {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("SerialSink").finish()
    }
}

impl Sink<Bytes> for SerialSink {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        Pin::into_inner(self).0.poll_ready_unpin(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<()> {
        Pin::into_inner(self).0.start_send_unpin(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        Pin::into_inner(self).0.poll_flush_unpin(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        Pin::into_inner(self).0.poll_close_unpin(cx)
    }
}

/// Receives data from the serial port.
pub struct SerialReceiver {
    rx: mpsc::Receiver<BytesMut>,
    error: SharedError,
    name: Arc<str>,
}

impl fmt::Debug for SerialReceiver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("SerialReceiver").field(&self.name).finish()
    }
}

impl SerialReceiver {
    /// Receive the next chunk of data.
    ///
    /// Chunk boundaries follow the USB transfers and carry no meaning.
    ///
    /// ## Cancel safety
    /// If canceled, no data will have been removed from the receive queue.
    pub async fn recv(&mut self) -> Result<BytesMut> {
        match self.rx.recv().await {
            Some(data) => Ok(data),
            None => Err(stored_error(&self.error, "serial reader stopped")),
        }
    }

    /// Turns this into a stream of received data.
    ///
    /// The stream ends when the session is closed.
    pub fn into_stream(self) -> SerialStream {
        let stream = stream::try_unfold(self, |mut this| async move {
            match this.recv().await {
                Ok(data) => Ok(Some((data, this))),
                Err(err) if err.kind() == ErrorKind::BrokenPipe && this.error.lock().unwrap().is_none() => Ok(None),
                Err(err) => Err(err),
            }
        });

        SerialStream(Box::pin(stream))
    }
}

/// Stream of data from the serial port.
pub struct SerialStream(Pin<Box<dyn Stream<Item = Result<BytesMut>> + Send + Sync + 'static>>);

impl fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("SerialStream").finish()
    }
}

impl Stream for SerialStream {
    type Item = Result<BytesMut>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        Pin::into_inner(self).0.poll_next_unpin(cx)
    }
}
