//! Serial line configuration and device sessions.

use std::{fmt, time::Duration};

use crate::{
    endpoint::{resolve_endpoints, EndpointPair},
    init::{run_init, InitCommand, InitReport, PL2303_INIT},
    line::{apply_record, encode_baud, DataBits, Field, FlowControl, LineCoding, LineState, Parity, StopBits},
    transport::UsbConnection,
    worker::BulkWorker,
    Error, Result, TIMEOUT,
};

/// Options for opening a device.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    /// Timeout of each control transfer.
    pub timeout: Duration,
    /// Interface to claim. The PL2303 exposes a single interface.
    pub interface: u8,
    /// Fail when the interface cannot be claimed.
    ///
    /// If disabled, a claim failure is logged and opening proceeds.
    pub strict_claim: bool,
    /// Let the USB stack detach a bound kernel driver before claiming.
    pub detach_kernel_driver: bool,
    /// Initialization sequence.
    pub init_sequence: &'static [InitCommand],
    /// Line coding written during initialization.
    pub line_coding: LineCoding,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            timeout: TIMEOUT,
            interface: 0,
            strict_claim: true,
            detach_kernel_driver: true,
            init_sequence: PL2303_INIT,
            line_coding: LineCoding::DEFAULT,
        }
    }
}

impl OpenOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the control transfer timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the interface number.
    #[must_use]
    pub fn with_interface(mut self, interface: u8) -> Self {
        self.interface = interface;
        self
    }

    /// Sets whether a failed interface claim aborts opening.
    #[must_use]
    pub fn with_strict_claim(mut self, strict_claim: bool) -> Self {
        self.strict_claim = strict_claim;
        self
    }

    /// Sets whether a bound kernel driver is detached.
    #[must_use]
    pub fn with_detach_kernel_driver(mut self, detach_kernel_driver: bool) -> Self {
        self.detach_kernel_driver = detach_kernel_driver;
        self
    }

    /// Sets the initialization sequence, for chip variants.
    #[must_use]
    pub fn with_init_sequence(mut self, init_sequence: &'static [InitCommand]) -> Self {
        self.init_sequence = init_sequence;
        self
    }

    /// Sets the initial line coding.
    #[must_use]
    pub fn with_line_coding(mut self, line_coding: LineCoding) -> Self {
        self.line_coding = line_coding;
        self
    }
}

/// Line configuration of a PL2303.
///
/// Caches the line coding last written to the device. Setters only issue a
/// transfer when the encoded record actually changes, and always send the full record.
pub struct Pl2303<C> {
    conn: C,
    line: LineState,
    timeout: Duration,
}

impl<C> fmt::Debug for Pl2303<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Pl2303")
            .field("line_coding", &self.line.snapshot())
            .field("version", &self.line.version())
            .finish_non_exhaustive()
    }
}

impl<C: UsbConnection> Pl2303<C> {
    /// Creates the driver for a connection whose device uses `line_coding`.
    pub fn new(conn: C, line_coding: LineCoding, timeout: Duration) -> Self {
        Self { conn, line: LineState::new(line_coding), timeout }
    }

    /// Runs an initialization sequence, writing the cached line coding where the sequence asks for it.
    pub fn initialize(&self, sequence: &[InitCommand]) -> InitReport {
        run_init(&self.conn, sequence, &self.line.snapshot(), self.timeout)
    }

    /// The underlying connection.
    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Snapshot of the cached line coding.
    pub fn line_coding(&self) -> LineCoding {
        self.line.snapshot()
    }

    /// Number of changes made to the line coding since opening.
    pub fn version(&self) -> u64 {
        self.line.version()
    }

    /// Sets the baud rate.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.update(Field::BaudRate, &encode_baud(baud_rate))
    }

    /// Sets the number of data bits.
    ///
    /// Values that do not convert into [`DataBits`] are ignored.
    pub fn set_data_bits(&mut self, data_bits: impl TryInto<DataBits>) -> Result<()> {
        match data_bits.try_into() {
            Ok(data_bits) => self.update(Field::DataBits, &[data_bits.code()]),
            Err(_) => {
                tracing::debug!("ignoring unsupported data bits setting");
                Ok(())
            }
        }
    }

    /// Sets the number of stop bits.
    ///
    /// Values that do not convert into [`StopBits`] are ignored.
    pub fn set_stop_bits(&mut self, stop_bits: impl TryInto<StopBits>) -> Result<()> {
        match stop_bits.try_into() {
            Ok(stop_bits) => self.update(Field::StopBits, &[stop_bits.code()]),
            Err(_) => {
                tracing::debug!("ignoring unsupported stop bits setting");
                Ok(())
            }
        }
    }

    /// Sets the parity.
    ///
    /// Values that do not convert into [`Parity`] are ignored.
    pub fn set_parity(&mut self, parity: impl TryInto<Parity>) -> Result<()> {
        match parity.try_into() {
            Ok(parity) => self.update(Field::Parity, &[parity.code()]),
            Err(_) => {
                tracing::debug!("ignoring unsupported parity setting");
                Ok(())
            }
        }
    }

    /// Accepts a flow control mode.
    ///
    /// The chip's flow control is not supported; this never touches the device.
    pub fn set_flow_control(&mut self, flow_control: FlowControl) {
        tracing::debug!("flow control {flow_control:?} is not supported, ignoring");
    }

    fn update(&mut self, field: Field, encoded: &[u8]) -> Result<()> {
        let Some(record) = self.line.update(field, encoded) else {
            tracing::trace!("{field:?} unchanged");
            return Ok(());
        };

        tracing::debug!("changing line coding to {record:?}");
        apply_record(&self.conn, &record, self.timeout)?;
        Ok(())
    }
}

/// An open PL2303.
///
/// Owns the claimed interface, the driver and both bulk workers. Closing or
/// dropping the session stops the workers and then releases the interface.
pub struct Session<C: UsbConnection, R: BulkWorker, W: BulkWorker> {
    driver: Pl2303<C>,
    endpoints: EndpointPair,
    interface: u8,
    claimed: bool,
    reader: R,
    writer: W,
    init_report: InitReport,
    open: bool,
}

impl<C: UsbConnection, R: BulkWorker, W: BulkWorker> fmt::Debug for Session<C, R, W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("interface", &self.interface)
            .field("endpoints", &self.endpoints)
            .field("driver", &self.driver)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl<C: UsbConnection, R: BulkWorker, W: BulkWorker> Session<C, R, W> {
    /// Opens a session on a connected device.
    ///
    /// Claims the interface, resolves the bulk endpoints, runs the initialization
    /// sequence and starts the reader and writer. Failing initialization steps do
    /// not abort opening; they are available through [`init_report`](Self::init_report).
    pub fn open(conn: C, mut reader: R, mut writer: W, options: &OpenOptions) -> Result<Self> {
        let interface = options.interface;

        let claimed = match conn.claim_interface(interface) {
            Ok(()) => {
                tracing::debug!("claimed interface {interface}");
                true
            }
            Err(source) if options.strict_claim => return Err(Error::InterfaceClaimFailed { interface, source }),
            Err(err) => {
                tracing::warn!("cannot claim interface {interface}, continuing anyway: {err}");
                false
            }
        };

        let resolved = conn.endpoints(interface).map_err(Error::Usb).and_then(|eps| resolve_endpoints(interface, eps));
        let endpoints = match resolved {
            Ok(endpoints) => endpoints,
            Err(err) => {
                if claimed {
                    if let Err(err) = conn.release_interface(interface) {
                        tracing::warn!("releasing interface {interface} failed: {err}");
                    }
                }
                return Err(err);
            }
        };

        let driver = Pl2303::new(conn, options.line_coding, options.timeout);
        let init_report = driver.initialize(options.init_sequence);
        if !init_report.is_clean() {
            tracing::warn!("{} initialization steps failed", init_report.failures().count());
        }

        reader.set_endpoint(endpoints.input);
        writer.set_endpoint(endpoints.output);
        if let Err(err) = reader.restart().and_then(|()| writer.restart()) {
            reader.stop();
            writer.stop();
            if claimed {
                if let Err(err) = driver.connection().release_interface(interface) {
                    tracing::warn!("releasing interface {interface} failed: {err}");
                }
            }
            return Err(err);
        }

        tracing::info!("PL2303 session open on interface {interface}");
        Ok(Self { driver, endpoints, interface, claimed, reader, writer, init_report, open: true })
    }

    /// The resolved bulk endpoints.
    pub fn endpoints(&self) -> &EndpointPair {
        &self.endpoints
    }

    /// Outcome of the initialization sequence.
    pub fn init_report(&self) -> &InitReport {
        &self.init_report
    }

    /// Line configuration.
    pub fn driver(&self) -> &Pl2303<C> {
        &self.driver
    }

    /// Mutable line configuration.
    pub fn driver_mut(&mut self) -> &mut Pl2303<C> {
        &mut self.driver
    }

    /// Stops the workers and releases the interface.
    ///
    /// The cached line coding is not reset.
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        tracing::debug!("stopping workers");
        self.reader.stop();
        self.writer.stop();

        if self.claimed {
            self.driver.connection().release_interface(self.interface)?;
        }

        tracing::info!("PL2303 session on interface {} closed", self.interface);
        Ok(())
    }
}

impl<C: UsbConnection, R: BulkWorker, W: BulkWorker> Drop for Session<C, R, W> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            tracing::warn!("closing session failed: {err}");
        }
    }
}
