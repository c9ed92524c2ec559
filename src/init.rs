//! Chip initialization sequence.
//!
//! The PL2303 has to be walked through a fixed series of vendor requests before
//! it forwards serial data. The values have no documented meaning; they are kept
//! as an ordered command table so that chip variants can supply their own.

use std::time::Duration;

use crate::{
    line::{apply_record, LineCoding},
    transport::{ControlRequest, Data, UsbConnection},
    Error, Result, REQTYPE_DEVICE_TO_HOST_VENDOR, REQTYPE_HOST_TO_DEVICE_CLASS, REQTYPE_HOST_TO_DEVICE_VENDOR,
    SET_CONTROL_LINE_STATE, SET_LINE_CODING, VENDOR_WRITE_REQUEST,
};

/// Data stage of an initialization command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitData {
    /// No data stage.
    None,
    /// Read this many bytes from the device and discard them.
    Read(u16),
    /// Send the session's line coding record.
    LineCoding,
}

/// One step of an initialization sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InitCommand {
    /// Setup stage.
    pub request: ControlRequest,
    /// Data stage.
    pub data: InitData,
}

impl InitCommand {
    /// Vendor read of a single byte.
    pub const fn vendor_read(value: u16, index: u16) -> Self {
        Self {
            request: ControlRequest::new(REQTYPE_DEVICE_TO_HOST_VENDOR, VENDOR_WRITE_REQUEST, value, index),
            data: InitData::Read(1),
        }
    }

    /// Vendor write without data.
    pub const fn vendor_write(value: u16, index: u16) -> Self {
        Self {
            request: ControlRequest::new(REQTYPE_HOST_TO_DEVICE_VENDOR, VENDOR_WRITE_REQUEST, value, index),
            data: InitData::None,
        }
    }

    /// Class request to the interface.
    pub const fn class(request: u8, value: u16, data: InitData) -> Self {
        Self { request: ControlRequest::new(REQTYPE_HOST_TO_DEVICE_CLASS, request, value, 0), data }
    }
}

/// Initialization sequence of the PL2303, as performed by the vendor driver.
pub const PL2303_INIT: &[InitCommand] = &[
    InitCommand::vendor_read(0x8484, 0),
    InitCommand::vendor_write(0x0404, 0),
    InitCommand::vendor_read(0x8484, 0),
    InitCommand::vendor_read(0x8383, 0),
    InitCommand::vendor_read(0x8484, 0),
    InitCommand::vendor_write(0x0404, 1),
    InitCommand::vendor_read(0x8484, 0),
    InitCommand::vendor_read(0x8383, 0),
    InitCommand::vendor_write(0x0000, 1),
    InitCommand::vendor_write(0x0001, 0),
    InitCommand::vendor_write(0x0002, 0x0044),
    // DTR and RTS on.
    InitCommand::class(SET_CONTROL_LINE_STATE, 0x0003, InitData::None),
    InitCommand::class(SET_LINE_CODING, 0x0000, InitData::LineCoding),
    InitCommand::vendor_write(0x0505, 0x1311),
];

/// Outcome of every step of an initialization run.
#[derive(Debug)]
pub struct InitReport {
    steps: Vec<(InitCommand, Result<usize>)>,
}

impl InitReport {
    /// Executed steps with the transferred length or the error.
    pub fn steps(&self) -> &[(InitCommand, Result<usize>)] {
        &self.steps
    }

    /// Steps that failed.
    pub fn failures(&self) -> impl Iterator<Item = (&InitCommand, &Error)> {
        self.steps.iter().filter_map(|(cmd, res)| res.as_ref().err().map(|err| (cmd, err)))
    }

    /// Whether all steps succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Runs the initialization sequence.
///
/// All steps are attempted in order; a failing step is logged and does not stop the sequence.
pub fn run_init<C: UsbConnection + ?Sized>(
    conn: &C, sequence: &[InitCommand], line_coding: &LineCoding, timeout: Duration,
) -> InitReport {
    tracing::debug!("running initialization sequence of {} steps", sequence.len());

    let mut steps = Vec::with_capacity(sequence.len());
    for (n, cmd) in sequence.iter().enumerate() {
        let request = cmd.request;
        let res = match cmd.data {
            InitData::None => conn.control_transfer(request, Data::Out(&[]), timeout),
            InitData::Read(len) => {
                let mut buf = vec![0; len.into()];
                conn.control_transfer(request, Data::In(&mut buf), timeout)
            }
            InitData::LineCoding => {
                let res = apply_record(conn, line_coding, timeout);
                log_step(n, &request, &res);
                steps.push((*cmd, res));
                continue;
            }
        };

        let res = res.map_err(|source| Error::Transfer { request, source });
        log_step(n, &request, &res);
        steps.push((*cmd, res));
    }

    InitReport { steps }
}

fn log_step(n: usize, request: &ControlRequest, res: &Result<usize>) {
    match res {
        Ok(len) => tracing::trace!("init step {n} ({request}): {len} bytes"),
        Err(err) => tracing::warn!("init step {n} failed: {err}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_matches_vendor_driver() {
        let expected: [(u8, u8, u16, u16, InitData); 14] = [
            (0xc0, 0x01, 0x8484, 0x0000, InitData::Read(1)),
            (0x40, 0x01, 0x0404, 0x0000, InitData::None),
            (0xc0, 0x01, 0x8484, 0x0000, InitData::Read(1)),
            (0xc0, 0x01, 0x8383, 0x0000, InitData::Read(1)),
            (0xc0, 0x01, 0x8484, 0x0000, InitData::Read(1)),
            (0x40, 0x01, 0x0404, 0x0001, InitData::None),
            (0xc0, 0x01, 0x8484, 0x0000, InitData::Read(1)),
            (0xc0, 0x01, 0x8383, 0x0000, InitData::Read(1)),
            (0x40, 0x01, 0x0000, 0x0001, InitData::None),
            (0x40, 0x01, 0x0001, 0x0000, InitData::None),
            (0x40, 0x01, 0x0002, 0x0044, InitData::None),
            (0x21, 0x22, 0x0003, 0x0000, InitData::None),
            (0x21, 0x20, 0x0000, 0x0000, InitData::LineCoding),
            (0x40, 0x01, 0x0505, 0x1311, InitData::None),
        ];

        assert_eq!(PL2303_INIT.len(), expected.len());
        for (cmd, (request_type, request, value, index, data)) in PL2303_INIT.iter().zip(expected) {
            assert_eq!(cmd.request, ControlRequest::new(request_type, request, value, index));
            assert_eq!(cmd.data, data);
        }
    }

    #[test]
    fn reads_are_device_to_host() {
        for cmd in PL2303_INIT {
            assert_eq!(cmd.request.is_in(), matches!(cmd.data, InitData::Read(_)), "{}", cmd.request);
        }
    }
}
