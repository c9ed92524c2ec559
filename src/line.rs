//! Line coding.
//!
//! The chip takes its serial parameters as the 7-byte CDC line coding record:
//!
//! | offset | size | field                                        |
//! |--------|------|----------------------------------------------|
//! | 0      | 4    | baud rate, little endian                     |
//! | 4      | 1    | stop bits (0 = 1, 1 = 1.5, 2 = 2)            |
//! | 5      | 1    | parity (0 = none, 1 = odd, 2 = even, 3 = mark, 4 = space) |
//! | 6      | 1    | data bits (5, 6, 7 or 8)                     |
//!
//! The record is always written in full.

use std::{
    fmt,
    io::{self, ErrorKind},
    ops::Range,
    time::Duration,
};

use crate::{
    transport::{ControlRequest, Data, UsbConnection},
    Error, Result, REQTYPE_HOST_TO_DEVICE_CLASS, SET_LINE_CODING,
};

/// Size of the line coding record.
pub const LINE_CODING_LEN: usize = 7;

/// Request writing the line coding record.
pub const SET_LINE_CODING_REQUEST: ControlRequest =
    ControlRequest::new(REQTYPE_HOST_TO_DEVICE_CLASS, SET_LINE_CODING, 0x0000, 0);

/// A setting value the chip does not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unsupported {setting} value {value}")]
pub struct Unsupported {
    /// Name of the setting.
    pub setting: &'static str,
    /// Rejected value.
    pub value: u8,
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

impl DataBits {
    /// Line coding code.
    pub const fn code(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = Unsupported;

    fn try_from(value: u8) -> std::result::Result<Self, Unsupported> {
        match value {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            value => Err(Unsupported { setting: "data bits", value }),
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 1.5 stop bits.
    OnePointFive,
    /// 2 stop bits.
    Two,
}

impl StopBits {
    /// Line coding code.
    pub const fn code(self) -> u8 {
        match self {
            Self::One => 0,
            Self::OnePointFive => 1,
            Self::Two => 2,
        }
    }
}

impl TryFrom<u8> for StopBits {
    type Error = Unsupported;

    /// Converts from the line coding code.
    fn try_from(value: u8) -> std::result::Result<Self, Unsupported> {
        match value {
            0 => Ok(Self::One),
            1 => Ok(Self::OnePointFive),
            2 => Ok(Self::Two),
            value => Err(Unsupported { setting: "stop bits", value }),
        }
    }
}

/// Parity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
    /// Mark parity (always 1).
    Mark,
    /// Space parity (always 0).
    Space,
}

impl Parity {
    /// Line coding code.
    pub const fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Odd => 1,
            Self::Even => 2,
            Self::Mark => 3,
            Self::Space => 4,
        }
    }
}

impl TryFrom<u8> for Parity {
    type Error = Unsupported;

    /// Converts from the line coding code.
    fn try_from(value: u8) -> std::result::Result<Self, Unsupported> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Odd),
            2 => Ok(Self::Even),
            3 => Ok(Self::Mark),
            4 => Ok(Self::Space),
            value => Err(Unsupported { setting: "parity", value }),
        }
    }
}

/// Flow control mode.
///
/// Flow control is not supported on this chip and setting it has no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    Off,
    /// RTS/CTS hardware flow control.
    RtsCts,
    /// DSR/DTR hardware flow control.
    DsrDtr,
    /// XON/XOFF software flow control.
    XonXoff,
}

/// Encodes a baud rate as it appears in the line coding record.
pub const fn encode_baud(rate: u32) -> [u8; 4] {
    rate.to_le_bytes()
}

/// Decodes the baud rate field of the line coding record.
pub const fn decode_baud(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes)
}

/// Field of the line coding record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    BaudRate,
    StopBits,
    Parity,
    DataBits,
}

impl Field {
    const fn range(self) -> Range<usize> {
        match self {
            Self::BaudRate => 0..4,
            Self::StopBits => 4..5,
            Self::Parity => 5..6,
            Self::DataBits => 6..7,
        }
    }
}

/// The 7-byte line coding record.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineCoding([u8; LINE_CODING_LEN]);

impl LineCoding {
    /// 9600 baud, 8 data bits, no parity, 1 stop bit.
    pub const DEFAULT: Self = Self::new(9600, StopBits::One, Parity::None, DataBits::Eight);

    /// Builds a record from its settings.
    pub const fn new(baud_rate: u32, stop_bits: StopBits, parity: Parity, data_bits: DataBits) -> Self {
        let [b0, b1, b2, b3] = encode_baud(baud_rate);
        Self([b0, b1, b2, b3, stop_bits.code(), parity.code(), data_bits.code()])
    }

    /// Wraps raw record bytes.
    pub const fn from_bytes(bytes: [u8; LINE_CODING_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw record bytes as sent to the device.
    pub const fn as_bytes(&self) -> &[u8; LINE_CODING_LEN] {
        &self.0
    }

    /// Baud rate.
    pub const fn baud_rate(&self) -> u32 {
        decode_baud([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Stop bits, if the code is valid.
    pub fn stop_bits(&self) -> Option<StopBits> {
        StopBits::try_from(self.0[4]).ok()
    }

    /// Parity, if the code is valid.
    pub fn parity(&self) -> Option<Parity> {
        Parity::try_from(self.0[5]).ok()
    }

    /// Data bits, if the code is valid.
    pub fn data_bits(&self) -> Option<DataBits> {
        DataBits::try_from(self.0[6]).ok()
    }

    pub(crate) fn field(&self, field: Field) -> &[u8] {
        &self.0[field.range()]
    }

    fn field_mut(&mut self, field: Field) -> &mut [u8] {
        &mut self.0[field.range()]
    }
}

impl Default for LineCoding {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Debug for LineCoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LineCoding")
            .field("baud_rate", &self.baud_rate())
            .field("stop_bits", &self.stop_bits())
            .field("parity", &self.parity())
            .field("data_bits", &self.data_bits())
            .finish()
    }
}

/// Cached line coding of an open device.
///
/// Every change bumps the version. Transfers always send a copy of the record.
#[derive(Debug, Clone)]
pub(crate) struct LineState {
    record: LineCoding,
    version: u64,
}

impl LineState {
    pub fn new(record: LineCoding) -> Self {
        Self { record, version: 0 }
    }

    pub fn snapshot(&self) -> LineCoding {
        self.record
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Stores `encoded` into `field`.
    ///
    /// Returns the updated record if the bytes differ from the cached ones.
    pub fn update(&mut self, field: Field, encoded: &[u8]) -> Option<LineCoding> {
        if self.record.field(field) == encoded {
            return None;
        }

        self.record.field_mut(field).copy_from_slice(encoded);
        self.version += 1;
        Some(self.record)
    }
}

/// Writes the complete line coding record to the device.
///
/// Returns the number of bytes transferred.
pub fn apply_record<C: UsbConnection + ?Sized>(conn: &C, record: &LineCoding, timeout: Duration) -> Result<usize> {
    let request = SET_LINE_CODING_REQUEST;
    let bytes = *record.as_bytes();

    let n = conn
        .control_transfer(request, Data::Out(&bytes), timeout)
        .map_err(|source| Error::Transfer { request, source })?;
    tracing::trace!("set line coding {record:?}: {n} bytes");

    if n != LINE_CODING_LEN {
        let source = io::Error::new(ErrorKind::WriteZero, format!("short transfer: {n} of {LINE_CODING_LEN} bytes"));
        return Err(Error::Transfer { request, source });
    }

    Ok(n)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn baud_9600() {
        assert_eq!(encode_baud(9600), [0x80, 0x25, 0x00, 0x00]);
        assert_eq!(decode_baud([0x80, 0x25, 0x00, 0x00]), 9600);
    }

    #[test]
    fn baud_extremes() {
        assert_eq!(encode_baud(0), [0, 0, 0, 0]);
        assert_eq!(encode_baud(u32::MAX), [0xff; 4]);
        assert_eq!(encode_baud(12_000_000), [0x00, 0x1b, 0xb7, 0x00]);
    }

    #[test]
    fn default_record() {
        assert_eq!(LineCoding::DEFAULT.as_bytes(), &[0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x08]);
        assert_eq!(LineCoding::default(), LineCoding::DEFAULT);
    }

    #[test]
    fn codes() {
        assert_eq!(StopBits::One.code(), 0);
        assert_eq!(StopBits::OnePointFive.code(), 1);
        assert_eq!(StopBits::Two.code(), 2);

        assert_eq!(Parity::None.code(), 0);
        assert_eq!(Parity::Odd.code(), 1);
        assert_eq!(Parity::Even.code(), 2);
        assert_eq!(Parity::Mark.code(), 3);
        assert_eq!(Parity::Space.code(), 4);

        for bits in 5u8..=8 {
            assert_eq!(DataBits::try_from(bits).unwrap().code(), bits);
        }
    }

    #[test]
    fn unsupported_codes() {
        assert_eq!(DataBits::try_from(9u8), Err(Unsupported { setting: "data bits", value: 9 }));
        assert!(DataBits::try_from(4u8).is_err());
        assert!(StopBits::try_from(3u8).is_err());
        assert!(Parity::try_from(5u8).is_err());
    }

    #[test]
    fn decode_record() {
        let record = LineCoding::from_bytes([0x00, 0xc2, 0x01, 0x00, 0x02, 0x02, 0x07]);
        assert_eq!(record.baud_rate(), 115_200);
        assert_eq!(record.stop_bits(), Some(StopBits::Two));
        assert_eq!(record.parity(), Some(Parity::Even));
        assert_eq!(record.data_bits(), Some(DataBits::Seven));
        assert_eq!(record, LineCoding::new(115_200, StopBits::Two, Parity::Even, DataBits::Seven));

        let garbage = LineCoding::from_bytes([0; LINE_CODING_LEN]);
        assert_eq!(garbage.data_bits(), None);
    }

    #[test]
    fn update_only_on_change() {
        let mut state = LineState::new(LineCoding::DEFAULT);

        assert_eq!(state.update(Field::DataBits, &[8]), None);
        assert_eq!(state.version(), 0);

        let updated = state.update(Field::DataBits, &[7]).unwrap();
        assert_eq!(updated.data_bits(), Some(DataBits::Seven));
        assert_eq!(state.version(), 1);

        let updated = state.update(Field::BaudRate, &encode_baud(115_200)).unwrap();
        assert_eq!(updated.baud_rate(), 115_200);
        assert_eq!(updated.data_bits(), Some(DataBits::Seven));
        assert_eq!(state.snapshot(), updated);
        assert_eq!(state.version(), 2);
    }
}
