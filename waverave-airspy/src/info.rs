//! Get information about a receiver.
//!
//! This module contains the [`Info`] struct for accessing information from the
//! receiver, which can be used to get:
//!
//! - The MCU's [part ID and serial number][PartIdSerial] with [Info::part_id_serial].
//! - The [board identifier][BoardId], with [Info::board_id]
//! - The firmware version string, with [Info::version_string]
//!
//! The general way to do this is:
//!
//! ```no_run
//!
//! # use anyhow::Result;
//! # fn main() -> Result<()> {
//!
//! use waverave_airspy::info::*;
//!
//! let airspy = waverave_airspy::open_first()?;
//! let info = airspy.info();
//!
//! let serial: PartIdSerial = info.part_id_serial()?;
//! let board_id: BoardId = info.board_id()?;
//! let version: String = info.version_string()?;
//!
//! # Ok(())
//! # }
//! ```
use crate::consts::ControlRequest;
use crate::transport::Transport;
use crate::{Airspy, Error, ReceiverFamily};

/// The MCU part ID and unique serial number.
///
/// The Part ID identifies the exact LPC43xx part that was populated. Only the
/// last two words of the unique ID are used for the serial number printed on
/// the USB descriptor; see [`PartIdSerial::serial`].
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Zeroable, bytemuck::Pod)]
#[allow(missing_docs)]
pub struct PartIdSerial {
    pub part_id: [u32; 2],
    pub serial_no: [u32; 4],
}

impl PartIdSerial {
    fn le_convert(&mut self) {
        for x in self.part_id.iter_mut() {
            *x = u32::from_le(*x);
        }
        for x in self.serial_no.iter_mut() {
            *x = u32::from_le(*x);
        }
    }

    /// The 64-bit serial number, as used in the USB serial-number descriptor.
    pub fn serial(&self) -> u64 {
        ((self.serial_no[2] as u64) << 32) | self.serial_no[3] as u64
    }
}

/// The board's identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardId {
    /// Board 0 on an Airspy: the original Airspy design.
    Airspy,
    /// Board 0 on a HydraSDR: an RFOne using the shared Airspy USB IDs.
    HydraSdrLegacy,
    /// Board 1 on a HydraSDR: an RFOne with its own USB IDs.
    HydraSdrRfOne,
    /// The firmware couldn't identify the board.
    Invalid,
    /// Some other board.
    Unknown(u8),
}

impl std::fmt::Display for BoardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Airspy => f.write_str("AIRSPY"),
            Self::HydraSdrLegacy => f.write_str("HydraSDR RFOne Legacy VID/PID"),
            Self::HydraSdrRfOne => f.write_str("HydraSDR RFOne Official VID/PID"),
            Self::Invalid => f.write_str("Invalid Board ID"),
            Self::Unknown(v) => write!(f, "Unknown Board ID (0x{:x})", v),
        }
    }
}

impl BoardId {
    fn from_u8(family: ReceiverFamily, v: u8) -> Self {
        use BoardId::*;
        match (family, v) {
            (_, 0xff) => Invalid,
            (ReceiverFamily::Airspy, 0) => Airspy,
            (ReceiverFamily::HydraSdr, 0) => HydraSdrLegacy,
            (ReceiverFamily::HydraSdr, 1) => HydraSdrRfOne,
            (_, v) => Unknown(v),
        }
    }
}

/// Info-gathering operations for the receiver.
///
/// Borrows the device while doing operations.
pub struct Info<'a, T: Transport> {
    inner: &'a Airspy<T>,
}

impl<'a, T: Transport> Info<'a, T> {
    pub(crate) fn new(inner: &'a Airspy<T>) -> Info<'a, T> {
        Self { inner }
    }

    /// Get the [family][ReceiverFamily] of receiver.
    pub fn family(&self) -> ReceiverFamily {
        self.inner.family
    }

    /// Get the [board hardware ID][BoardId].
    pub fn board_id(&self) -> Result<BoardId, Error> {
        let ret = self.inner.read_u8(ControlRequest::BoardIdRead, 0)?;
        Ok(BoardId::from_u8(self.inner.family, ret))
    }

    /// Get the firmware version as a string, up to the first NUL.
    pub fn version_string(&self) -> Result<String, Error> {
        crate::read_version(&self.inner.transport)
    }

    /// Get the MCU's part ID and serial number.
    ///
    /// See [`PartIdSerial`] for more info.
    pub fn part_id_serial(&self) -> Result<PartIdSerial, Error> {
        let mut v: PartIdSerial = self
            .inner
            .read_struct(ControlRequest::BoardPartidSerialnoRead)?;
        v.le_convert();
        Ok(v)
    }
}
