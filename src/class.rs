//! Bluetooth Class of Device decoding.
//!
//! The Class of Device (CoD) is a 24-bit field advertised by BR/EDR devices. BlueZ exposes it as
//! the `Class` property of `org.bluez.Device1`. Only the major device class is used for
//! filtering, but the other fields are decoded too.

use core::fmt;

/// The 24-bit Class of Device of a BR/EDR device.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceClass(u32);

impl DeviceClass {
    const MASK: u32 = 0x00ff_ffff;

    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw & Self::MASK)
    }

    #[inline]
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Returns the [`MajorClass`] encoded in bits 8 to 12.
    pub fn major(&self) -> MajorClass {
        MajorClass::from_code(((self.0 >> 8) & 0x1f) as u8)
    }

    /// Returns the 6-bit minor device class (bits 2 to 7).
    ///
    /// Its meaning depends on the [`MajorClass`].
    pub fn minor(&self) -> u8 {
        ((self.0 >> 2) & 0x3f) as u8
    }

    /// Returns the 11-bit major service class field (bits 13 to 23).
    pub fn services(&self) -> u16 {
        ((self.0 >> 13) & 0x7ff) as u16
    }
}

impl From<u32> for DeviceClass {
    #[inline]
    fn from(value: u32) -> Self {
        Self::from_raw(value)
    }
}

impl fmt::Debug for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceClass({:#08x}, {:?})", self.0, self.major())
    }
}

/// Major device class, as assigned by the Bluetooth SIG.
///
/// <https://www.bluetooth.com/specifications/assigned-numbers/>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MajorClass {
    Miscellaneous,
    Computer,
    Phone,
    NetworkAccessPoint,
    AudioVideo,
    /// Mouse, joystick, keyboard, etc.
    Peripheral,
    /// Printer, scanner, camera, display.
    Imaging,
    Wearable,
    Toy,
    Health,
    Uncategorized,
    /// A code not (yet) assigned by the SIG.
    Reserved(u8),
}

impl MajorClass {
    /// Decodes a 5-bit major class code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Miscellaneous,
            0x01 => Self::Computer,
            0x02 => Self::Phone,
            0x03 => Self::NetworkAccessPoint,
            0x04 => Self::AudioVideo,
            0x05 => Self::Peripheral,
            0x06 => Self::Imaging,
            0x07 => Self::Wearable,
            0x08 => Self::Toy,
            0x09 => Self::Health,
            0x1f => Self::Uncategorized,
            other => Self::Reserved(other),
        }
    }

    /// Returns the 5-bit code of this major class.
    pub fn code(&self) -> u8 {
        match self {
            Self::Miscellaneous => 0x00,
            Self::Computer => 0x01,
            Self::Phone => 0x02,
            Self::NetworkAccessPoint => 0x03,
            Self::AudioVideo => 0x04,
            Self::Peripheral => 0x05,
            Self::Imaging => 0x06,
            Self::Wearable => 0x07,
            Self::Toy => 0x08,
            Self::Health => 0x09,
            Self::Uncategorized => 0x1f,
            Self::Reserved(code) => *code,
        }
    }
}
