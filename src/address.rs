//! Bluetooth device addresses.
//!
//! The address is what identifies a bonded device. BlueZ also encodes it in the object path of
//! every device (`/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF`).

use core::fmt;
use std::{fmt::Write, num::ParseIntError, str::FromStr};

/// Describes the meaning of the bytes in an [`Address`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AddressType {
    /// Address follows the MAC address standard.
    ///
    /// The first 3 Bytes identify the vendor, the last 3 Bytes identify the device.
    Public,
    /// Address is randomly generated (LE only).
    Random,
}

impl AddressType {
    pub(crate) fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "public" => Ok(Self::Public),
            "random" => Ok(Self::Random),
            _ => Err(crate::Error::from(format!("invalid address type '{}'", s))),
        }
    }
}

/// A 6-Byte Bluetooth device address.
///
/// Addresses are ordered by their bytes, which gives sets of devices a stable iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 6]);

impl Address {
    const PATH_MARKER: &str = "dev_";

    #[inline]
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Extracts the [`Address`] from the object path of a BlueZ device.
    ///
    /// Returns [`None`] if the path does not end in a `dev_XX_XX_XX_XX_XX_XX` component.
    pub fn from_device_path(path: &str) -> Option<Self> {
        let last = path.rsplit('/').next()?;
        let hex = last.strip_prefix(Self::PATH_MARKER)?;
        parse_separated(hex, '_').ok()
    }
}

impl From<[u8; 6]> for Address {
    #[inline]
    fn from(value: [u8; 6]) -> Self {
        Self(value)
    }
}

impl From<Address> for [u8; 6] {
    #[inline]
    fn from(value: Address) -> Self {
        value.0
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_char(':')?;
            }

            write!(f, "{:02X}", byte)?;
        }

        Ok(())
    }
}

/// Parses a Bluetooth [`Address`] from a colon-separated hex string.
///
/// Example: `aa:ff:00:33:22:11`
impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_separated(s, ':')
    }
}

fn parse_separated(s: &str, sep: char) -> Result<Address, ParseAddressError> {
    let mut bytes = [0; 6];
    for (i, s) in s.splitn(6, sep).enumerate() {
        if s.len() != 2 {
            return Err(ParseAddressError::other());
        }
        bytes[i] = u8::from_str_radix(s, 16).map_err(ParseAddressError::parse_int)?;
        if i == bytes.len() - 1 {
            return Ok(Address(bytes));
        }
    }

    Err(ParseAddressError::other())
}

/// The error type returned by the [`FromStr`] implementation of [`Address`].
#[derive(Debug)]
pub struct ParseAddressError(ParseAddressErrorKind);

impl fmt::Display for ParseAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ParseAddressErrorKind::ParseInt(e) => e.fmt(f),
            ParseAddressErrorKind::Other => f.write_str("invalid device address"),
        }
    }
}

impl std::error::Error for ParseAddressError {}

#[derive(Debug)]
enum ParseAddressErrorKind {
    ParseInt(ParseIntError),
    Other,
}

impl ParseAddressError {
    fn parse_int(e: ParseIntError) -> Self {
        Self(ParseAddressErrorKind::ParseInt(e))
    }

    fn other() -> Self {
        Self(ParseAddressErrorKind::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let s = "AA:BB:CC:11:22:33";
        let addr = Address::from_str(s).unwrap();
        assert_eq!(addr.to_string(), s);
    }

    #[test]
    fn invalid() {
        Address::from_str("").unwrap_err();
        Address::from_str("aa:bb:cc:11:22:3").unwrap_err();
        Address::from_str("aa:bb:cc:11:22:333").unwrap_err();
        Address::from_str("aa:bb:cc:11:22:33:").unwrap_err();
        Address::from_str("aa:bb:cc:11:22:33:44").unwrap_err();
        Address::from_str("aa:bb:cc:11:22:33 ").unwrap_err();
        Address::from_str("za:bb:cc:11:22:33").unwrap_err();
        Address::from_str("aa_bb_cc_11_22_33").unwrap_err();
    }

    #[test]
    fn device_path() {
        let addr = Address::from_device_path("/org/bluez/hci0/dev_AA_BB_CC_11_22_33").unwrap();
        assert_eq!(addr, Address::from_bytes([0xaa, 0xbb, 0xcc, 0x11, 0x22, 0x33]));

        assert_eq!(Address::from_device_path("/org/bluez/hci0"), None);
        assert_eq!(Address::from_device_path("/org/bluez/hci0/dev_AA_BB"), None);
        assert_eq!(
            Address::from_device_path("/org/bluez/hci0/dev_AA_BB_CC_11_22_33/service0010"),
            None
        );
    }

    #[test]
    fn ordering() {
        let a = Address::from_bytes([0, 0, 0, 0, 0, 1]);
        let b = Address::from_bytes([0, 0, 0, 0, 1, 0]);
        assert!(a < b);
    }
}
