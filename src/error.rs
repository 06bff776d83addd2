use std::fmt;

use crate::{address::ParseAddressError, category::DeviceCategory};

/// A result type hardwired to use [`Error`] as its error type.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type used throughout this library.
///
/// Use [`Error::class`] to find out what went wrong.
#[derive(Debug)]
pub struct Error {
    inner: ErrorKind,
}

impl Error {
    pub(crate) fn from(e: impl Into<ErrorKind>) -> Self {
        Self { inner: e.into() }
    }

    pub(crate) fn invalid_listener() -> Self {
        Self::from(ErrorKind::InvalidListener)
    }

    pub(crate) fn discovery(cause: Error) -> Self {
        // Don't wrap twice if the cause already is a discovery failure.
        if matches!(cause.inner, ErrorKind::Discovery(_)) {
            return cause;
        }
        Self::from(ErrorKind::Discovery(Box::new(cause)))
    }

    pub(crate) fn unmapped_category(category: DeviceCategory) -> Self {
        Self::from(ErrorKind::UnmappedCategory(category))
    }

    /// Returns the [`ErrorClass`] of this error.
    pub fn class(&self) -> ErrorClass {
        match &self.inner {
            ErrorKind::Zbus(_) | ErrorKind::Fdo(_) => ErrorClass::Bus,
            ErrorKind::ParseAddressError(_) => ErrorClass::Parse,
            ErrorKind::InvalidListener => ErrorClass::InvalidListener,
            ErrorKind::Discovery(_) => ErrorClass::DiscoveryFailure,
            ErrorKind::UnmappedCategory(_) => ErrorClass::UnmappedCategory,
            ErrorKind::Other(_) => ErrorClass::Other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorKind::Zbus(e) => e.fmt(f),
            ErrorKind::Fdo(e) => e.fmt(f),
            ErrorKind::ParseAddressError(e) => e.fmt(f),
            ErrorKind::InvalidListener => f.write_str("no device listener given"),
            ErrorKind::Discovery(e) => write!(f, "device discovery failed: {}", e),
            ErrorKind::UnmappedCategory(c) => {
                write!(f, "device category '{}' has no major classes", c)
            }
            ErrorKind::Other(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.inner {
            ErrorKind::Zbus(e) => Some(e),
            ErrorKind::Fdo(e) => Some(e),
            ErrorKind::ParseAddressError(e) => Some(e),
            ErrorKind::Discovery(e) => Some(&**e),
            _ => None,
        }
    }
}

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorClass {
    /// [`DiscoveryService::start`] was called without a listener.
    ///
    /// [`DiscoveryService::start`]: crate::DiscoveryService::start
    InvalidListener,
    /// Querying or filtering the bonded devices failed. The cause is available via
    /// [`std::error::Error::source`].
    DiscoveryFailure,
    /// A [`DeviceCategory`] maps to no major device classes.
    UnmappedCategory,
    /// D-Bus communication failed.
    Bus,
    /// A value reported by BlueZ could not be parsed.
    Parse,
    Other,
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Zbus(zbus::Error),
    Fdo(zbus::fdo::Error),
    ParseAddressError(ParseAddressError),
    InvalidListener,
    Discovery(Box<Error>),
    UnmappedCategory(DeviceCategory),
    Other(String),
}

impl From<zbus::Error> for ErrorKind {
    fn from(value: zbus::Error) -> Self {
        Self::Zbus(value)
    }
}

impl From<zbus::fdo::Error> for ErrorKind {
    fn from(value: zbus::fdo::Error) -> Self {
        Self::Fdo(value)
    }
}

impl From<ParseAddressError> for ErrorKind {
    fn from(value: ParseAddressError) -> Self {
        Self::ParseAddressError(value)
    }
}

impl From<String> for ErrorKind {
    fn from(value: String) -> Self {
        Self::Other(value)
    }
}

impl From<&str> for ErrorKind {
    fn from(value: &str) -> Self {
        Self::Other(value.to_string())
    }
}
