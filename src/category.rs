//! Application-level device categories.

use core::fmt;
use std::str::FromStr;

use crate::{class::MajorClass, Error};

/// The kind of bonded device an application is looking for.
///
/// Every category is satisfied by one or more [`MajorClass`]es, see
/// [`DeviceCategory::major_classes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCategory {
    Printer,
    Computer,
    AudioVideo,
}

impl DeviceCategory {
    /// All categories, in declaration order.
    pub const ALL: [Self; 3] = [Self::Printer, Self::Computer, Self::AudioVideo];

    /// Returns the [`MajorClass`]es that satisfy this category.
    ///
    /// Printers advertise themselves either as imaging devices or as generic peripherals, so both
    /// are accepted.
    pub fn major_classes(&self) -> &'static [MajorClass] {
        match self {
            Self::Printer => &[MajorClass::Imaging, MajorClass::Peripheral],
            Self::Computer => &[MajorClass::Computer],
            Self::AudioVideo => &[MajorClass::AudioVideo],
        }
    }

    /// Returns whether a device of the given [`MajorClass`] belongs to this category.
    pub fn matches(&self, class: MajorClass) -> bool {
        self.major_classes().contains(&class)
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Printer => "printer",
            Self::Computer => "computer",
            Self::AudioVideo => "audio-video",
        })
    }
}

/// Parses a category name, ignoring ASCII case.
///
/// Accepted: `printer`, `computer`, `audio-video` (also `audio_video` and `av`).
impl FromStr for DeviceCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "printer" => Ok(Self::Printer),
            "computer" => Ok(Self::Computer),
            "audio-video" | "audio_video" | "av" => Ok(Self::AudioVideo),
            _ => Err(Error::from(format!("unknown device category '{}'", s))),
        }
    }
}
