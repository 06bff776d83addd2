//! Snapshots of bonded devices.

use core::fmt;
use std::{cmp::Ordering, collections::HashMap, hash::Hash};

use zbus::zvariant::{OwnedValue, Value};

use crate::{
    address::{Address, AddressType},
    class::{DeviceClass, MajorClass},
    Error, Result,
};

/// A read-only snapshot of one bonded device, as reported by the Bluetooth stack.
///
/// A device is identified by its [`Address`]: two records with the same address compare equal,
/// even if they were taken at different times and their other properties differ. This makes a
/// set of records collapse duplicates by identity.
#[derive(Clone)]
pub struct DeviceRecord {
    address: Address,
    address_type: Option<AddressType>,
    name: Option<String>,
    class: Option<DeviceClass>,
    connected: bool,
}

impl DeviceRecord {
    /// Creates a record for the device with the given [`Address`] and no other known properties.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            address_type: None,
            name: None,
            class: None,
            connected: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_class(mut self, class: DeviceClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn with_connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    /// Returns the hardware [`Address`] of the device.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Returns the type of the device's [`Address`], if BlueZ reported one.
    pub fn address_type(&self) -> Option<AddressType> {
        self.address_type
    }

    /// Returns the user-friendly name of the device.
    ///
    /// This is the alias if one is set, and the remote name otherwise.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the Class of Device.
    ///
    /// Bluetooth LE devices usually don't have one.
    pub fn class(&self) -> Option<DeviceClass> {
        self.class
    }

    /// Returns the [`MajorClass`] of the device, if it has a [`DeviceClass`].
    pub fn major_class(&self) -> Option<MajorClass> {
        self.class.map(|class| class.major())
    }

    /// Returns whether the device was connected when the snapshot was taken.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Builds a record from the properties of an `org.bluez.Device1` object.
    ///
    /// Returns `Ok(None)` if the device is not bonded. Devices that are bonded but lack a valid
    /// `Address` are reported as an error, since BlueZ always provides one.
    pub(crate) fn from_bonded_properties(
        props: &HashMap<String, OwnedValue>,
    ) -> Result<Option<Self>> {
        let get = |name: &str| props.get(name).map(|v| unwrap_variant(v));

        // `Bonded` was only added in BlueZ 5.62. Older versions only know `Paired`.
        let bonded = match get("Bonded").and_then(as_bool) {
            Some(bonded) => bonded,
            None => get("Paired").and_then(as_bool).unwrap_or(false),
        };
        if !bonded {
            return Ok(None);
        }

        let address = get("Address")
            .and_then(as_str)
            .ok_or_else(|| Error::from("bonded device without `Address` property"))?;
        let address = address.parse::<Address>().map_err(Error::from)?;

        let address_type = match get("AddressType").and_then(as_str) {
            Some(s) => Some(AddressType::from_str(s)?),
            None => None,
        };
        let name = get("Alias")
            .and_then(as_str)
            .or_else(|| get("Name").and_then(as_str))
            .map(str::to_string);
        let class = get("Class").and_then(as_u32).map(DeviceClass::from_raw);
        let connected = get("Connected").and_then(as_bool).unwrap_or(false);

        Ok(Some(Self {
            address,
            address_type,
            name,
            class,
            connected,
        }))
    }
}

fn unwrap_variant<'a>(mut value: &'a Value<'a>) -> &'a Value<'a> {
    while let Value::Value(inner) = value {
        value = &**inner;
    }
    value
}

fn as_bool(value: &Value<'_>) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

fn as_u32(value: &Value<'_>) -> Option<u32> {
    match value {
        Value::U32(n) => Some(*n),
        _ => None,
    }
}

fn as_str<'a>(value: &'a Value<'a>) -> Option<&'a str> {
    match value {
        Value::Str(s) => Some(s.as_str()),
        _ => None,
    }
}

impl PartialEq for DeviceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for DeviceRecord {}

impl Hash for DeviceRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl PartialOrd for DeviceRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeviceRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address.cmp(&other.address)
    }
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("address", &format_args!("{}", self.address))
            .field("name", &self.name)
            .field("class", &self.class)
            .field("connected", &self.connected)
            .finish()
    }
}
