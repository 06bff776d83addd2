//! Hardware notifications that trigger a re-scan of the bonded devices.

use zbus::zvariant::Value;

use crate::address::Address;

bitflags::bitflags! {
    /// A set of [`Event`] kinds a subscriber is interested in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventFilter: u8 {
        /// A device object appeared on the adapter ([`Event::DeviceFound`]).
        const DEVICE_FOUND = 1 << 0;
        /// A device connected ([`Event::Connected`]).
        const CONNECTED = 1 << 1;
        /// A device disconnected ([`Event::Disconnected`]).
        const DISCONNECTED = 1 << 2;
        /// The adapter was powered on or off ([`Event::AdapterStateChanged`]).
        const ADAPTER_STATE = 1 << 3;
    }
}

/// A notification from the Bluetooth stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    DeviceFound(Address),
    Connected(Address),
    Disconnected(Address),
    AdapterStateChanged { powered: bool },
}

impl Event {
    /// Returns the [`EventFilter`] flag that selects this event.
    pub fn kind(&self) -> EventFilter {
        match self {
            Self::DeviceFound(_) => EventFilter::DEVICE_FOUND,
            Self::Connected(_) => EventFilter::CONNECTED,
            Self::Disconnected(_) => EventFilter::DISCONNECTED,
            Self::AdapterStateChanged { .. } => EventFilter::ADAPTER_STATE,
        }
    }
}

pub(crate) const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
pub(crate) const DEVICE_INTERFACE: &str = "org.bluez.Device1";

/// Returns the [`Address`] of the device at `object_path`, if that path names a device object
/// directly below the adapter at `adapter_path`.
fn device_below(adapter_path: &str, object_path: &str) -> Option<Address> {
    let rest = object_path.strip_prefix(adapter_path)?.strip_prefix('/')?;
    if rest.contains('/') {
        return None;
    }
    Address::from_device_path(object_path)
}

/// Classifies an `InterfacesAdded` signal.
pub(crate) fn classify_interfaces_added<'a>(
    adapter_path: &str,
    object_path: &str,
    mut interfaces: impl Iterator<Item = &'a str>,
) -> Option<Event> {
    if !interfaces.any(|intf| intf == DEVICE_INTERFACE) {
        return None;
    }
    device_below(adapter_path, object_path).map(Event::DeviceFound)
}

/// Classifies a `PropertiesChanged` signal.
///
/// A single signal can carry several changed properties, but at most one of them is relevant for
/// any given object, so this yields at most one [`Event`].
pub(crate) fn classify_properties_changed<'a, 'v: 'a>(
    adapter_path: &str,
    object_path: &str,
    interface: &str,
    mut changed: impl Iterator<Item = (&'a str, &'a Value<'v>)>,
) -> Option<Event> {
    let (watched, make): (&str, Box<dyn Fn(bool) -> Event>) = match interface {
        ADAPTER_INTERFACE if object_path == adapter_path => (
            "Powered",
            Box::new(|powered: bool| Event::AdapterStateChanged { powered }),
        ),
        DEVICE_INTERFACE => {
            let address = device_below(adapter_path, object_path)?;
            (
                "Connected",
                Box::new(move |connected: bool| {
                    if connected {
                        Event::Connected(address)
                    } else {
                        Event::Disconnected(address)
                    }
                }),
            )
        }
        _ => return None,
    };

    changed.find_map(|(name, value)| match value {
        Value::Bool(b) if name == watched => Some(make(*b)),
        _ => None,
    })
}
