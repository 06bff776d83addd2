use std::{pin::pin, sync::Arc};

use futures_util::{stream::select, StreamExt};
use zbus::{
    dbus_proxy,
    fdo::{InterfacesAdded, PropertiesChanged},
    MatchRule, Message, MessageStream, MessageType, SignalStream,
};

use crate::{
    address::{Address, AddressType},
    device::DeviceRecord,
    event::{self, Event, EventFilter},
    Error, Result, Session,
};

#[dbus_proxy(
    interface = "org.bluez.Adapter1",
    default_service = "org.bluez",
    assume_defaults = false
)]
trait Adapter {
    #[dbus_proxy(property)]
    fn address(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn address_type(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn powered(&self) -> zbus::Result<bool>;
}

/// A BlueZ Bluetooth adapter.
#[derive(Clone)]
pub struct Adapter {
    session: Session,
    name: String,
    proxy: AdapterProxy<'static>,
}

impl Adapter {
    const PATH_PREFIX: &str = "/org/bluez/";

    /// Opens the system's default Bluetooth adapter.
    ///
    /// This is the adapter whose device name sorts first (usually `hci0`).
    pub async fn open(session: &Session) -> Result<Self> {
        let mut adapters = Self::enumerate(session).await?.collect::<Vec<_>>();
        adapters.sort_by(|a, b| a.name.cmp(&b.name));

        match adapters.into_iter().next() {
            Some(a) => Ok(a),
            None => Err(Error::from("no adapter found")),
        }
    }

    /// Opens the adapter with the given device name (eg. `hci1`).
    pub async fn open_named(session: &Session, name: &str) -> Result<Self> {
        Self::enumerate(session)
            .await?
            .find(|a| a.name == name)
            .ok_or_else(|| Error::from(format!("no adapter named '{}' found", name)))
    }

    /// Returns an iterator yielding all Bluetooth adapters on the system.
    pub async fn enumerate(session: &Session) -> Result<impl Iterator<Item = Self>> {
        log::debug!(
            "enumerating BlueZ adapters on connection {}",
            session.conn.server_guid()
        );

        let manager = session.object_manager().await?;
        let objects = manager.get_managed_objects().await.map_err(Error::from)?;
        let mut hci_names = Vec::new();
        for (obj_path, intfs) in &objects {
            if intfs.contains_key(event::ADAPTER_INTERFACE) {
                if let Some(name) = obj_path.strip_prefix(Self::PATH_PREFIX) {
                    log::debug!("found BlueZ adapter at path {}", obj_path);
                    hci_names.push(name.to_string());
                } else {
                    log::warn!("skipping adapter with unexpected path {}", obj_path);
                }
            }
        }

        let mut adapters = Vec::new();
        for name in hci_names {
            let path = format!("{}{}", Self::PATH_PREFIX, name);
            match AdapterProxy::new(&session.conn, path).await {
                Ok(proxy) => adapters.push(Adapter {
                    proxy,
                    name,
                    session: session.clone(),
                }),
                Err(e) => log::error!("failed to open adapter {}: {}", name, e),
            }
        }

        Ok(adapters.into_iter())
    }

    /// Returns the adapter's device name (eg. `hci0`).
    pub fn device_name(&self) -> &str {
        &self.name
    }

    /// Returns the Bluetooth device [`Address`] of this [`Adapter`].
    pub async fn address(&self) -> Result<Address> {
        let string = self.proxy.address().await.map_err(Error::from)?;
        string.parse().map_err(Error::from)
    }

    /// Returns the type of device [`Address`] used by this [`Adapter`].
    pub async fn address_type(&self) -> Result<AddressType> {
        let string = self.proxy.address_type().await.map_err(Error::from)?;
        AddressType::from_str(&string)
    }

    /// Returns whether the adapter is powered on.
    pub async fn is_powered(&self) -> Result<bool> {
        self.proxy.powered().await.map_err(Error::from)
    }

    /// Returns a snapshot of all devices bonded with this [`Adapter`].
    ///
    /// Bonded devices are known to BlueZ without a scan, so this works whether or not the
    /// devices are currently in range.
    ///
    /// # Errors
    ///
    /// Fails if BlueZ cannot be queried, or if it reports a bonded device without a valid address.
    pub async fn bonded_devices(&self) -> Result<Vec<DeviceRecord>> {
        let prefix = format!("{}/", self.proxy.path().as_str());
        let manager = self.session.object_manager().await?;
        let objects = manager.get_managed_objects().await.map_err(Error::from)?;

        let mut devices = Vec::new();
        for (path, intfs) in &objects {
            if !path.starts_with(prefix.as_str()) {
                continue;
            }
            let Some(props) = intfs.get(event::DEVICE_INTERFACE) else { continue };
            if let Some(record) = DeviceRecord::from_bonded_properties(props)? {
                devices.push(record);
            }
        }

        log::debug!(
            "{}: {} bonded device(s) out of {} objects",
            self.name,
            devices.len(),
            objects.len()
        );
        Ok(devices)
    }

    /// Subscribes to the Bluetooth notifications selected by `filter`.
    ///
    /// The subscription is established before this method returns. Notifications that arrive
    /// before [`EventStream::next`] is first called are buffered by the D-Bus connection.
    pub async fn event_stream(&self, filter: EventFilter) -> Result<EventStream> {
        let manager = self.session.object_manager().await?;
        let objects = manager.receive_all_signals().await.map_err(Error::from)?;

        let rule = properties_changed_rule(self.proxy.path().as_str())?;
        let properties = MessageStream::for_match_rule(rule, &self.session.conn, None)
            .await
            .map_err(Error::from)?;

        log::debug!("{}: subscribed to {:?}", self.name, filter);
        Ok(EventStream {
            adapter_path: self.proxy.path().as_str().to_string(),
            filter,
            objects,
            properties,
        })
    }
}

/// Matches the `PropertiesChanged` signals BlueZ emits for the adapter at `adapter_path` and
/// every object below it.
fn properties_changed_rule(adapter_path: &str) -> Result<MatchRule<'_>> {
    Ok(MatchRule::builder()
        .msg_type(MessageType::Signal)
        .sender("org.bluez")
        .map_err(Error::from)?
        .interface("org.freedesktop.DBus.Properties")
        .map_err(Error::from)?
        .member("PropertiesChanged")
        .map_err(Error::from)?
        .path_namespace(adapter_path)
        .map_err(Error::from)?
        .build())
}

/// A stream of [`Event`]s reported by an [`Adapter`].
///
/// Returned by [`Adapter::event_stream`]. Dropping the stream removes the subscription.
pub struct EventStream {
    adapter_path: String,
    filter: EventFilter,
    objects: SignalStream<'static>,
    properties: MessageStream,
}

impl EventStream {
    /// Asynchronously waits for the next [`Event`] selected by this stream's [`EventFilter`].
    ///
    /// Signals from the object manager and property changes arrive on separate D-Bus streams,
    /// so their relative order is not preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying D-Bus streams end. The caller should treat this as a
    /// permanent condition and resubscribe.
    pub async fn next(&mut self) -> Result<Event> {
        loop {
            let message = {
                let mut stream = pin!(select(
                    self.objects.by_ref().map(Ok),
                    self.properties.by_ref(),
                ));
                stream.next().await
            };

            match message {
                Some(Ok(message)) => {
                    if let Some(event) = self.classify(message) {
                        if self.filter.contains(event.kind()) {
                            return Ok(event);
                        } else {
                            log::trace!("filtered out {:?}", event);
                        }
                    }
                }
                Some(Err(e)) => log::warn!("skipping malformed D-Bus message: {}", e),
                None => return Err(Error::from("event stream ended (BlueZ gone?)")),
            }
        }
    }

    fn classify(&self, message: Arc<Message>) -> Option<Event> {
        if let Some(added) = InterfacesAdded::from_message(message.clone()) {
            let args = match added.args() {
                Ok(args) => args,
                Err(e) => {
                    log::warn!("skipping malformed InterfacesAdded signal: {}", e);
                    return None;
                }
            };
            return event::classify_interfaces_added(
                &self.adapter_path,
                args.object_path.as_str(),
                args.interfaces_and_properties.keys().map(|name| &**name),
            );
        }

        let path = message.path()?.as_str().to_string();
        let changed = PropertiesChanged::from_message(message)?;
        let args = match changed.args() {
            Ok(args) => args,
            Err(e) => {
                log::warn!("skipping malformed PropertiesChanged signal: {}", e);
                return None;
            }
        };
        log::trace!(
            "{}: {} changed {:?}",
            path,
            args.interface_name.as_str(),
            args.changed_properties.keys()
        );
        event::classify_properties_changed(
            &self.adapter_path,
            &path,
            args.interface_name.as_str(),
            args.changed_properties.iter().map(|(name, value)| (*name, value)),
        )
    }
}
