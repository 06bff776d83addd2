//! Watch bonded Bluetooth devices of a given category.
//!
//! [`DiscoveryService`] reports the bonded devices matching a [`DeviceCategory`] whenever the
//! Bluetooth stack signals that something may have changed. [`BluezSource`] connects it to BlueZ.

mod adapter;
pub mod address;
pub mod category;
pub mod class;
pub mod device;
mod discovery;
mod error;
pub mod event;

pub use adapter::{Adapter, EventStream};
pub use category::DeviceCategory;
pub use discovery::{
    BluezSource, DeviceListener, Dispatcher, DiscoveryService, EventHandler, EventSource,
};
pub use error::{Error, ErrorClass, Result};

use zbus::{fdo::ObjectManagerProxy, Connection};

/// A cloneable handle to a D-Bus connection.
///
/// This type is used to construct various objects in this library.
#[derive(Clone)]
pub struct Session {
    conn: Connection,
}

impl Session {
    /// Creates a new connection to the system bus.
    pub async fn new() -> Result<Self> {
        Ok(Self {
            conn: Connection::system().await.map_err(Error::from)?,
        })
    }

    /// Connects to the BlueZ D-Bus object manager.
    async fn object_manager(&self) -> Result<ObjectManagerProxy<'static>> {
        ObjectManagerProxy::builder(&self.conn)
            .destination("org.bluez")
            .map_err(Error::from)?
            .path("/")
            .map_err(Error::from)?
            .build()
            .await
            .map_err(Error::from)
    }
}
