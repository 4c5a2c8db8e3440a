use std::sync::Arc;

use log::{debug, error};
use zbus::interface;

use crate::{
    event::{Event, EventBus},
    lifecycle::Lifecycle,
};

pub const BUS_NAME: &str = "io.github.argonone_fand";
pub const OBJECT_PATH: &str = "/io/github/argonone_fand";

/// D-Bus face of the daemon.
///
/// Method calls are forwarded to the coordinator through the event bus;
/// properties read the controller state directly.
pub struct DBusInterface {
    lifecycle: Arc<Lifecycle>,
    event_bus: EventBus,
    version: String,
}

impl DBusInterface {
    pub fn new(lifecycle: Arc<Lifecycle>, version: String, event_bus: EventBus) -> Self {
        Self {
            lifecycle,
            event_bus,
            version,
        }
    }

    fn forward(&self, event: Event) -> zbus::fdo::Result<()> {
        debug!("D-Bus request: {event:?}");
        self.event_bus.publish(event).map_err(|e| {
            error!("Failed to forward D-Bus request: {e}");
            zbus::fdo::Error::Failed(e.to_string())
        })
    }
}

#[interface(name = "io.github.argonone_fand1")]
impl DBusInterface {
    /// Host lifecycle notification, e.g. `System.OnQuit`.
    async fn notify(&self, sender: String, method: String, data: String) -> zbus::fdo::Result<()> {
        self.forward(Event::Notification {
            sender,
            method,
            data,
        })
    }

    async fn settings_changed(&self) -> zbus::fdo::Result<()> {
        self.forward(Event::SettingsChanged)
    }

    #[zbus(property)]
    async fn version(&self) -> String {
        self.version.clone()
    }

    /// Last power written to the fan, -1 before the first write.
    #[zbus(property)]
    async fn fan_power(&self) -> i16 {
        self.lifecycle.fan_power().map_or(-1, i16::from)
    }

    #[zbus(property)]
    async fn stopping(&self) -> bool {
        self.lifecycle.is_stopping()
    }
}
