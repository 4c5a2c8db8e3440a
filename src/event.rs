//! Event-driven communication between the adapters and the coordinator.

use anyhow::Result;
use log::warn;
use tokio::sync::broadcast;

use crate::host::HostEventHandler;

/// Application events.
///
/// Adapters (D-Bus, signals, config watcher) publish them; the coordinator
/// turns them into calls on the lifecycle handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Host notification such as `System.OnQuit`.
    Notification {
        sender: String,
        method: String,
        data: String,
    },
    /// The settings store changed and must be reloaded.
    SettingsChanged,
    /// Stop without powering off, e.g. on SIGTERM.
    Abort,
}

/// Event bus for publish-subscribe messaging between services.
///
/// # Example
///
/// ```no_run
/// use argonone_fand::event::{Event, EventBus};
///
/// let event_bus = EventBus::new();
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus.publish(Event::SettingsChanged)?;
///
/// // In async context, receive events:
/// // let event = subscriber.recv().await;
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(32)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each subscriber receives all events published after subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

/// Forwards calls as events, so callers on foreign threads never block on
/// the lifecycle.
impl HostEventHandler for EventBus {
    fn on_notification(&self, sender: &str, method: &str, data: &str) {
        let event = Event::Notification {
            sender: sender.to_owned(),
            method: method.to_owned(),
            data: data.to_owned(),
        };
        if let Err(e) = self.publish(event) {
            warn!("Dropped notification {method} from {sender}: {e}");
        }
    }

    fn on_settings_changed(&self) {
        if let Err(e) = self.publish(Event::SettingsChanged) {
            warn!("Dropped settings change: {e}");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
