//! Service providers for the daemon's background services.
//!
//! Each provider wires one adapter (D-Bus, config file watcher, process
//! signals) to the event bus and runs it under the [`TaskManager`].
//!
//! [`TaskManager`]: crate::task_manager::TaskManager

pub mod config_watcher;
pub mod dbus;
pub mod signals;
pub mod traits;

pub use config_watcher::ConfigWatcherServiceProvider;
pub use dbus::DBusServiceProvider;
pub use signals::SignalServiceProvider;
pub use traits::ServiceProvider;
