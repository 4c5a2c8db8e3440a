//! D-Bus service provider.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::info;
use tokio_util::sync::CancellationToken;
use zbus::Connection;

use crate::{
    app_context::AppState,
    event::EventBus,
    interface::{BUS_NAME, DBusInterface, OBJECT_PATH},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Exposes the daemon on the system bus.
///
/// Host integrations deliver their lifecycle notifications through the
/// `Notify` method. Non-critical: the fan keeps working without D-Bus.
///
/// - **Service Name**: `io.github.argonone_fand`
/// - **Object Path**: `/io/github/argonone_fand`
pub struct DBusServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    connection: Connection,
}

impl DBusServiceProvider {
    /// Creates a new D-Bus service provider with a system bus connection.
    pub async fn new(state: Arc<AppState>, event_bus: EventBus) -> Result<Self> {
        let connection = Connection::system().await?;
        Ok(Self {
            state,
            event_bus,
            connection,
        })
    }
}

#[async_trait]
impl ServiceProvider for DBusServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let interface = DBusInterface::new(
            self.state.lifecycle.clone(),
            env!("CARGO_PKG_VERSION").to_string(),
            self.event_bus.clone(),
        );
        self.connection
            .object_server()
            .at(OBJECT_PATH, interface)
            .await?;
        self.connection.request_name(BUS_NAME).await?;
        info!("Serving {BUS_NAME} at {OBJECT_PATH}");

        let connection = self.connection.clone();
        task_manager.spawn_task(self.name(), |cancel_token| async move {
            run_dbus_service(connection, cancel_token).await
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DBusService"
    }

    fn priority(&self) -> i32 {
        8
    }
}

/// Keeps the connection alive until cancellation, then releases the name.
async fn run_dbus_service(connection: Connection, cancel_token: CancellationToken) -> Result<()> {
    cancel_token.cancelled().await;
    info!("D-Bus service cancelled");

    connection.release_name(BUS_NAME).await?;
    connection
        .object_server()
        .remove::<DBusInterface, _>(OBJECT_PATH)
        .await?;
    Ok(())
}
