use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use signal_hook::{
    consts::signal::{SIGHUP, SIGINT, SIGTERM},
    iterator::Signals,
};
use tokio_util::sync::CancellationToken;

use crate::{
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Translates process signals into application events.
///
/// `SIGHUP` reloads the settings, `SIGTERM` and `SIGINT` stop the daemon
/// without powering the host off. Critical: without it the daemon could not
/// be stopped cleanly.
pub struct SignalServiceProvider {
    event_bus: EventBus,
}

impl SignalServiceProvider {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

#[async_trait]
impl ServiceProvider for SignalServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let signals =
            Signals::new([SIGHUP, SIGTERM, SIGINT]).context("Failed to register signal handlers")?;
        let event_bus = self.event_bus.clone();

        task_manager.spawn_task(self.name(), |cancel_token| async move {
            run_signal_service(signals, event_bus, cancel_token).await
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SignalService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}

/// Event published for a received signal.
pub fn event_for_signal(signal: i32) -> Option<Event> {
    match signal {
        SIGHUP => Some(Event::SettingsChanged),
        SIGTERM | SIGINT => Some(Event::Abort),
        _ => None,
    }
}

async fn run_signal_service(
    mut signals: Signals,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let handle = signals.handle();

    let forwarder = tokio::task::spawn_blocking(move || {
        for signal in signals.forever() {
            let Some(event) = event_for_signal(signal) else {
                continue;
            };
            info!("Received signal {signal}, publishing {event:?}");
            if let Err(e) = event_bus.publish(event) {
                warn!("Failed to publish signal event: {e}");
            }
        }
    });

    cancel_token.cancelled().await;
    handle.close();
    forwarder.await.context("Signal forwarder panicked")?;
    info!("Signal service stopped");
    Ok(())
}
