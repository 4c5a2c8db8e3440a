//! System coordinator: claims the hardware, runs the control loop and
//! dispatches events to the lifecycle handler.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use log::{error, info, warn};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

use crate::{
    app_context::AppState,
    config::{Config, ConfigManager, PowerCutCfg},
    control_loop::{ControlLoop, SharedControl},
    drivers::{argon_one::I2cFanBus, sysfs_gpio::SysfsButton},
    edge::ButtonHandler,
    error::FanError,
    event::{Event, EventBus},
    host::{CommandHostActions, HostEventHandler, SystemCommandRunner},
    lifecycle::Lifecycle,
    power_cut::{PowerCut, ShutdownService},
    providers::{
        ConfigWatcherServiceProvider, DBusServiceProvider, ServiceProvider, SignalServiceProvider,
    },
    sensors::TemperatureSource,
    settings::{Settings, SettingsProvider},
    task_manager::TaskManager,
    temperature_sensors::ThermalZone,
};

type ControlHandle = JoinHandle<std::result::Result<(), FanError>>;

/// Owns the daemon's runtime pieces.
///
/// Startup claims the fan bus and the button, then starts the control loop on
/// a blocking thread and the adapters as tasks. Every event is handed to the
/// [`Lifecycle`] on a blocking thread since its handlers take the control
/// lock. The main loop ends when the control loop ends.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    event_rx: broadcast::Receiver<Event>,
    shared_state: Option<Arc<AppState>>,
    control: Option<ControlHandle>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        let event_bus = EventBus::new();
        // subscribe before any adapter can publish
        let event_rx = event_bus.subscribe();

        Self {
            task_manager: TaskManager::new(),
            event_bus,
            event_rx,
            shared_state: None,
            control: None,
            service_providers: Vec::new(),
        }
    }

    /// Loads the settings, claims the hardware and starts the control loop.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");
        let config_manager = Arc::new(config_manager);
        let config = config_manager.get();

        let settings = Settings::load(config_manager.as_ref()).context("Invalid fan settings")?;

        let bus = I2cFanBus::open(config.hardware.i2c_bus, config.hardware.fan_address)
            .context("Failed to open fan controller bus")?;
        let power_cut = prepare_power_cut(&config)?;
        let button = match claim_button(&config, &self.event_bus) {
            Ok(button) => button,
            Err(e) => {
                if let PowerCut::Service(service) = &power_cut {
                    if let Err(disable_err) = service.disable() {
                        warn!("Failed to disable shutdown service: {disable_err}");
                    }
                }
                return Err(e);
            }
        };

        let shared = SharedControl::new(Arc::new(settings), Box::new(bus), Some(Box::new(button)));
        let lifecycle = Arc::new(Lifecycle::new(
            shared.clone(),
            config_manager.clone() as Arc<dyn SettingsProvider>,
            power_cut,
        ));

        let source = ThermalZone::new(&config.hardware.temperature_path);
        info!("Reading CPU temperature from {}", source.source_name());
        self.control = Some(tokio::task::spawn_blocking(move || {
            ControlLoop::new(shared, source).run()
        }));

        let state = Arc::new(AppState::new(config_manager, lifecycle));
        self.register_service_providers(state.clone()).await;
        self.shared_state = Some(state);

        info!("SystemCoordinator initialization completed");
        Ok(())
    }

    async fn register_service_providers(&mut self, state: Arc<AppState>) {
        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(SignalServiceProvider::new(self.event_bus.clone())),
            Box::new(ConfigWatcherServiceProvider::new(
                state.config_manager().path().to_path_buf(),
                self.event_bus.clone(),
            )),
        ];

        match DBusServiceProvider::new(state, self.event_bus.clone()).await {
            Ok(provider) => providers.push(Box::new(provider)),
            Err(e) => warn!("Failed to connect to the system bus: {e}, skipping D-Bus service"),
        }

        providers.sort_by_key(|b| std::cmp::Reverse(b.priority()));
        self.service_providers = providers;
        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        for provider in &self.service_providers {
            match provider.start(&mut self.task_manager).await {
                Ok(()) => info!(
                    "Service '{}' started (priority: {}, critical: {})",
                    provider.name(),
                    provider.priority(),
                    provider.is_critical()
                ),
                Err(e) if provider.is_critical() => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => warn!(
                    "Non-critical service '{}' failed to start: {e:#}",
                    provider.name()
                ),
            }
        }
        Ok(())
    }

    /// Dispatches events until the control loop has ended, then shuts down.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut control = self
            .control
            .take()
            .ok_or_else(|| anyhow!("System not properly initialized"))?;
        info!("Starting main event loop");

        let outcome = loop {
            tokio::select! {
                joined = &mut control => {
                    break match joined {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(anyhow::Error::new(e).context("Fan control failed")),
                        Err(e) => Err(anyhow!("Control loop panicked: {e}")),
                    };
                }

                event = self.event_rx.recv() => {
                    if let Err(e) = self.handle_event(event).await {
                        break Err(e);
                    }
                }
            }
        };

        if let Err(e) = &outcome {
            error!("{e:#}");
        }
        self.shutdown().await;
        info!("Main event loop terminated");
        outcome
    }

    async fn handle_event(&self, event: std::result::Result<Event, RecvError>) -> Result<()> {
        let lifecycle = self.lifecycle()?;
        match event {
            Ok(Event::Notification {
                sender,
                method,
                data,
            }) => {
                run_blocking(move || lifecycle.on_notification(&sender, &method, &data)).await
            }
            Ok(Event::SettingsChanged) => {
                run_blocking(move || lifecycle.on_settings_changed()).await
            }
            Ok(Event::Abort) => run_blocking(move || lifecycle.abort()).await,
            Err(RecvError::Lagged(n)) => {
                warn!("Event bus lagged by {n} messages");
                Ok(())
            }
            Err(RecvError::Closed) => bail!("Event bus channel closed unexpectedly"),
        }
    }

    fn lifecycle(&self) -> Result<Arc<Lifecycle>> {
        self.shared_state
            .as_ref()
            .map(|state| state.lifecycle.clone())
            .ok_or_else(|| anyhow!("System not properly initialized"))
    }

    /// Stops the services, then makes sure the hardware is released.
    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            error!("Error during task shutdown: {e:#}");
        }

        if let Ok(lifecycle) = self.lifecycle() {
            if let Err(e) = run_blocking(move || lifecycle.stop()).await {
                error!("Final stop failed: {e:#}");
            }
        }

        info!("Shutdown complete");
    }

    /// Undoes a partial startup: stops what was started and waits for the
    /// control loop to finish.
    pub async fn abort_startup(&mut self) {
        self.shutdown().await;
        if let Some(control) = self.control.take() {
            match control.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Control loop ended with error: {e}"),
                Err(e) => error!("Control loop panicked: {e}"),
            }
        }
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}

async fn run_blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Lifecycle handler panicked")
}

fn prepare_power_cut(config: &Config) -> Result<PowerCut> {
    match &config.power_cut {
        PowerCutCfg::Direct => Ok(PowerCut::Direct),
        PowerCutCfg::Service {
            unit_path,
            i2cset_path,
        } => {
            let service = ShutdownService::new(
                unit_path,
                i2cset_path,
                config.hardware.i2c_bus,
                config.hardware.fan_address,
                Arc::new(SystemCommandRunner),
            );
            service
                .enable()
                .context("Failed to enable the shutdown service")?;
            Ok(PowerCut::Service(service))
        }
    }
}

/// Claims the button pin and starts decoding its edges.
///
/// Button actions are announced on `event_bus`, so a shutdown press reaches
/// the lifecycle as a quit notification. The pin is released again when edge
/// detection cannot be started.
fn claim_button(config: &Config, event_bus: &EventBus) -> Result<SysfsButton> {
    let hardware = &config.hardware;
    let mut button = SysfsButton::claim(&hardware.gpio_root, hardware.button_pin)
        .context("Failed to claim the button pin")?;

    let actions = Arc::new(CommandHostActions::new(
        config.host_actions.restart_command.clone(),
        config.host_actions.shutdown_command.clone(),
    ));
    let mut handler = ButtonHandler::new(
        Box::new(button.level_reader()),
        actions,
        Arc::new(event_bus.clone()),
    );

    if let Err(e) = button.watch_edges(move |pin| handler.on_signal_edge(pin)) {
        if let Err(release_err) = crate::drivers::ButtonLine::release(&mut button) {
            warn!("Failed to release button pin: {release_err}");
        }
        return Err(e).context("Failed to watch the button pin");
    }
    Ok(button)
}
