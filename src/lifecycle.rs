//! Host lifecycle handling and the stop sequence.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::{
    control_loop::{ControlState, SharedControl},
    drivers::argon_one::protocol::Command,
    host::{HostEventHandler, ON_QUIT, ON_RESTART},
    power_cut::PowerCut,
    settings::{Settings, SettingsProvider},
};

/// Reacts to host notifications and owns the one-time stop transition.
pub struct Lifecycle {
    shared: Arc<SharedControl>,
    settings: Arc<dyn SettingsProvider>,
    power_cut: PowerCut,
}

impl Lifecycle {
    pub fn new(
        shared: Arc<SharedControl>,
        settings: Arc<dyn SettingsProvider>,
        power_cut: PowerCut,
    ) -> Self {
        Self {
            shared,
            settings,
            power_cut,
        }
    }

    /// Stops the controller. Only the first call does any work.
    ///
    /// Every step is attempted even when an earlier one fails; failures are
    /// logged. Afterwards the state is stopping and all waiters are woken.
    pub fn stop(&self) {
        let Some(mut state) = self.shared.begin_stop() else {
            debug!("stop already in progress or done");
            return;
        };
        info!(
            "stopping (quitting: {}, restarting: {})",
            state.quitting, state.restarting
        );

        if let Some(mut button) = state.button.take() {
            debug!("disabling button edge detection");
            if let Err(e) = button.disable_edge_detection() {
                warn!("failed to disable edge detection: {e}");
            }
            if let Err(e) = button.release() {
                warn!("failed to release button pin: {e}");
            }
        }

        debug!("switching fan off");
        match state.bus.send(Command::FanOff) {
            Ok(()) => self.shared.record_fan_power(0),
            Err(e) => warn!("failed to switch fan off: {e}"),
        }

        let powering_off = state.quitting && !state.restarting;
        if powering_off && self.power_cut.is_direct() {
            info!("arming power cut");
            if let Err(e) = state.bus.send(Command::ArmPowerCut) {
                error!("failed to arm power cut: {e}");
            }
        }

        if let Err(e) = state.bus.close() {
            warn!("failed to close fan bus: {e}");
        }

        if let PowerCut::Service(service) = &self.power_cut {
            if !powering_off {
                debug!("disabling shutdown service");
                if let Err(e) = service.disable() {
                    warn!("failed to disable shutdown service: {e}");
                }
            }
        }
    }

    /// Stops after a fatal error elsewhere.
    pub fn abort(&self) {
        warn!("aborting");
        self.stop();
    }

    fn mark_and_stop(&self, mark: impl FnOnce(&mut ControlState)) {
        mark(&mut *self.shared.lock());
        self.stop();
    }

    pub fn fan_power(&self) -> Option<u8> {
        self.shared.fan_power()
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.is_stopping()
    }
}

impl HostEventHandler for Lifecycle {
    fn on_notification(&self, sender: &str, method: &str, data: &str) {
        debug!("notification {method} from {sender} with data {data}");
        match method {
            ON_QUIT => self.mark_and_stop(|state| state.quitting = true),
            ON_RESTART => self.mark_and_stop(|state| state.restarting = true),
            _ => debug!("ignoring notification {method}"),
        }
    }

    fn on_settings_changed(&self) {
        let settings = match Settings::load(self.settings.as_ref()) {
            Ok(settings) => Arc::new(settings),
            Err(e) => {
                error!("keeping previous settings: {e}");
                return;
            }
        };

        let mut state = self.shared.lock();
        state.settings = settings;
        state.settings_changed = true;
        drop(state);
        self.shared.notify_all();
        info!("settings reloaded");
    }
}
