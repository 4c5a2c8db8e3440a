//! Power button pulse decoding.
//!
//! The case signals a button press as a high pulse on the button pin. Short
//! pulses request a restart, longer ones a shutdown.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, error, info};

use crate::{
    drivers::{Level, LevelReader},
    host::{HostActions, HostEventHandler, ON_QUIT, ON_RESTART},
};

/// Pulses shorter than this request a restart.
pub const RESTART_PULSE_LIMIT: Duration = Duration::from_millis(30);

/// Sender name of the notifications announcing a button action.
pub const BUTTON_SENDER: &str = "button";

/// Action decoded from a button pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Restart,
    Shutdown,
}

/// Two-state pulse decoder: idle, or armed with the time of the rising edge.
#[derive(Debug, Default, Clone)]
pub struct EdgeDetector {
    rise: Option<Instant>,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one edge. Returns an action when a complete pulse was seen.
    pub fn on_edge(&mut self, level: Level, timestamp: Instant) -> Option<ButtonAction> {
        match (level, self.rise) {
            (Level::High, _) => {
                self.rise = Some(timestamp);
                None
            }
            (Level::Low, Some(rise)) => {
                self.rise = None;
                let pulse = timestamp.saturating_duration_since(rise);
                debug!("button pulse of {pulse:?}");
                Some(if pulse < RESTART_PULSE_LIMIT {
                    ButtonAction::Restart
                } else {
                    ButtonAction::Shutdown
                })
            }
            (Level::Low, None) => None,
        }
    }
}

/// Decodes edges of the button pin and triggers the host actions.
///
/// Owned by the edge watcher thread; nothing else touches its state. Before a
/// host action runs, the matching quit or restart notification goes to
/// `notifier`, so the stop that follows knows whether to arm the power cut.
/// The notifier must not block on the control lock: the stop sequence joins
/// the watcher thread while holding it.
pub struct ButtonHandler {
    detector: EdgeDetector,
    reader: Box<dyn LevelReader>,
    actions: Arc<dyn HostActions>,
    notifier: Arc<dyn HostEventHandler>,
}

impl ButtonHandler {
    pub fn new(
        reader: Box<dyn LevelReader>,
        actions: Arc<dyn HostActions>,
        notifier: Arc<dyn HostEventHandler>,
    ) -> Self {
        Self {
            detector: EdgeDetector::new(),
            reader,
            actions,
            notifier,
        }
    }

    /// Handles an edge on `pin`; the level is read back synchronously.
    pub fn on_signal_edge(&mut self, pin: u32) {
        let timestamp = Instant::now();
        let level = match self.reader.read_level() {
            Ok(level) => level,
            Err(e) => {
                error!("failed to read level of button pin {pin}: {e}");
                return;
            }
        };

        let result = match self.detector.on_edge(level, timestamp) {
            Some(ButtonAction::Restart) => {
                info!("button requested restart");
                self.notifier.on_notification(BUTTON_SENDER, ON_RESTART, "");
                self.actions.restart()
            }
            Some(ButtonAction::Shutdown) => {
                info!("button requested shutdown");
                self.notifier.on_notification(BUTTON_SENDER, ON_QUIT, "");
                self.actions.shutdown()
            }
            None => return,
        };

        if let Err(e) = result {
            error!("host action failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        drivers::testing::ScriptedLevels,
        error::FanError,
        host::{MockHostActions, MockHostEventHandler},
    };
    use mockall::Sequence;
    use std::sync::Mutex;

    fn quiet_notifier() -> Arc<MockHostEventHandler> {
        let mut notifier = MockHostEventHandler::new();
        notifier.expect_on_notification().return_const(());
        Arc::new(notifier)
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn short_pulse_requests_restart() {
        let t0 = Instant::now();
        let mut detector = EdgeDetector::new();
        assert_eq!(detector.on_edge(Level::High, t0), None);
        assert_eq!(
            detector.on_edge(Level::Low, t0 + ms(10)),
            Some(ButtonAction::Restart)
        );
        assert!(detector.rise.is_none());
    }

    #[test]
    fn long_pulse_requests_shutdown() {
        let t0 = Instant::now();
        let mut detector = EdgeDetector::new();
        detector.on_edge(Level::High, t0);
        assert_eq!(
            detector.on_edge(Level::Low, t0 + ms(50)),
            Some(ButtonAction::Shutdown)
        );
    }

    #[test]
    fn limit_itself_is_shutdown() {
        let t0 = Instant::now();
        let mut detector = EdgeDetector::new();
        detector.on_edge(Level::High, t0);
        assert_eq!(
            detector.on_edge(Level::Low, t0 + RESTART_PULSE_LIMIT),
            Some(ButtonAction::Shutdown)
        );
    }

    #[test]
    fn low_without_rise_is_ignored() {
        let mut detector = EdgeDetector::new();
        assert_eq!(detector.on_edge(Level::Low, Instant::now()), None);
        assert!(detector.rise.is_none());
    }

    #[test]
    fn repeated_rise_restarts_measurement() {
        let t0 = Instant::now();
        let mut detector = EdgeDetector::new();
        detector.on_edge(Level::High, t0);
        detector.on_edge(Level::High, t0 + ms(100));
        assert_eq!(
            detector.on_edge(Level::Low, t0 + ms(110)),
            Some(ButtonAction::Restart)
        );
    }

    #[test]
    fn handler_announces_quit_before_shutdown() {
        let mut seq = Sequence::new();
        let mut notifier = MockHostEventHandler::new();
        notifier
            .expect_on_notification()
            .withf(|sender, method, _| {
                sender.to_string() == BUTTON_SENDER && method.to_string() == ON_QUIT
            })
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        let mut actions = MockHostActions::new();
        actions
            .expect_shutdown()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        actions.expect_restart().never();

        let levels = ScriptedLevels(Mutex::new(vec![Level::High, Level::Low]));
        let mut handler =
            ButtonHandler::new(Box::new(levels), Arc::new(actions), Arc::new(notifier));

        handler.on_signal_edge(4);
        std::thread::sleep(ms(40));
        handler.on_signal_edge(4);
    }

    #[test]
    fn handler_announces_restart() {
        let mut notifier = MockHostEventHandler::new();
        notifier
            .expect_on_notification()
            .withf(|_, method, _| method.to_string() == ON_RESTART)
            .times(1)
            .return_const(());
        let mut actions = MockHostActions::new();
        actions.expect_restart().times(1).returning(|| Ok(()));

        let levels = ScriptedLevels(Mutex::new(vec![Level::High, Level::Low]));
        let mut handler =
            ButtonHandler::new(Box::new(levels), Arc::new(actions), Arc::new(notifier));
        handler.on_signal_edge(4);
        handler.on_signal_edge(4);
    }

    #[test]
    fn handler_logs_failed_action_and_stays_usable() {
        let mut actions = MockHostActions::new();
        actions.expect_restart().times(2).returning(|| {
            Err(FanError::ExternalProcess {
                command: "systemctl reboot".into(),
                reason: "exited with 1".into(),
            })
        });

        let levels = ScriptedLevels(Mutex::new(vec![
            Level::High,
            Level::Low,
            Level::High,
            Level::Low,
        ]));
        let mut handler = ButtonHandler::new(Box::new(levels), Arc::new(actions), quiet_notifier());

        for _ in 0..4 {
            handler.on_signal_edge(4);
        }
    }

    #[test]
    fn unreadable_level_is_ignored() {
        let mut actions = MockHostActions::new();
        actions.expect_restart().never();
        actions.expect_shutdown().never();

        let levels = ScriptedLevels(Mutex::new(Vec::new()));
        let mut handler = ButtonHandler::new(Box::new(levels), Arc::new(actions), quiet_notifier());
        handler.on_signal_edge(4);
    }
}
