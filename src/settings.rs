//! Fan control settings and their loader.
//!
//! Settings come from a flat key-value store. Every (re)load produces a new
//! immutable [`Settings`] snapshot; the control loop only ever sees whole
//! snapshots.

use std::{
    collections::HashMap,
    str::FromStr,
    time::{Duration, Instant},
};

use log::debug;

use crate::{
    error::{FanError, Result},
    fan_curve::ThresholdMap,
};

pub const KEY_CHECK_INTERVAL: &str = "checkinterval";
pub const KEY_NUMBER_OF_CHECKS: &str = "numberofchecks";
pub const KEY_USE_CONSTANT_POWER: &str = "useconstantfanpower";
pub const KEY_CONSTANT_POWER: &str = "constantfanpower";

/// Threshold keys in ingestion order, coolest first.
///
/// `fanpowermin` sits below absolute zero so it always matches.
pub const THRESHOLD_KEYS: [(i32, &str); 11] = [
    (-274, "fanpowermin"),
    (30, "fanpower30"),
    (40, "fanpower40"),
    (45, "fanpower45"),
    (50, "fanpower50"),
    (55, "fanpower55"),
    (60, "fanpower60"),
    (65, "fanpower65"),
    (70, "fanpower70"),
    (75, "fanpower75"),
    (80, "fanpower80"),
];

/// Raw string values as delivered by a settings store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSettings(HashMap<String, String>);

impl RawSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .map(str::trim)
            .ok_or_else(|| FanError::missing_setting(key))
    }

    fn parse<T: FromStr>(&self, key: &str, expected: &str) -> Result<T> {
        let value = self.require(key)?;
        value
            .parse()
            .map_err(|_| FanError::invalid_setting(key, value, expected))
    }

    fn parse_power(&self, key: &str) -> Result<u8> {
        const EXPECTED: &str = "an integer between 0 and 100";
        let power: u8 = self.parse(key, EXPECTED)?;
        if power > 100 {
            return Err(FanError::invalid_setting(key, &power.to_string(), EXPECTED));
        }
        Ok(power)
    }

    fn parse_bool(&self, key: &str) -> Result<bool> {
        match self.require(key)? {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(FanError::invalid_setting(key, other, "'true' or 'false'")),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for RawSettings
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Key-value settings store.
///
/// Implementations fetch the current values on every call, so a reload
/// always observes what the store holds right now.
pub trait SettingsProvider: Send + Sync {
    fn fetch(&self) -> Result<RawSettings>;
}

impl SettingsProvider for RawSettings {
    fn fetch(&self) -> Result<RawSettings> {
        Ok(self.clone())
    }
}

/// How the fan power is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanMode {
    /// Fixed power, no temperature sampling.
    Constant(u8),
    /// Power follows the CPU temperature.
    Thresholds(ThresholdMap),
}

/// Immutable settings snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Time between two temperature checks.
    pub check_interval: Duration,
    /// Number of recent readings the fan power is derived from.
    pub number_of_checks: usize,
    pub mode: FanMode,
}

impl Settings {
    /// Fetches and parses the settings from `provider`.
    ///
    /// Any missing or malformed value fails the whole load.
    pub fn load(provider: &dyn SettingsProvider) -> Result<Self> {
        let settings = Self::from_raw(&provider.fetch()?)?;
        debug!("reloaded settings: {settings:?}");
        Ok(settings)
    }

    pub fn from_raw(raw: &RawSettings) -> Result<Self> {
        const INTERVAL_EXPECTED: &str = "a positive number of seconds";
        let seconds: u64 = raw.parse(KEY_CHECK_INTERVAL, INTERVAL_EXPECTED)?;
        let check_interval = Duration::from_secs(seconds);
        // every wait deadline is computed from now, so it must stay representable
        if seconds == 0 || Instant::now().checked_add(check_interval).is_none() {
            return Err(FanError::invalid_setting(
                KEY_CHECK_INTERVAL,
                &seconds.to_string(),
                INTERVAL_EXPECTED,
            ));
        }

        let number_of_checks: usize = raw.parse(KEY_NUMBER_OF_CHECKS, "a positive count")?;
        if number_of_checks == 0 {
            return Err(FanError::invalid_setting(
                KEY_NUMBER_OF_CHECKS,
                "0",
                "a positive count",
            ));
        }

        let mode = if raw.parse_bool(KEY_USE_CONSTANT_POWER)? {
            FanMode::Constant(raw.parse_power(KEY_CONSTANT_POWER)?)
        } else {
            let steps = THRESHOLD_KEYS
                .iter()
                .map(|&(temperature, key)| raw.parse_power(key).map(|power| (temperature, power)))
                .collect::<Result<Vec<_>>>()?;
            FanMode::Thresholds(ThresholdMap::from_ascending(steps))
        };

        Ok(Self {
            check_interval,
            number_of_checks,
            mode,
        })
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.mode, FanMode::Constant(_))
    }

    /// Instant at which a wait started at `wait_start` ends.
    ///
    /// Constant power has no periodic work, so there is no deadline. An
    /// interval beyond what `Instant` can represent waits without deadline
    /// too.
    pub fn wait_deadline(&self, wait_start: Instant) -> Option<Instant> {
        match self.mode {
            FanMode::Constant(_) => None,
            FanMode::Thresholds(_) => wait_start.checked_add(self.check_interval),
        }
    }
}
