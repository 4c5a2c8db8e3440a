use std::{fs, path::PathBuf};

use log::trace;

use crate::{
    error::{FanError, Result},
    sensors::TemperatureSource,
};

pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Kernel thermal zone exposing the temperature in millidegrees Celsius.
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_error(&self, reason: impl ToString) -> FanError {
        FanError::TemperatureRead {
            source_name: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Default for ThermalZone {
    fn default() -> Self {
        Self::new(DEFAULT_THERMAL_ZONE)
    }
}

impl TemperatureSource for ThermalZone {
    fn read_celsius(&mut self) -> Result<i32> {
        let raw = fs::read_to_string(&self.path).map_err(|e| self.read_error(e))?;
        let millidegrees: i64 = raw
            .trim()
            .parse()
            .map_err(|e| self.read_error(format!("'{}': {e}", raw.trim())))?;
        let celsius = i32::try_from(millidegrees.div_euclid(1000))
            .map_err(|e| self.read_error(e))?;
        trace!("read {celsius}°C from {}", self.path.display());
        Ok(celsius)
    }

    fn source_name(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn zone_with(content: &str) -> (tempfile::NamedTempFile, ThermalZone) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        let zone = ThermalZone::new(file.path());
        (file, zone)
    }

    #[test]
    fn converts_millidegrees() {
        let (_file, mut zone) = zone_with("48312\n");
        assert_eq!(zone.read_celsius().unwrap(), 48);
    }

    #[test]
    fn negative_values_round_down() {
        let (_file, mut zone) = zone_with("-1500\n");
        assert_eq!(zone.read_celsius().unwrap(), -2);
    }

    #[test]
    fn garbage_is_temperature_error() {
        let (_file, mut zone) = zone_with("hot");
        let err = zone.read_celsius().unwrap_err();
        assert!(matches!(err, FanError::TemperatureRead { .. }));
        assert!(err.to_string().contains("hot"));
    }

    #[test]
    fn missing_file_is_temperature_error() {
        let mut zone = ThermalZone::new("/nonexistent/thermal_zone/temp");
        assert!(matches!(
            zone.read_celsius(),
            Err(FanError::TemperatureRead { .. })
        ));
        assert_eq!(zone.source_name(), "/nonexistent/thermal_zone/temp");
    }
}
