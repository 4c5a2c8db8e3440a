use std::collections::VecDeque;

use crate::error::Result;

/// Source of CPU temperature readings in whole °C.
#[cfg_attr(test, mockall::automock)]
pub trait TemperatureSource: Send {
    fn read_celsius(&mut self) -> Result<i32>;

    fn source_name(&self) -> String {
        "temperature source".to_string()
    }
}

/// Most recent temperature readings.
///
/// The effective temperature is the window maximum, so a short dip does not
/// slow the fan down while a spike speeds it up immediately.
#[derive(Debug, Clone, Default)]
pub struct SampleWindow {
    samples: VecDeque<i32>,
}

impl SampleWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `reading`, evicts the oldest samples beyond `capacity` and
    /// returns the window maximum.
    pub fn record(&mut self, reading: i32, capacity: usize) -> i32 {
        self.samples.push_back(reading);
        while self.samples.len() > capacity.max(1) {
            self.samples.pop_front();
        }
        self.samples.iter().copied().max().unwrap_or(reading)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn samples(&self) -> impl Iterator<Item = i32> + '_ {
        self.samples.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
