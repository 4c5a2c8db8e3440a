//! Temperature to fan power lookup.
//!
//! The fan is driven in steps: every configured threshold maps a minimum
//! CPU temperature to a power percentage, and the highest threshold that the
//! current temperature reaches wins.

use log::debug;

/// One step of a [`ThresholdMap`].
///
/// # Example
///
/// ```
/// use argonone_fand::fan_curve::Threshold;
///
/// let step = Threshold { temperature: 55, power: 40 }; // 55°C -> 40 %
/// let from_tuple: Threshold = (55, 40).into();
/// assert_eq!(step, from_tuple);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold {
    /// Lowest temperature in °C for which this step applies.
    pub temperature: i32,
    /// Fan power in percent (0-100).
    pub power: u8,
}

impl From<(i32, u8)> for Threshold {
    fn from(value: (i32, u8)) -> Self {
        Self {
            temperature: value.0,
            power: value.1,
        }
    }
}

/// Ordered temperature to power lookup table.
///
/// Entries are kept sorted by descending temperature and power strictly
/// decreases along with the temperature, so a lower threshold never asks for
/// more power than a higher one.
///
/// # Example
///
/// ```
/// use argonone_fand::fan_curve::ThresholdMap;
///
/// let map = ThresholdMap::from_ascending([(-274, 0), (30, 20), (50, 50), (70, 80)]);
/// assert_eq!(map.power_for(72), 80);
/// assert_eq!(map.power_for(55), 50);
/// assert_eq!(map.power_for(-300), 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThresholdMap {
    entries: Vec<Threshold>,
}

impl ThresholdMap {
    /// Builds a map from steps given in ascending temperature order.
    ///
    /// A step is accepted only when its power is higher than every step
    /// accepted so far. Steps asking for less power than a cooler step are
    /// dropped; steps repeating the previous power add nothing and are skipped.
    pub fn from_ascending<I, T>(steps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Threshold>,
    {
        let mut entries: Vec<Threshold> = Vec::new();

        for step in steps.into_iter().map(Into::into) {
            match entries.last() {
                Some(accepted) if step.power < accepted.power => {
                    debug!(
                        "ignoring threshold {}°C -> {}% because a cooler threshold already asks for {}%",
                        step.temperature, step.power, accepted.power
                    );
                }
                Some(accepted) if step.power == accepted.power => {}
                _ => {
                    debug!(
                        "added threshold to mapping: {}°C -> {}%",
                        step.temperature, step.power
                    );
                    entries.push(step);
                }
            }
        }

        entries.reverse();
        Self { entries }
    }

    /// Returns the power for the given temperature.
    ///
    /// The first entry (highest threshold) not above `temperature` wins; when
    /// no entry matches the fan is off.
    pub fn power_for(&self, temperature: i32) -> u8 {
        self.entries
            .iter()
            .find(|entry| entry.temperature <= temperature)
            .map_or(0, |entry| entry.power)
    }

    /// Entries in descending temperature order.
    pub fn entries(&self) -> &[Threshold] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn reference_map() -> ThresholdMap {
        ThresholdMap::from_ascending([(-274, 0), (30, 20), (50, 50), (70, 80)])
    }

    #[test]
    fn threshold_from_tuple() {
        let step: Threshold = (45, 30).into();
        assert_eq!(step.temperature, 45);
        assert_eq!(step.power, 30);
    }

    #[test]
    fn entries_are_sorted_descending() {
        let temps: Vec<i32> = reference_map()
            .entries()
            .iter()
            .map(|e| e.temperature)
            .collect();
        assert_eq!(temps, vec![70, 50, 30, -274]);
    }

    #[test]
    fn power_lookup_picks_highest_reached_threshold() {
        let map = reference_map();
        assert_eq!(map.power_for(72), 80);
        assert_eq!(map.power_for(55), 50);
        assert_eq!(map.power_for(35), 20);
        // -274 is the lowest threshold, so 10°C lands on the 0 % entry
        assert_eq!(map.power_for(10), 0);
        assert_eq!(map.power_for(-300), 0);
    }

    #[test]
    fn power_lookup_is_inclusive_at_threshold() {
        let map = reference_map();
        assert_eq!(map.power_for(70), 80);
        assert_eq!(map.power_for(69), 50);
        assert_eq!(map.power_for(30), 20);
        assert_eq!(map.power_for(29), 0);
    }

    #[test]
    fn lower_power_at_higher_threshold_is_dropped() {
        let map = ThresholdMap::from_ascending([(-274, 0), (30, 20), (50, 60), (60, 40), (70, 80)]);
        assert_eq!(
            map.entries(),
            &[
                Threshold::from((70, 80)),
                Threshold::from((50, 60)),
                Threshold::from((30, 20)),
                Threshold::from((-274, 0)),
            ]
        );
        // 65°C falls back to the 50°C step instead of the dropped 60°C one
        assert_eq!(map.power_for(65), 60);
    }

    #[test]
    fn repeated_power_keeps_the_cooler_threshold() {
        let map = ThresholdMap::from_ascending([(-274, 10), (30, 10), (40, 10), (50, 30)]);
        assert_eq!(
            map.entries(),
            &[Threshold::from((50, 30)), Threshold::from((-274, 10))]
        );
        assert_eq!(map.power_for(35), 10);
    }

    #[test]
    fn all_zero_steps_collapse_to_single_entry() {
        let map = ThresholdMap::from_ascending([(-274, 0), (30, 0), (80, 0)]);
        assert_eq!(map.entries(), &[Threshold::from((-274, 0))]);
        assert_eq!(map.power_for(90), 0);
    }

    #[test]
    fn empty_map_means_fan_off() {
        let map = ThresholdMap::from_ascending(Vec::<(i32, u8)>::new());
        assert!(map.entries().is_empty());
        assert_eq!(map.power_for(100), 0);
    }

    proptest! {
        #[test]
        fn accepted_entries_are_strictly_monotonic(
            powers in prop::collection::vec(0u8..=100, 0..11)
        ) {
            let steps: Vec<(i32, u8)> = powers
                .iter()
                .enumerate()
                .map(|(idx, power)| (idx as i32 * 5, *power))
                .collect();
            let map = ThresholdMap::from_ascending(steps);

            for pair in map.entries().windows(2) {
                prop_assert!(pair[0].temperature > pair[1].temperature);
                prop_assert!(pair[0].power > pair[1].power);
            }
        }

        #[test]
        fn power_never_decreases_with_temperature(
            powers in prop::collection::vec(0u8..=100, 1..11),
            low in -300i32..120,
            delta in 0i32..100,
        ) {
            let steps: Vec<(i32, u8)> = powers
                .iter()
                .enumerate()
                .map(|(idx, power)| (30 + idx as i32 * 5, *power))
                .collect();
            let map = ThresholdMap::from_ascending(steps);
            prop_assert!(map.power_for(low) <= map.power_for(low + delta));
        }
    }
}
