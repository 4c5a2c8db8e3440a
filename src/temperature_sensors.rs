pub mod thermal_zone;

pub use thermal_zone::ThermalZone;
