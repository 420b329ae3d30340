// Configuration loading

pub mod settings;

pub use settings::{BackfillSettings, ConfigError, OutputSettings, RegistrySettings, Settings, SweepSettings};
