mod audio_properties;
mod chorus_config;

pub use audio_properties::{AudioProperties, DistanceAlgorithm};
pub use chorus_config::ChorusConfig;
