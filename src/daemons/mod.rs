//! Background workers that keep stored tags in step with the radio

pub mod properties;

pub use properties::PropertiesDaemon;
