//! Live state synchronization core of a RuuviTag station
//!
//! Stored tags, radio observations and station-wide events are fused into
//! view models by single-task controllers. Every feed a controller opens is
//! tracked in its [`subscription::HandleTable`] and released exactly once.

pub mod alerts;
pub mod bluetooth;
pub mod config;
pub mod daemons;
pub mod error;
pub mod events;
pub mod humidity;
pub mod models;
pub mod presentation;
pub mod services;
pub mod store;
pub mod subscription;
pub mod utils;

pub use error::{Result, StationError};
