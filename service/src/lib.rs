//! Ambient infrastructure shared by the realtime crates: configuration
//! loading and logger setup.

pub mod config;
pub mod logging;
