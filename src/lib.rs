//! Serves live Shelly 3EM readings as a Carlo Gavazzi EM24 over Modbus TCP.
//!
//! A background [`refresh::RefreshLoop`] polls the Shelly and publishes each
//! complete [`telemetry::TelemetrySnapshot`] into a [`latest::LatestValue`].
//! The Modbus server answers holding register reads through
//! [`handler::RegisterReadHandler`], which maps the latest snapshot onto the
//! EM24 register layout in [`registers`].

pub mod config;
pub mod error;
pub mod handler;
pub mod latest;
pub mod refresh;
pub mod registers;
pub mod telemetry;
pub mod watchdog;
