//! # Vehicle subsystems
//!
//! The client side of the autopilot is organized in logical subsystems, each with one role. Subsystems are
//! created when the [Vehicle](crate::Vehicle) connects and are available as its public fields.
//!
//! Modules here implement the Rust API for the different subsystems, they are the main way to communicate and
//! interact with the vehicle.

pub mod action;
pub(crate) mod command;
pub(crate) mod heartbeat;
pub mod offboard;
pub mod telemetry;
