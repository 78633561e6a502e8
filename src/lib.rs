//! # automissions
//!
//! Ground station side of a PX4 multicopter: discover the autopilot on a MAVLink link, follow its state, and
//! fly it through velocity scripts in offboard mode. Framing and transports (TCP, UDP, serial) come from the
//! [mavlink] crate.
//!
//! ## Status
//!
//! The client side of the vehicle is implemented in subsystems. The current status is:
//!
//! | Subsystem | Support |
//! |-----------|---------|
//! | Action | Partial (arm, disarm, takeoff, land, speed) |
//! | Offboard | Partial (body frame velocity only) |
//! | Telemetry | Partial (health, armed, landed state, flight mode, altitude) |
//! | Mission | Velocity scripts |
//!
//! ## Compatibility
//!
//! Flight modes are decoded and set using the PX4 custom mode layout, the vehicle is expected to run PX4.
//!
//! ## Usage
//!
//! A session goes through [Vehicle::connect_from_url()] (or [Vehicle::connect_from_link()] for a custom
//! [Link]), which returns once an autopilot heartbeat has been seen. The `action`, `offboard` and `telemetry`
//! fields then drive the vehicle directly, or [Mission::run()] flies a whole script. The session ends with
//! [vehicle::Vehicle::disconnect()] or when the [Vehicle] is dropped.
//!
//! Subsystem methods take `&self`. Wrap the [Vehicle] in an `Arc` to use it from several tasks, for example
//! one task watching telemetry while another flies the mission.
//!
//! For example:
//! ``` no_run
//! # async fn fly() -> Result<(), Box<dyn std::error::Error>> {
//! use automissions::{Mission, MissionTiming, Vehicle, DEFAULT_DISCOVERY_TIMEOUT};
//!
//! let vehicle = Vehicle::connect_from_url("udp://:14540", DEFAULT_DISCOVERY_TIMEOUT).await?;
//!
//! println!("Health: {:?}", vehicle.telemetry.health());
//!
//! Mission::forward().run(&vehicle, &MissionTiming::default()).await?;
//!
//! vehicle.disconnect().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod connection_url;
mod error;
mod mavlink_utils;
pub mod mission;
pub mod subsystems;
pub mod vehicle;

pub use crate::connection_url::ConnectionUrl;
pub use crate::error::{Error, Result};
pub use crate::mavlink_utils::{Link, GCS_COMPONENT_ID, GCS_SYSTEM_ID};
pub use crate::mission::{Maneuver, Mission, MissionStep, MissionTiming};
pub use crate::vehicle::{Vehicle, DEFAULT_DISCOVERY_TIMEOUT};
