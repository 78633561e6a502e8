//! # Action subsystem
//!
//! Simple one-shot actions: arming, disarming, taking off and landing. Every action is a command acknowledged by
//! the autopilot, an action returns once the autopilot accepted it, not once it has been carried out. Use the
//! [telemetry](crate::subsystems::telemetry) subsystem to follow the result, for example the landed state after
//! a takeoff.

use std::sync::{Arc, Mutex};

use mavlink::common::MavCmd;

use crate::subsystems::command::CommandSender;
use crate::subsystems::telemetry::{self, SharedState};
use crate::{Error, Result};

/// Takeoff altitude used until [Action::set_takeoff_altitude()] is called, in meters
pub const DEFAULT_TAKEOFF_ALTITUDE_M: f32 = 2.5;

// MAV_CMD_DO_CHANGE_SPEED speed type
const SPEED_TYPE_GROUND_SPEED: f32 = 1.0;

/// # Access to the action subsystem
///
/// See the [action module documentation](crate::subsystems::action) for more context and information.
pub struct Action {
    commands: Arc<CommandSender>,
    telemetry: SharedState,
    takeoff_altitude_m: Mutex<f32>,
}

impl Action {
    pub(crate) fn new(commands: Arc<CommandSender>, telemetry: SharedState) -> Self {
        Self {
            commands,
            telemetry,
            takeoff_altitude_m: Mutex::new(DEFAULT_TAKEOFF_ALTITUDE_M),
        }
    }

    /// Arm the vehicle motors
    pub async fn arm(&self) -> Result<()> {
        self.commands
            .send_command(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await
    }

    /// Disarm the vehicle motors
    ///
    /// The autopilot refuses to disarm while flying.
    pub async fn disarm(&self) -> Result<()> {
        self.commands
            .send_command(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [0.0; 7])
            .await
    }

    /// Set the altitude above home used by [Action::takeoff()], in meters
    pub fn set_takeoff_altitude(&self, altitude_m: f32) -> Result<()> {
        if !altitude_m.is_finite() || altitude_m < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "takeoff altitude must be a non-negative number of meters, got {}",
                altitude_m
            )));
        }
        *self.takeoff_altitude_m.lock().unwrap_or_else(|p| p.into_inner()) = altitude_m;
        Ok(())
    }

    /// Altitude above home used by [Action::takeoff()], in meters
    pub fn takeoff_altitude(&self) -> f32 {
        *self.takeoff_altitude_m.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Set the ground speed used by the autopilot for automatic maneuvers, in meters per second
    pub async fn set_current_speed(&self, speed_m_s: f32) -> Result<()> {
        if !speed_m_s.is_finite() || speed_m_s <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "speed must be strictly positive, got {}",
                speed_m_s
            )));
        }

        self.commands
            .send_command(
                MavCmd::MAV_CMD_DO_CHANGE_SPEED,
                [SPEED_TYPE_GROUND_SPEED, speed_m_s, -1.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await
    }

    /// Take off to the takeoff altitude
    ///
    /// The vehicle must be armed. The target altitude is sent above mean sea level, computed from the home
    /// position. If no home position was received yet the autopilot's own takeoff altitude is used.
    pub async fn takeoff(&self) -> Result<()> {
        let home_altitude = telemetry::lock(&self.telemetry).home_altitude_amsl_m;
        let altitude = home_altitude
            .map(|home| home + self.takeoff_altitude())
            .unwrap_or(f32::NAN);

        log::debug!("Takeoff to {} m AMSL", altitude);

        self.commands
            .send_command(
                MavCmd::MAV_CMD_NAV_TAKEOFF,
                [-1.0, 0.0, 0.0, f32::NAN, f32::NAN, f32::NAN, altitude],
            )
            .await
    }

    /// Land at the current position
    pub async fn land(&self) -> Result<()> {
        self.commands
            .send_command(
                MavCmd::MAV_CMD_NAV_LAND,
                [0.0, 0.0, 0.0, f32::NAN, f32::NAN, f32::NAN, f32::NAN],
            )
            .await
    }
}
