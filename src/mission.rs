//! # Scripted velocity missions
//!
//! A [Mission] is a fixed list of body frame velocity [Maneuver]s flown in offboard mode between a takeoff and a
//! landing. [Mission::run()] drives a connected [Vehicle] through the whole sequence:
//!
//! 1. wait for the vehicle health to be ok
//! 2. arm
//! 3. take off and wait for the vehicle to be in the air
//! 4. start offboard mode and fly every maneuver for its duration
//! 5. stop offboard mode, land and wait for the vehicle to be on the ground
//!
//! Any failure stops the sequence and is reported as [Error::Mission] naming the failed [MissionStep]. Nothing is
//! retried.

use std::fmt;

use tokio::time::{sleep, Duration};

use crate::subsystems::offboard::VelocityBodyYawspeed;
use crate::subsystems::telemetry::LandedState;
use crate::{Error, Result, Vehicle};

/// One constant velocity setpoint held for a duration
#[derive(Debug, Clone, PartialEq)]
pub struct Maneuver {
    /// Name logged when the maneuver starts
    pub name: &'static str,
    /// Velocity setpoint
    pub setpoint: VelocityBodyYawspeed,
    /// Time during which the setpoint is held
    pub duration: Duration,
}

impl Maneuver {
    /// Hold position
    pub fn hover(duration: Duration) -> Self {
        Self {
            name: "Hover",
            setpoint: VelocityBodyYawspeed::default(),
            duration,
        }
    }

    fn fly(name: &'static str, forward_m_s: f32, right_m_s: f32, down_m_s: f32, yawspeed_deg_s: f32) -> Self {
        Self {
            name,
            setpoint: VelocityBodyYawspeed {
                forward_m_s,
                right_m_s,
                down_m_s,
                yawspeed_deg_s,
            },
            duration: Duration::from_secs(4),
        }
    }
}

/// Steps of a mission, used to report where it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionStep {
    /// Arming the motors
    Arm,
    /// Sending the takeoff, including takeoff altitude and speed
    Takeoff,
    /// Waiting for the vehicle to be in the air
    InAir,
    /// Switching to offboard mode
    OffboardStart,
    /// Sending a maneuver setpoint
    Maneuver,
    /// Leaving offboard mode
    OffboardStop,
    /// Sending the landing
    Land,
}

impl fmt::Display for MissionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissionStep::Arm => "Arming failed",
            MissionStep::Takeoff => "Takeoff failed",
            MissionStep::InAir => "Takeoff timed out",
            MissionStep::OffboardStart => "Offboard start failed",
            MissionStep::Maneuver => "Setpoint failed",
            MissionStep::OffboardStop => "Offboard stop failed",
            MissionStep::Land => "Landing failed",
        })
    }
}

/// Waits and polling intervals of [Mission::run()]
///
/// Tests and simulations can shrink every wait, `duration_scale` also scales the maneuver durations.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionTiming {
    /// Interval between two health checks before arming
    pub health_poll_interval: Duration,
    /// Maximum time between the takeoff command and the vehicle reporting being in the air
    pub in_air_timeout: Duration,
    /// Interval between two landed checks while landing
    pub landing_poll_interval: Duration,
    /// Wait after landing so the autopilot disarms
    pub settle_delay: Duration,
    /// Factor applied to every maneuver duration
    pub duration_scale: f32,
}

impl Default for MissionTiming {
    fn default() -> Self {
        Self {
            health_poll_interval: Duration::from_secs(1),
            in_air_timeout: Duration::from_secs(13),
            landing_poll_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(3),
            duration_scale: 1.0,
        }
    }
}

impl MissionTiming {
    fn scaled(&self, duration: Duration) -> Result<Duration> {
        Duration::try_from_secs_f32(duration.as_secs_f32() * self.duration_scale).map_err(|_| {
            Error::InvalidArgument(format!(
                "duration scale {} cannot be applied to {:?}",
                self.duration_scale, duration
            ))
        })
    }
}

/// A takeoff, a list of maneuvers and a landing
#[derive(Debug, Clone, PartialEq)]
pub struct Mission {
    /// Name of the mission
    pub name: &'static str,
    /// Altitude above home reached by the takeoff (m)
    pub takeoff_altitude_m: f32,
    /// Speed set before takeoff (m/s)
    pub speed_m_s: f32,
    /// Maneuvers flown in offboard mode, in order
    pub maneuvers: Vec<Maneuver>,
}

impl Mission {
    /// Hover, fly forward at 0.5 m/s for 4 seconds, hover
    pub fn forward() -> Self {
        Self {
            name: "Offboard velocity control in body coordinates",
            takeoff_altitude_m: 1.0,
            speed_m_s: 0.25,
            maneuvers: vec![
                Maneuver::hover(Duration::from_secs(2)),
                Maneuver::fly("Fly forward", 0.5, 0.0, 0.0, 0.0),
                Maneuver::hover(Duration::from_secs(2)),
            ],
        }
    }

    /// Four diagonal legs then four quarter circles, climbing and descending
    pub fn omnidirectional() -> Self {
        Self {
            name: "Omnidirectional velocity control in body coordinates",
            takeoff_altitude_m: 1.5,
            speed_m_s: 0.25,
            maneuvers: vec![
                Maneuver::hover(Duration::from_secs(2)),
                Maneuver::fly("Fly forward, right, up", 0.5, 0.5, -0.25, 0.0),
                Maneuver::fly("Fly forward, left, down", 0.5, -0.5, 0.25, 0.0),
                Maneuver::fly("Fly backward, left, up", -0.5, -0.5, -0.25, 0.0),
                Maneuver::fly("Fly backward, right, down", -0.5, 0.5, 0.25, 0.0),
                Maneuver::fly("Fly quarter circle up", 0.0, 0.5, -0.25, 22.5),
                Maneuver::fly("Fly quarter circle down", 0.0, 0.5, 0.25, 22.5),
                Maneuver::fly("Fly quarter circle up", 0.0, 0.5, -0.25, 22.5),
                Maneuver::fly("Fly quarter circle down", 0.0, 0.5, 0.25, 22.5),
                Maneuver::hover(Duration::from_secs(2)),
            ],
        }
    }

    /// Sum of the maneuver durations
    pub fn total_duration(&self) -> Duration {
        self.maneuvers.iter().map(|maneuver| maneuver.duration).sum()
    }

    /// Fly the mission
    ///
    /// Returns once the vehicle is back on the ground and the settle delay has passed. A `duration_scale` that
    /// gives a negative or unrepresentable maneuver duration is rejected with [Error::InvalidArgument] before
    /// anything is sent.
    pub async fn run(&self, vehicle: &Vehicle, timing: &MissionTiming) -> Result<()> {
        for maneuver in &self.maneuvers {
            timing.scaled(maneuver.duration)?;
        }

        while !vehicle.telemetry.health_all_ok() {
            log::info!("Waiting for system to be ready");
            sleep(timing.health_poll_interval).await;
        }
        log::info!("System is ready");

        vehicle.action.arm().await.map_err(|e| e.in_step(MissionStep::Arm))?;
        log::info!("Armed");

        self.takeoff(vehicle).await.map_err(|e| e.in_step(MissionStep::Takeoff))?;
        vehicle
            .telemetry
            .wait_landed_state(LandedState::InAir, timing.in_air_timeout)
            .await
            .map_err(|e| e.in_step(MissionStep::InAir))?;
        log::info!("Taking off has finished");

        self.fly_offboard(vehicle, timing).await?;

        vehicle.action.land().await.map_err(|e| e.in_step(MissionStep::Land))?;
        while vehicle.telemetry.in_air() {
            log::info!("Vehicle is landing...");
            sleep(timing.landing_poll_interval).await;
        }
        log::info!("Landed!");

        // Leave time for the autopilot to disarm
        sleep(timing.settle_delay).await;
        log::info!("Finished...");

        Ok(())
    }

    async fn takeoff(&self, vehicle: &Vehicle) -> Result<()> {
        vehicle.action.set_takeoff_altitude(self.takeoff_altitude_m)?;
        vehicle.action.set_current_speed(self.speed_m_s).await?;
        vehicle.action.takeoff().await
    }

    async fn fly_offboard(&self, vehicle: &Vehicle, timing: &MissionTiming) -> Result<()> {
        log::info!("Starting {}", self.name);

        // Offboard is rejected unless a setpoint is already streaming
        vehicle
            .offboard
            .set_velocity_body(VelocityBodyYawspeed::default())
            .await
            .map_err(|e| e.in_step(MissionStep::OffboardStart))?;
        vehicle
            .offboard
            .start()
            .await
            .map_err(|e| e.in_step(MissionStep::OffboardStart))?;
        log::info!("Offboard started");

        for maneuver in &self.maneuvers {
            log::info!("{}", maneuver.name);
            vehicle
                .offboard
                .set_velocity_body(maneuver.setpoint)
                .await
                .map_err(|e| e.in_step(MissionStep::Maneuver))?;
            sleep(timing.scaled(maneuver.duration)?).await;
        }

        vehicle
            .offboard
            .stop()
            .await
            .map_err(|e| e.in_step(MissionStep::OffboardStop))?;
        log::info!("Offboard stopped");

        Ok(())
    }
}
