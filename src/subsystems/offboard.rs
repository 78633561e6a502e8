//! # Offboard control subsystem
//!
//! In offboard mode the autopilot follows setpoints sent by this program instead of flying a mission. The
//! autopilot has a couple of safety mechanisms one needs to be aware of:
//!  - Offboard mode is rejected unless setpoints are already streaming, so a setpoint must be set with
//!    [Offboard::set_velocity_body()] before calling [Offboard::start()]
//!  - If setpoints stop arriving for about half a second the autopilot leaves offboard mode. The last setpoint
//!    is therefore resent at [SETPOINT_RATE_HZ] by a background task for as long as it is set.
//!
//! Flying forward for 4 seconds and stopping:
//! ``` no_run
//! # use automissions::subsystems::offboard::VelocityBodyYawspeed;
//! # use tokio::time::{sleep, Duration};
//! # async fn forward(vehicle: &automissions::Vehicle) -> automissions::Result<()> {
//! vehicle.offboard.set_velocity_body(VelocityBodyYawspeed::default()).await?;
//! vehicle.offboard.start().await?;
//!
//! vehicle.offboard.set_velocity_body(VelocityBodyYawspeed { forward_m_s: 0.5, ..Default::default() }).await?;
//! sleep(Duration::from_secs(4)).await;
//!
//! vehicle.offboard.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use flume::Sender;
use mavlink::common::{
    MavCmd, MavFrame, MavMessage, MavModeFlag, PositionTargetTypemask, SET_POSITION_TARGET_LOCAL_NED_DATA,
};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::subsystems::command::CommandSender;
use crate::subsystems::telemetry::{self, FlightMode, Px4AutoSubMode, Px4MainMode, SharedState};
use crate::{Error, Result};

/// Rate at which the current setpoint is resent
pub const SETPOINT_RATE_HZ: u64 = 20;

/// Type mask enabling only the velocity and yaw rate fields of `SET_POSITION_TARGET_LOCAL_NED`
pub const VELOCITY_YAWSPEED_TYPE_MASK: u16 = 0x05C7;

/// Velocity setpoint in the vehicle body frame
///
/// The default value is a hover: all velocities zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityBodyYawspeed {
    /// Velocity forward (m/s)
    pub forward_m_s: f32,
    /// Velocity to the right (m/s)
    pub right_m_s: f32,
    /// Velocity down (m/s), negative is up
    pub down_m_s: f32,
    /// Yaw rate, clockwise seen from above (degrees/second)
    pub yawspeed_deg_s: f32,
}

/// # Access to the offboard subsystem
///
/// See the [offboard module documentation](crate::subsystems::offboard) for more context and information.
pub struct Offboard {
    commands: Arc<CommandSender>,
    uplink: Sender<MavMessage>,
    telemetry: SharedState,
    setpoint: Arc<Mutex<Option<VelocityBodyYawspeed>>>,
    target_system: u8,
    target_component: u8,
    boot: Instant,
    _setpoint_task: JoinHandle<()>,
}

impl Offboard {
    pub(crate) fn new(
        commands: Arc<CommandSender>,
        uplink: Sender<MavMessage>,
        telemetry: SharedState,
        target_system: u8,
        target_component: u8,
        disconnect: Arc<AtomicBool>,
    ) -> Self {
        let setpoint: Arc<Mutex<Option<VelocityBodyYawspeed>>> = Default::default();
        let boot = Instant::now();

        let task_setpoint = setpoint.clone();
        let task_uplink = uplink.clone();
        let _setpoint_task = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(1000 / SETPOINT_RATE_HZ));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while !disconnect.load(Relaxed) {
                ticker.tick().await;

                let current = *task_setpoint.lock().unwrap_or_else(|p| p.into_inner());
                if let Some(current) = current {
                    let message = setpoint_message(&current, target_system, target_component, boot.elapsed());
                    if task_uplink.send_async(message).await.is_err() {
                        return;
                    }
                }
            }
        });

        Self {
            commands,
            uplink,
            telemetry,
            setpoint,
            target_system,
            target_component,
            boot,
            _setpoint_task,
        }
    }

    /// Set the velocity setpoint in body coordinates
    ///
    /// The setpoint is sent right away and then repeated until replaced or until [Offboard::stop()] is called.
    pub async fn set_velocity_body(&self, velocity: VelocityBodyYawspeed) -> Result<()> {
        *self.setpoint.lock().unwrap_or_else(|p| p.into_inner()) = Some(velocity);

        let message = setpoint_message(&velocity, self.target_system, self.target_component, self.boot.elapsed());
        self.uplink.send_async(message).await?;

        Ok(())
    }

    /// Switch the autopilot to offboard mode
    ///
    /// Returns [Error::NoSetpointSet] if no setpoint has been set yet.
    pub async fn start(&self) -> Result<()> {
        if self.setpoint.lock().unwrap_or_else(|p| p.into_inner()).is_none() {
            return Err(Error::NoSetpointSet);
        }

        self.set_px4_mode(Px4MainMode::Offboard, 0).await
    }

    /// Leave offboard mode
    ///
    /// The autopilot is switched to hold, then the setpoint stream is stopped.
    pub async fn stop(&self) -> Result<()> {
        self.set_px4_mode(Px4MainMode::Auto, Px4AutoSubMode::Loiter as u8).await?;

        *self.setpoint.lock().unwrap_or_else(|p| p.into_inner()) = None;

        Ok(())
    }

    /// True when the autopilot reports being in offboard mode
    pub fn is_active(&self) -> bool {
        telemetry::lock(&self.telemetry).flight_mode == FlightMode::Offboard
    }

    async fn set_px4_mode(&self, main_mode: Px4MainMode, sub_mode: u8) -> Result<()> {
        let base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;

        self.commands
            .send_command(
                MavCmd::MAV_CMD_DO_SET_MODE,
                [base_mode, main_mode as u8 as f32, sub_mode as f32, 0.0, 0.0, 0.0, 0.0],
            )
            .await
    }
}

/// Build the `SET_POSITION_TARGET_LOCAL_NED` message for a body frame velocity
pub(crate) fn setpoint_message(
    velocity: &VelocityBodyYawspeed,
    target_system: u8,
    target_component: u8,
    since_boot: Duration,
) -> MavMessage {
    MavMessage::SET_POSITION_TARGET_LOCAL_NED(SET_POSITION_TARGET_LOCAL_NED_DATA {
        time_boot_ms: since_boot.as_millis() as u32,
        x: 0.0,
        y: 0.0,
        z: 0.0,
        vx: velocity.forward_m_s,
        vy: velocity.right_m_s,
        vz: velocity.down_m_s,
        afx: 0.0,
        afy: 0.0,
        afz: 0.0,
        yaw: 0.0,
        yaw_rate: velocity.yawspeed_deg_s.to_radians(),
        type_mask: PositionTargetTypemask::from_bits_truncate(VELOCITY_YAWSPEED_TYPE_MASK),
        target_system,
        target_component,
        coordinate_frame: MavFrame::MAV_FRAME_BODY_NED,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setpoint_is_body_frame_velocity_only() {
        let velocity = VelocityBodyYawspeed {
            forward_m_s: 0.5,
            right_m_s: -0.5,
            down_m_s: 0.25,
            yawspeed_deg_s: 22.5,
        };

        let MavMessage::SET_POSITION_TARGET_LOCAL_NED(setpoint) =
            setpoint_message(&velocity, 1, 1, Duration::from_millis(1234))
        else {
            panic!("expected SET_POSITION_TARGET_LOCAL_NED");
        };

        assert_eq!(setpoint.coordinate_frame, MavFrame::MAV_FRAME_BODY_NED);
        assert_eq!(setpoint.type_mask.bits(), VELOCITY_YAWSPEED_TYPE_MASK);
        assert_eq!((setpoint.vx, setpoint.vy, setpoint.vz), (0.5, -0.5, 0.25));
        assert!((setpoint.yaw_rate - std::f32::consts::PI / 8.0).abs() < 1e-6);
        assert_eq!(setpoint.time_boot_ms, 1234);
        assert_eq!((setpoint.target_system, setpoint.target_component), (1, 1));
    }

    #[test]
    fn default_setpoint_is_hover() {
        let hover = VelocityBodyYawspeed::default();
        let MavMessage::SET_POSITION_TARGET_LOCAL_NED(setpoint) = setpoint_message(&hover, 1, 1, Duration::ZERO)
        else {
            panic!("expected SET_POSITION_TARGET_LOCAL_NED");
        };
        assert_eq!((setpoint.vx, setpoint.vy, setpoint.vz, setpoint.yaw_rate), (0.0, 0.0, 0.0, 0.0));
    }
}
