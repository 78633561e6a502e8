//! # Telemetry subsystem
//!
//! The autopilot streams its state continuously. This subsystem decodes the messages coming from the connected
//! system in a background task and keeps the latest values, so every query below is instantaneous:
//! - Health of the sensors and of the position estimate, see [Health]
//! - Armed state and [FlightMode], from the heartbeat
//! - [LandedState], from `EXTENDED_SYS_STATE`
//! - Home and relative altitude
//!
//! Landed state changes can also be followed as a stream:
//! ``` no_run
//! # use futures::StreamExt;
//! # async fn follow(vehicle: &automissions::Vehicle) {
//! let states = vehicle.telemetry.subscribe_landed_state();
//! futures::pin_mut!(states);
//! while let Some(state) = states.next().await {
//!     println!("Landed state: {:?}", state);
//! }
//! # }
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Mutex, MutexGuard};

use async_broadcast::{broadcast, InactiveReceiver, Sender as BroadcastSender};
use flume::Receiver;
use futures::{Stream, StreamExt};
use mavlink::common::{
    GpsFixType, MavAutopilot, MavLandedState, MavMessage, MavModeFlag, MavSysStatusSensor, SYS_STATUS_DATA,
};
use mavlink::MavHeader;
use num_enum::TryFromPrimitive;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::mavlink_utils::Envelope;
use crate::{Error, Result};

/// Landed state of the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LandedState {
    /// No landed state received yet, or the autopilot does not know
    #[default]
    Unknown,
    /// Vehicle is on the ground
    OnGround,
    /// Vehicle is flying
    InAir,
    /// Vehicle is taking off
    TakingOff,
    /// Vehicle is landing
    Landing,
}

impl From<MavLandedState> for LandedState {
    fn from(state: MavLandedState) -> Self {
        match state {
            MavLandedState::MAV_LANDED_STATE_ON_GROUND => LandedState::OnGround,
            MavLandedState::MAV_LANDED_STATE_IN_AIR => LandedState::InAir,
            MavLandedState::MAV_LANDED_STATE_TAKEOFF => LandedState::TakingOff,
            MavLandedState::MAV_LANDED_STATE_LANDING => LandedState::Landing,
            _ => LandedState::Unknown,
        }
    }
}

/// Readiness of the vehicle sensors and estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Health {
    /// Gyrometer present, enabled and healthy
    pub is_gyrometer_calibration_ok: bool,
    /// Accelerometer present, enabled and healthy
    pub is_accelerometer_calibration_ok: bool,
    /// Magnetometer present, enabled and healthy
    pub is_magnetometer_calibration_ok: bool,
    /// Local position estimate good enough to fly
    pub is_local_position_ok: bool,
    /// Global position estimate good enough to fly
    pub is_global_position_ok: bool,
    /// Home position has been set
    pub is_home_position_ok: bool,
}

impl Health {
    /// True when every check passes
    pub fn is_all_ok(&self) -> bool {
        self.is_gyrometer_calibration_ok
            && self.is_accelerometer_calibration_ok
            && self.is_magnetometer_calibration_ok
            && self.is_local_position_ok
            && self.is_global_position_ok
            && self.is_home_position_ok
    }
}

/// Flight mode reported by the autopilot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlightMode {
    /// Mode not known or not a PX4 custom mode
    #[default]
    Unknown,
    /// Armed and ready to take off
    Ready,
    /// Taking off
    Takeoff,
    /// Holding position
    Hold,
    /// Flying a mission
    Mission,
    /// Returning to the launch position
    ReturnToLaunch,
    /// Landing
    Land,
    /// Following setpoints from an external program
    Offboard,
    /// Following a target
    FollowMe,
    /// Manual control
    Manual,
    /// Altitude control
    Altctl,
    /// Position control
    Posctl,
    /// Acro
    Acro,
    /// Stabilized
    Stabilized,
    /// Rattitude
    Rattitude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub(crate) enum Px4MainMode {
    Manual = 1,
    Altctl = 2,
    Posctl = 3,
    Auto = 4,
    Acro = 5,
    Offboard = 6,
    Stabilized = 7,
    Rattitude = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub(crate) enum Px4AutoSubMode {
    Ready = 1,
    Takeoff = 2,
    Loiter = 3,
    Mission = 4,
    Rtl = 5,
    Land = 6,
    FollowTarget = 8,
    Precland = 9,
}

impl FlightMode {
    /// Decode the PX4 custom mode of a heartbeat
    ///
    /// The main mode sits in bits 16..24 and the auto sub mode in bits 24..32.
    pub fn from_px4_custom_mode(custom_mode: u32) -> Self {
        let main_mode = ((custom_mode >> 16) & 0xff) as u8;
        let sub_mode = ((custom_mode >> 24) & 0xff) as u8;

        match Px4MainMode::try_from(main_mode) {
            Ok(Px4MainMode::Manual) => FlightMode::Manual,
            Ok(Px4MainMode::Altctl) => FlightMode::Altctl,
            Ok(Px4MainMode::Posctl) => FlightMode::Posctl,
            Ok(Px4MainMode::Acro) => FlightMode::Acro,
            Ok(Px4MainMode::Offboard) => FlightMode::Offboard,
            Ok(Px4MainMode::Stabilized) => FlightMode::Stabilized,
            Ok(Px4MainMode::Rattitude) => FlightMode::Rattitude,
            Ok(Px4MainMode::Auto) => match Px4AutoSubMode::try_from(sub_mode) {
                Ok(Px4AutoSubMode::Ready) => FlightMode::Ready,
                Ok(Px4AutoSubMode::Takeoff) => FlightMode::Takeoff,
                Ok(Px4AutoSubMode::Loiter) => FlightMode::Hold,
                Ok(Px4AutoSubMode::Mission) => FlightMode::Mission,
                Ok(Px4AutoSubMode::Rtl) => FlightMode::ReturnToLaunch,
                Ok(Px4AutoSubMode::Land) | Ok(Px4AutoSubMode::Precland) => FlightMode::Land,
                Ok(Px4AutoSubMode::FollowTarget) => FlightMode::FollowMe,
                Err(_) => FlightMode::Unknown,
            },
            Err(_) => FlightMode::Unknown,
        }
    }
}

/// Latest decoded values
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TelemetryState {
    pub(crate) armed: bool,
    pub(crate) flight_mode: FlightMode,
    pub(crate) landed_state: LandedState,
    pub(crate) health: Health,
    pub(crate) home_altitude_amsl_m: Option<f32>,
    pub(crate) relative_altitude_m: Option<f32>,
}

impl TelemetryState {
    /// Apply one message from the target system
    ///
    /// Heartbeats from other components of the same system (cameras, gimbals, ...) are ignored.
    pub(crate) fn apply(&mut self, header: &MavHeader, message: &MavMessage, target_component: u8) {
        match message {
            MavMessage::HEARTBEAT(heartbeat) => {
                if header.component_id != target_component
                    || heartbeat.autopilot == MavAutopilot::MAV_AUTOPILOT_INVALID
                {
                    return;
                }
                self.armed = heartbeat.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                self.flight_mode = if heartbeat
                    .base_mode
                    .contains(MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED)
                {
                    FlightMode::from_px4_custom_mode(heartbeat.custom_mode)
                } else {
                    FlightMode::Unknown
                };
            }
            MavMessage::EXTENDED_SYS_STATE(state) => {
                self.landed_state = state.landed_state.into();
            }
            MavMessage::SYS_STATUS(status) => {
                self.health.is_gyrometer_calibration_ok =
                    sensor_ok(status, MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_GYRO);
                self.health.is_accelerometer_calibration_ok =
                    sensor_ok(status, MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_ACCEL);
                self.health.is_magnetometer_calibration_ok =
                    sensor_ok(status, MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG);
            }
            MavMessage::GPS_RAW_INT(gps) => {
                let fixed = gps.fix_type as u32 >= GpsFixType::GPS_FIX_TYPE_3D_FIX as u32;
                self.health.is_local_position_ok = fixed;
                self.health.is_global_position_ok = fixed;
            }
            MavMessage::HOME_POSITION(home) => {
                self.health.is_home_position_ok = true;
                self.home_altitude_amsl_m = Some(home.altitude as f32 / 1000.0);
            }
            MavMessage::GLOBAL_POSITION_INT(position) => {
                self.relative_altitude_m = Some(position.relative_alt as f32 / 1000.0);
            }
            _ => (),
        }
    }

    pub(crate) fn in_air(&self) -> bool {
        matches!(
            self.landed_state,
            LandedState::InAir | LandedState::TakingOff | LandedState::Landing
        )
    }
}

fn sensor_ok(status: &SYS_STATUS_DATA, sensor: MavSysStatusSensor) -> bool {
    status.onboard_control_sensors_present.contains(sensor)
        && status.onboard_control_sensors_enabled.contains(sensor)
        && status.onboard_control_sensors_health.contains(sensor)
}

pub(crate) type SharedState = Arc<Mutex<TelemetryState>>;

pub(crate) fn lock(state: &SharedState) -> MutexGuard<'_, TelemetryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// # Access to the telemetry subsystem
///
/// See the [telemetry module documentation](crate::subsystems::telemetry) for more context and information.
pub struct Telemetry {
    state: SharedState,
    landed_state_broadcast: InactiveReceiver<LandedState>,
    _telemetry_task: JoinHandle<()>,
}

impl Telemetry {
    pub(crate) fn new(
        downlink: Receiver<Envelope>,
        target_system: u8,
        target_component: u8,
        disconnect: Arc<AtomicBool>,
    ) -> Self {
        let state: SharedState = Default::default();

        let (mut landed_state_tx, landed_state_rx) = broadcast(16);
        landed_state_tx.set_overflow(true);
        let landed_state_broadcast = landed_state_rx.deactivate();

        let task_state = state.clone();
        let _telemetry_task = tokio::spawn(async move {
            while !disconnect.load(Relaxed) {
                match timeout(Duration::from_millis(200), downlink.recv_async()).await {
                    Ok(Ok((header, message))) => {
                        if header.system_id != target_system {
                            continue;
                        }
                        Self::update(&task_state, &landed_state_tx, &header, &message, target_component);
                    }
                    Err(_) => continue,
                    Ok(Err(_)) => return, // Dispatcher stopped
                }
            }
        });

        Self {
            state,
            landed_state_broadcast,
            _telemetry_task,
        }
    }

    fn update(
        state: &SharedState,
        landed_state_tx: &BroadcastSender<LandedState>,
        header: &MavHeader,
        message: &MavMessage,
        target_component: u8,
    ) {
        let mut state = lock(state);
        let previous = state.landed_state;
        state.apply(header, message, target_component);

        if state.landed_state != previous {
            log::debug!("Landed state {:?} -> {:?}", previous, state.landed_state);
            // Nobody listening is fine
            let _ = landed_state_tx.try_broadcast(state.landed_state);
        }
    }

    pub(crate) fn shared_state(&self) -> SharedState {
        self.state.clone()
    }

    /// Current sensor and estimator health
    pub fn health(&self) -> Health {
        lock(&self.state).health
    }

    /// True when every [Health] check passes
    pub fn health_all_ok(&self) -> bool {
        self.health().is_all_ok()
    }

    /// True when the vehicle is armed
    pub fn armed(&self) -> bool {
        lock(&self.state).armed
    }

    /// True while taking off, flying or landing
    pub fn in_air(&self) -> bool {
        lock(&self.state).in_air()
    }

    /// Current landed state
    pub fn landed_state(&self) -> LandedState {
        lock(&self.state).landed_state
    }

    /// Current flight mode
    pub fn flight_mode(&self) -> FlightMode {
        lock(&self.state).flight_mode
    }

    /// Altitude of the home position above mean sea level, in meters
    pub fn home_altitude_amsl_m(&self) -> Option<f32> {
        lock(&self.state).home_altitude_amsl_m
    }

    /// Altitude above the home position, in meters
    pub fn relative_altitude_m(&self) -> Option<f32> {
        lock(&self.state).relative_altitude_m
    }

    /// Stream of landed states
    ///
    /// The stream starts with the current landed state and then yields every change. It ends when the vehicle
    /// is disconnected.
    pub fn subscribe_landed_state(&self) -> impl Stream<Item = LandedState> {
        // Activate before reading so no change can slip in between
        let mut changes = self.landed_state_broadcast.activate_cloned();
        let current = self.landed_state();

        async_stream::stream! {
            yield current;
            while let Some(state) = changes.next().await {
                yield state;
            }
        }
    }

    /// Wait for the landed state to become `target`
    ///
    /// Returns [Error::Timeout] if this does not happen within `within`.
    pub async fn wait_landed_state(&self, target: LandedState, within: Duration) -> Result<()> {
        let states = self.subscribe_landed_state();
        futures::pin_mut!(states);

        timeout(within, async {
            while let Some(state) = states.next().await {
                if state == target {
                    return Ok(());
                }
            }
            Err(Error::Disconnected)
        })
        .await
        .map_err(|_| Error::Timeout)?
    }
}
