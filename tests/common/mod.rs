// In-process simulated autopilot used by the integration tests
//
// Behaves like a PX4 multicopter on the ground: it streams telemetry, acknowledges commands, takes off and lands
// in a few ticks, rejects offboard mode without setpoints and leaves it when setpoints stop.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use automissions::{Link, MissionTiming, Result};
use mavlink::common::{
    GpsFixType, MavAutopilot, MavCmd, MavLandedState, MavMessage, MavModeFlag, MavResult, MavState,
    MavSysStatusSensor, MavType, MavVtolState, COMMAND_ACK_DATA, COMMAND_LONG_DATA, EXTENDED_SYS_STATE_DATA,
    GLOBAL_POSITION_INT_DATA, GPS_RAW_INT_DATA, HEARTBEAT_DATA, HOME_POSITION_DATA,
    SET_POSITION_TARGET_LOCAL_NED_DATA, SYS_STATUS_DATA,
};
use mavlink::MavHeader;

pub const SIM_SYSTEM_ID: u8 = 1;
pub const SIM_COMPONENT_ID: u8 = 1;
pub const HOME_ALTITUDE_MM: i32 = 488_000;

const TICK: Duration = Duration::from_millis(2);
const TRANSITION_TICKS: u32 = 20;
const OFFBOARD_SETPOINT_TIMEOUT: Duration = Duration::from_millis(500);

const MAIN_MODE_AUTO: u8 = 4;
const MAIN_MODE_OFFBOARD: u8 = 6;
const SUB_MODE_READY: u8 = 1;
const SUB_MODE_TAKEOFF: u8 = 2;
const SUB_MODE_LOITER: u8 = 3;
const SUB_MODE_LAND: u8 = 6;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub autopilot: MavAutopilot,
    pub deny_arm: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            autopilot: MavAutopilot::MAV_AUTOPILOT_PX4,
            deny_arm: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimState {
    pub armed: bool,
    pub landed_state: MavLandedState,
    pub main_mode: u8,
    pub sub_mode: u8,
    pub speed_m_s: Option<f32>,
    pub takeoff_altitude_amsl_m: Option<f32>,
    pub commands: Vec<COMMAND_LONG_DATA>,
    pub setpoints: Vec<SET_POSITION_TARGET_LOCAL_NED_DATA>,
    pub gcs_heartbeats: u32,
    tick: u64,
    transition_ticks: u32,
    last_setpoint: Option<Instant>,
}

impl SimState {
    fn new() -> Self {
        Self {
            armed: false,
            landed_state: MavLandedState::MAV_LANDED_STATE_ON_GROUND,
            main_mode: MAIN_MODE_AUTO,
            sub_mode: SUB_MODE_READY,
            speed_m_s: None,
            takeoff_altitude_amsl_m: None,
            commands: Vec::new(),
            setpoints: Vec::new(),
            gcs_heartbeats: 0,
            tick: 0,
            transition_ticks: 0,
            last_setpoint: None,
        }
    }

    pub fn command_ids(&self) -> Vec<MavCmd> {
        self.commands.iter().map(|command| command.command).collect()
    }

    fn setpoints_streaming(&self) -> bool {
        self.last_setpoint
            .map_or(false, |last| last.elapsed() < OFFBOARD_SETPOINT_TIMEOUT)
    }

    fn set_mode(&mut self, main_mode: u8, sub_mode: u8) {
        self.main_mode = main_mode;
        self.sub_mode = sub_mode;
    }

    fn advance(&mut self) {
        self.tick += 1;

        match self.landed_state {
            MavLandedState::MAV_LANDED_STATE_TAKEOFF | MavLandedState::MAV_LANDED_STATE_LANDING => {
                self.transition_ticks += 1;
            }
            _ => return,
        }
        if self.transition_ticks < TRANSITION_TICKS {
            return;
        }

        if self.landed_state == MavLandedState::MAV_LANDED_STATE_TAKEOFF {
            self.landed_state = MavLandedState::MAV_LANDED_STATE_IN_AIR;
            self.set_mode(MAIN_MODE_AUTO, SUB_MODE_LOITER);
        } else {
            self.landed_state = MavLandedState::MAV_LANDED_STATE_ON_GROUND;
            self.armed = false;
            self.set_mode(MAIN_MODE_AUTO, SUB_MODE_READY);
        }
    }

    fn offboard_failsafe(&mut self) {
        if self.main_mode == MAIN_MODE_OFFBOARD && !self.setpoints_streaming() {
            self.set_mode(MAIN_MODE_AUTO, SUB_MODE_LOITER);
        }
    }

    fn handle_command(&mut self, command: &COMMAND_LONG_DATA, config: &SimConfig) -> MavResult {
        let in_air = self.landed_state != MavLandedState::MAV_LANDED_STATE_ON_GROUND;

        match command.command {
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM if command.param1 == 1.0 => {
                if config.deny_arm {
                    return MavResult::MAV_RESULT_DENIED;
                }
                self.armed = true;
                MavResult::MAV_RESULT_ACCEPTED
            }
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM => {
                if in_air {
                    return MavResult::MAV_RESULT_DENIED;
                }
                self.armed = false;
                MavResult::MAV_RESULT_ACCEPTED
            }
            MavCmd::MAV_CMD_DO_CHANGE_SPEED => {
                self.speed_m_s = Some(command.param2);
                MavResult::MAV_RESULT_ACCEPTED
            }
            MavCmd::MAV_CMD_NAV_TAKEOFF => {
                if !self.armed || in_air {
                    return MavResult::MAV_RESULT_DENIED;
                }
                self.takeoff_altitude_amsl_m = Some(command.param7);
                self.landed_state = MavLandedState::MAV_LANDED_STATE_TAKEOFF;
                self.transition_ticks = 0;
                self.set_mode(MAIN_MODE_AUTO, SUB_MODE_TAKEOFF);
                MavResult::MAV_RESULT_ACCEPTED
            }
            MavCmd::MAV_CMD_DO_SET_MODE => {
                let main_mode = command.param2 as u8;
                if main_mode == MAIN_MODE_OFFBOARD && !self.setpoints_streaming() {
                    return MavResult::MAV_RESULT_DENIED;
                }
                self.set_mode(main_mode, command.param3 as u8);
                MavResult::MAV_RESULT_ACCEPTED
            }
            MavCmd::MAV_CMD_NAV_LAND => {
                if self.landed_state != MavLandedState::MAV_LANDED_STATE_IN_AIR {
                    return MavResult::MAV_RESULT_DENIED;
                }
                self.landed_state = MavLandedState::MAV_LANDED_STATE_LANDING;
                self.transition_ticks = 0;
                self.set_mode(MAIN_MODE_AUTO, SUB_MODE_LAND);
                MavResult::MAV_RESULT_ACCEPTED
            }
            _ => MavResult::MAV_RESULT_UNSUPPORTED,
        }
    }

    fn telemetry(&self, config: &SimConfig) -> MavMessage {
        let sensors = MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_GYRO
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_ACCEL
            | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG;

        match self.tick % 6 {
            0 => {
                let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
                if self.armed {
                    base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
                }
                MavMessage::HEARTBEAT(HEARTBEAT_DATA {
                    custom_mode: ((self.main_mode as u32) << 16) | ((self.sub_mode as u32) << 24),
                    mavtype: MavType::MAV_TYPE_QUADROTOR,
                    autopilot: config.autopilot,
                    base_mode,
                    system_status: if self.armed {
                        MavState::MAV_STATE_ACTIVE
                    } else {
                        MavState::MAV_STATE_STANDBY
                    },
                    mavlink_version: 3,
                })
            }
            1 => MavMessage::EXTENDED_SYS_STATE(EXTENDED_SYS_STATE_DATA {
                vtol_state: MavVtolState::MAV_VTOL_STATE_MC,
                landed_state: self.landed_state,
            }),
            2 => MavMessage::SYS_STATUS(SYS_STATUS_DATA {
                onboard_control_sensors_present: sensors,
                onboard_control_sensors_enabled: sensors,
                onboard_control_sensors_health: sensors,
                ..Default::default()
            }),
            3 => MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA {
                fix_type: GpsFixType::GPS_FIX_TYPE_3D_FIX,
                satellites_visible: 12,
                ..Default::default()
            }),
            4 => MavMessage::HOME_POSITION(HOME_POSITION_DATA {
                altitude: HOME_ALTITUDE_MM,
                ..Default::default()
            }),
            _ => MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
                alt: HOME_ALTITUDE_MM,
                relative_alt: 0,
                ..Default::default()
            }),
        }
    }
}

pub struct SimAutopilot {
    config: SimConfig,
    state: Mutex<SimState>,
    outbox: Mutex<VecDeque<MavMessage>>,
    sequence: AtomicU8,
}

impl SimAutopilot {
    pub fn new(config: SimConfig) -> Arc<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        Arc::new(Self {
            config,
            state: Mutex::new(SimState::new()),
            outbox: Mutex::new(VecDeque::new()),
            sequence: AtomicU8::new(0),
        })
    }

    pub fn state(&self) -> SimState {
        self.state.lock().unwrap().clone()
    }

    fn header(&self) -> MavHeader {
        MavHeader {
            system_id: SIM_SYSTEM_ID,
            component_id: SIM_COMPONENT_ID,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Link for SimAutopilot {
    fn recv(&self) -> Result<(MavHeader, MavMessage)> {
        std::thread::sleep(TICK);

        if let Some(message) = self.outbox.lock().unwrap().pop_front() {
            return Ok((self.header(), message));
        }

        let mut state = self.state.lock().unwrap();
        state.advance();
        state.offboard_failsafe();
        let message = state.telemetry(&self.config);
        drop(state);

        Ok((self.header(), message))
    }

    fn send(&self, _header: &MavHeader, message: &MavMessage) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        match message {
            MavMessage::COMMAND_LONG(command) => {
                let result = state.handle_command(command, &self.config);
                state.commands.push(command.clone());
                self.outbox
                    .lock()
                    .unwrap()
                    .push_back(MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
                        command: command.command,
                        result,
                        ..Default::default()
                    }));
            }
            MavMessage::SET_POSITION_TARGET_LOCAL_NED(setpoint) => {
                state.last_setpoint = Some(Instant::now());
                state.setpoints.push(setpoint.clone());
            }
            MavMessage::HEARTBEAT(heartbeat) if heartbeat.mavtype == MavType::MAV_TYPE_GCS => {
                state.gcs_heartbeats += 1;
            }
            _ => (),
        }

        Ok(())
    }
}

/// Mission timing shrunk so a whole mission flies in well under a second
pub fn fast_timing() -> MissionTiming {
    MissionTiming {
        health_poll_interval: Duration::from_millis(10),
        in_air_timeout: Duration::from_secs(3),
        landing_poll_interval: Duration::from_millis(10),
        settle_delay: Duration::from_millis(20),
        duration_scale: 0.01,
    }
}
