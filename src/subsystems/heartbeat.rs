//! # Ground station heartbeat
//!
//! The autopilot monitors the heartbeat of the ground station to detect a lost data link. A `MAV_TYPE_GCS`
//! heartbeat is sent every [HEARTBEAT_PERIOD] for as long as the vehicle is connected.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use flume::Sender;
use mavlink::common::{MavAutopilot, MavMessage, MavModeFlag, MavState, MavType, HEARTBEAT_DATA};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

/// Period of the ground station heartbeat
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

pub(crate) fn gcs_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

pub(crate) fn spawn_heartbeat(uplink: Sender<MavMessage>, disconnect: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(HEARTBEAT_PERIOD);
        while !disconnect.load(Relaxed) {
            ticker.tick().await;
            if uplink.send_async(gcs_heartbeat()).await.is_err() {
                return;
            }
        }
    })
}
