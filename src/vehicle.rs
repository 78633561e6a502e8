use crate::connection_url::ConnectionUrl;
use crate::mavlink_utils::{spawn_uplink, Link, MavDispatch, WaitForMessage};
use crate::subsystems::action::Action;
use crate::subsystems::command::CommandSender;
use crate::subsystems::heartbeat::spawn_heartbeat;
use crate::subsystems::offboard::Offboard;
use crate::subsystems::telemetry::Telemetry;
use crate::{Error, Result};
use futures::lock::Mutex;
use mavlink::common::{MavAutopilot, MavMessage};
use mavlink::{MavConnection, MavlinkVersion};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

/// Time to wait for an autopilot heartbeat when connecting, if not specified otherwise
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// # The Vehicle
///
/// A `Vehicle` is one MAVLink session with one autopilot. It starts when the autopilot has been discovered and
/// ends on [Vehicle::disconnect()], on drop, or when the link fails. A session is never resumed, connecting again
/// gives a new `Vehicle`.
///
/// See the [automissions crate root documentation](crate) for more context and information.
pub struct Vehicle {
    /// Action subsystem access
    pub action: Action,
    /// Offboard control subsystem access
    pub offboard: Offboard,
    /// Telemetry subsystem access
    pub telemetry: Telemetry,
    system_id: u8,
    component_id: u8,
    uplink_task: Mutex<Option<std::thread::JoinHandle<()>>>,
    heartbeat_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    disconnect: Arc<AtomicBool>,
}

impl Vehicle {
    /// Open a vehicle connection to a given URL
    ///
    /// The URL is parsed with [ConnectionUrl::parse()] and the connection is opened with [Vehicle::connect()].
    pub async fn connect_from_url(url: &str, discovery_timeout: Duration) -> Result<Self> {
        let url = ConnectionUrl::parse(url)?;

        Self::connect(&url, discovery_timeout).await
    }

    /// Open a vehicle connection
    ///
    /// This function opens the MAVLink connection and calls [Vehicle::connect_from_link()] to discover the vehicle.
    ///
    /// An error is returned either if the connection cannot be opened or if no autopilot is discovered in time.
    pub async fn connect(url: &ConnectionUrl, discovery_timeout: Duration) -> Result<Self> {
        let address = url.to_mavlink_address();
        log::debug!("Opening {}", address);

        // Opening a TCP or serial connection blocks
        let connection = tokio::task::spawn_blocking(move || mavlink::connect::<MavMessage>(&address))
            .await?
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", url, e)))?;

        let mut connection: Box<dyn MavConnection<MavMessage> + Send + Sync> = connection;
        connection.set_protocol_version(MavlinkVersion::V2);

        Self::connect_from_link(connection, discovery_timeout).await
    }

    /// Connect a vehicle using an existing link
    ///
    /// Waits for the first heartbeat of a system with an autopilot. That system becomes the target of every
    /// command. Returns [Error::NoAutopilotFound] if none shows up within `discovery_timeout`.
    ///
    /// The link is read by a blocking thread that only checks for the end of the session between two messages.
    /// After a failed discovery on a silent link, that thread keeps the link, and for UDP its bound port, until
    /// one more message arrives. Connecting again to the same UDP port from the same process then fails with
    /// [Error::ConnectionFailed]. Retry on another port or in a new process.
    pub async fn connect_from_link(link: impl Link + 'static, discovery_timeout: Duration) -> Result<Self> {
        let disconnect = Arc::new(AtomicBool::new(false));
        let link: Arc<dyn Link> = Arc::new(link);

        // Downlink dispatcher
        let mut dispatcher = MavDispatch::new(link.clone(), disconnect.clone());
        let discovery_downlink = dispatcher.subscribe();
        let telemetry_downlink = dispatcher.subscribe();
        let command_downlink =
            dispatcher.subscribe_filtered(|message| matches!(message, MavMessage::COMMAND_ACK(_)));

        // Uplink queue
        let (uplink, uplink_task) = spawn_uplink(link, disconnect.clone())?;

        // The reader may stay blocked in the link until the next message, it is not joined on disconnect
        let _dispatch_task = dispatcher.run()?;
        let heartbeat_task = spawn_heartbeat(uplink.clone(), disconnect.clone());

        log::info!("Waiting to discover system...");
        let discovered = tokio::time::timeout(
            discovery_timeout,
            discovery_downlink.wait_message(None, |header, message| match message {
                MavMessage::HEARTBEAT(heartbeat) if heartbeat.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID => {
                    Some((header.system_id, header.component_id))
                }
                _ => None,
            }),
        )
        .await;
        drop(discovery_downlink);

        let (system_id, component_id) = match discovered {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                disconnect.store(true, Relaxed);
                return Err(e);
            }
            Err(_) => {
                disconnect.store(true, Relaxed);
                return Err(Error::NoAutopilotFound);
            }
        };
        log::info!("Discovered autopilot (system {}, component {})", system_id, component_id);

        // Create subsystems
        let telemetry = Telemetry::new(telemetry_downlink, system_id, component_id, disconnect.clone());

        let commands = Arc::new(CommandSender::new(
            uplink.clone(),
            command_downlink,
            system_id,
            component_id,
        ));
        let action = Action::new(commands.clone(), telemetry.shared_state());
        let offboard = Offboard::new(
            commands,
            uplink,
            telemetry.shared_state(),
            system_id,
            component_id,
            disconnect.clone(),
        );

        Ok(Vehicle {
            action,
            offboard,
            telemetry,
            system_id,
            component_id,
            uplink_task: Mutex::new(Some(uplink_task)),
            heartbeat_task: Mutex::new(Some(heartbeat_task)),
            disconnect,
        })
    }

    /// MAVLink system id of the vehicle
    pub fn system_id(&self) -> u8 {
        self.system_id
    }

    /// MAVLink component id of the autopilot
    pub fn component_id(&self) -> u8 {
        self.component_id
    }

    /// Disconnect the vehicle
    ///
    /// The Connection can be ended in two ways: either by dropping the [Vehicle] object or by calling this
    /// disconnect() function. Once this function return, no more message is sent to the vehicle.
    ///
    /// Once disconnected, any methods that uses the communication to the vehicle will return the error
    /// [Error::Disconnected]
    pub async fn disconnect(&self) {
        // Set disconnect to true, will make every background task quit
        self.disconnect.store(true, Relaxed);

        if let Some(heartbeat_task) = self.heartbeat_task.lock().await.take() {
            heartbeat_task.abort();
            let _ = heartbeat_task.await;
        }
        if let Some(uplink_task) = self.uplink_task.lock().await.take() {
            let _ = tokio::task::spawn_blocking(move || uplink_task.join()).await;
        }
    }
}

impl Drop for Vehicle {
    fn drop(&mut self) {
        self.disconnect.store(true, Relaxed);
    }
}
