//! # Command protocol
//!
//! Commands are sent to the autopilot as `COMMAND_LONG` messages and acknowledged with `COMMAND_ACK`. A command
//! that is not acknowledged within [ACK_TIMEOUT] is sent again with its confirmation counter incremented, up to
//! [COMMAND_ATTEMPTS] times in total. An `IN_PROGRESS` acknowledgement keeps the command alive without using an
//! attempt.
//!
//! This is used by the [action](crate::subsystems::action) and [offboard](crate::subsystems::offboard)
//! subsystems, it is not exposed directly.

use flume::{Receiver, Sender};
use futures::lock::Mutex;
use mavlink::common::{MavCmd, MavMessage, MavResult, COMMAND_ACK_DATA, COMMAND_LONG_DATA};
use tokio::time::{timeout, Duration};

use crate::mavlink_utils::{Envelope, WaitForMessage, GCS_COMPONENT_ID, GCS_SYSTEM_ID};
use crate::{Error, Result};

/// Time to wait for an acknowledgement before sending again
pub const ACK_TIMEOUT: Duration = Duration::from_millis(500);
/// Number of times a command is sent before giving up
pub const COMMAND_ATTEMPTS: u8 = 3;

pub(crate) struct CommandSender {
    uplink: Sender<MavMessage>,
    downlink: Mutex<Receiver<Envelope>>,
    target_system: u8,
    target_component: u8,
}

impl CommandSender {
    pub(crate) fn new(
        uplink: Sender<MavMessage>,
        downlink: Receiver<Envelope>,
        target_system: u8,
        target_component: u8,
    ) -> Self {
        Self {
            uplink,
            downlink: Mutex::new(downlink),
            target_system,
            target_component,
        }
    }

    /// Send a command and wait for it to be accepted
    ///
    /// Only one command is in flight at a time, concurrent callers are served in turn.
    pub(crate) async fn send_command(&self, command: MavCmd, params: [f32; 7]) -> Result<()> {
        let downlink = self.downlink.lock().await;

        // Anything received while no command was pending is stale
        drop(downlink.drain());

        for confirmation in 0..COMMAND_ATTEMPTS {
            log::debug!("Sending {:?} (confirmation {})", command, confirmation);
            self.uplink
                .send_async(self.command_long(command, params, confirmation))
                .await?;

            loop {
                let ack = timeout(
                    ACK_TIMEOUT,
                    downlink.wait_message(Some(self.target_system), |_, message| match message {
                        MavMessage::COMMAND_ACK(ack) if ack.command == command && addressed_to_us(ack) => {
                            Some(ack.result)
                        }
                        _ => None,
                    }),
                )
                .await;

                match ack {
                    Ok(Ok(MavResult::MAV_RESULT_IN_PROGRESS)) => continue,
                    Ok(Ok(result)) => return ack_result(command, result),
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        log::warn!("No acknowledgement for {:?}, attempt {}", command, confirmation + 1);
                        break;
                    }
                }
            }
        }

        Err(Error::Timeout)
    }

    fn command_long(&self, command: MavCmd, params: [f32; 7], confirmation: u8) -> MavMessage {
        MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
            command,
            target_system: self.target_system,
            target_component: self.target_component,
            confirmation,
        })
    }
}

// Autopilots that leave the target fields at 0 answer whoever sent the command
fn addressed_to_us(ack: &COMMAND_ACK_DATA) -> bool {
    (ack.target_system == 0 || ack.target_system == GCS_SYSTEM_ID)
        && (ack.target_component == 0 || ack.target_component == GCS_COMPONENT_ID)
}

/// Map a final acknowledgement result to the crate result
pub(crate) fn ack_result(command: MavCmd, result: MavResult) -> Result<()> {
    match result {
        MavResult::MAV_RESULT_ACCEPTED => Ok(()),
        MavResult::MAV_RESULT_TEMPORARILY_REJECTED => Err(Error::Busy(command)),
        MavResult::MAV_RESULT_DENIED => Err(Error::CommandDenied(command)),
        MavResult::MAV_RESULT_UNSUPPORTED => Err(Error::Unsupported(command)),
        result => Err(Error::CommandFailed { command, result }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::MavHeader;

    const ARM: MavCmd = MavCmd::MAV_CMD_COMPONENT_ARM_DISARM;

    #[test]
    fn ack_results_map_to_errors() {
        assert!(ack_result(ARM, MavResult::MAV_RESULT_ACCEPTED).is_ok());
        assert!(matches!(
            ack_result(ARM, MavResult::MAV_RESULT_TEMPORARILY_REJECTED),
            Err(Error::Busy(c)) if c == ARM
        ));
        assert!(matches!(
            ack_result(ARM, MavResult::MAV_RESULT_DENIED),
            Err(Error::CommandDenied(c)) if c == ARM
        ));
        assert!(matches!(
            ack_result(ARM, MavResult::MAV_RESULT_UNSUPPORTED),
            Err(Error::Unsupported(c)) if c == ARM
        ));
        assert!(matches!(
            ack_result(ARM, MavResult::MAV_RESULT_FAILED),
            Err(Error::CommandFailed {
                result: MavResult::MAV_RESULT_FAILED,
                ..
            })
        ));
    }

    fn ack(command: MavCmd, result: MavResult) -> Envelope {
        (
            MavHeader {
                system_id: 1,
                component_id: 1,
                sequence: 0,
            },
            MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
                command,
                result,
                ..Default::default()
            }),
        )
    }

    #[tokio::test]
    async fn acknowledged_command_is_sent_once() {
        let (uplink, sent) = flume::unbounded();
        let (acks, downlink) = flume::unbounded();
        let commands = CommandSender::new(uplink, downlink, 1, 1);

        let responder = tokio::spawn(async move {
            let message = sent.recv_async().await.unwrap();
            let MavMessage::COMMAND_LONG(command) = message else {
                panic!("expected COMMAND_LONG, got {:?}", message);
            };
            assert_eq!(command.param1, 1.0);
            assert_eq!(command.target_system, 1);
            acks.send(ack(MavCmd::MAV_CMD_NAV_LAND, MavResult::MAV_RESULT_ACCEPTED)).unwrap();
            acks.send(ack(ARM, MavResult::MAV_RESULT_IN_PROGRESS)).unwrap();
            acks.send(ack(ARM, MavResult::MAV_RESULT_ACCEPTED)).unwrap();
            sent
        });

        commands.send_command(ARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).await.unwrap();

        let sent = responder.await.unwrap();
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn ack_for_another_ground_station_is_ignored() {
        let (uplink, sent) = flume::unbounded();
        let (acks, downlink) = flume::unbounded();
        let commands = CommandSender::new(uplink, downlink, 1, 1);

        let responder = tokio::spawn(async move {
            sent.recv_async().await.unwrap();
            let (header, MavMessage::COMMAND_ACK(mut other)) = ack(ARM, MavResult::MAV_RESULT_DENIED) else {
                unreachable!();
            };
            other.target_system = GCS_SYSTEM_ID + 1;
            other.target_component = GCS_COMPONENT_ID;
            acks.send((header, MavMessage::COMMAND_ACK(other))).unwrap();

            let (header, MavMessage::COMMAND_ACK(mut ours)) = ack(ARM, MavResult::MAV_RESULT_ACCEPTED) else {
                unreachable!();
            };
            ours.target_system = GCS_SYSTEM_ID;
            ours.target_component = GCS_COMPONENT_ID;
            acks.send((header, MavMessage::COMMAND_ACK(ours))).unwrap();
        });

        let result = commands.send_command(ARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).await;
        responder.await.unwrap();

        assert!(result.is_ok());
    }

    #[test]
    fn untargeted_ack_is_ours() {
        let ack = COMMAND_ACK_DATA::default();
        assert!(addressed_to_us(&ack));

        let ack = COMMAND_ACK_DATA {
            target_system: GCS_SYSTEM_ID,
            target_component: GCS_COMPONENT_ID + 1,
            ..Default::default()
        };
        assert!(!addressed_to_us(&ack));
    }

    #[tokio::test]
    async fn unacknowledged_command_times_out_after_all_attempts() {
        let (uplink, sent) = flume::unbounded();
        let (_acks, downlink) = flume::unbounded::<Envelope>();
        let commands = CommandSender::new(uplink, downlink, 1, 1);

        let result = commands.send_command(ARM, [0.0; 7]).await;
        assert!(matches!(result, Err(Error::Timeout)));

        let confirmations: Vec<u8> = sent
            .drain()
            .map(|message| match message {
                MavMessage::COMMAND_LONG(command) => command.confirmation,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(confirmations, vec![0, 1, 2]);
    }
}
