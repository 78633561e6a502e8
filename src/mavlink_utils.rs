//! Various MAVLink utils used by the lib
//!
//! The [Link] trait is public so that the vehicle can be driven over any transport, including in-process
//! simulators. The dispatcher and uplink are private plumbing.

use crate::{Error, Result};
use async_trait::async_trait;
use flume as channel;
use flume::{Receiver, Sender};
use mavlink::common::MavMessage;
use mavlink::{MavConnection, MavHeader};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// System id used by this ground station
pub const GCS_SYSTEM_ID: u8 = 245;
/// Component id used by this ground station (MAV_COMP_ID_MISSIONPLANNER)
pub const GCS_COMPONENT_ID: u8 = 190;

/// A received message together with the header it came with
pub(crate) type Envelope = (MavHeader, MavMessage);

/// Blocking, bidirectional MAVLink message transport
///
/// Implemented for the connections returned by [`mavlink::connect`]. `recv()` is called from a dedicated
/// thread and may block until a message arrives.
pub trait Link: Send + Sync {
    /// Receive the next message
    fn recv(&self) -> Result<(MavHeader, MavMessage)>;
    /// Send one message with the given header
    fn send(&self, header: &MavHeader, message: &MavMessage) -> Result<()>;
}

impl Link for Box<dyn MavConnection<MavMessage> + Send + Sync> {
    fn recv(&self) -> Result<(MavHeader, MavMessage)> {
        Ok(MavConnection::recv(self.as_ref())?)
    }

    fn send(&self, header: &MavHeader, message: &MavMessage) -> Result<()> {
        MavConnection::send(self.as_ref(), header, message)?;
        Ok(())
    }
}

impl<L: Link + ?Sized> Link for Arc<L> {
    fn recv(&self) -> Result<(MavHeader, MavMessage)> {
        self.as_ref().recv()
    }

    fn send(&self, header: &MavHeader, message: &MavMessage) -> Result<()> {
        self.as_ref().send(header, message)
    }
}

struct Subscriber {
    sender: Sender<Envelope>,
    accepts: fn(&MavMessage) -> bool,
}

pub struct MavDispatch {
    link: Arc<dyn Link>,
    subscribers: Vec<Subscriber>,
    disconnect: Arc<AtomicBool>,
}

impl MavDispatch {
    pub fn new(link: Arc<dyn Link>, disconnect: Arc<AtomicBool>) -> Self {
        MavDispatch {
            link,
            subscribers: Vec::new(),
            disconnect,
        }
    }

    /// Every message received after [MavDispatch::run()] is copied to every subscriber
    pub fn subscribe(&mut self) -> Receiver<Envelope> {
        self.subscribe_filtered(|_| true)
    }

    /// Subscribe only to the messages for which `accepts` returns true
    ///
    /// Subscribers that are read only from time to time use this so that their queue holds nothing but the
    /// messages they wait for.
    pub fn subscribe_filtered(&mut self, accepts: fn(&MavMessage) -> bool) -> Receiver<Envelope> {
        let (sender, rx) = channel::unbounded();
        self.subscribers.push(Subscriber { sender, accepts });
        rx
    }

    /// Start the reader thread
    ///
    /// The thread ends on a link error or on the first message received after the disconnect flag is set.
    pub fn run(self) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("mavlink-downlink".to_owned())
            .spawn(move || {
                while !self.disconnect.load(Relaxed) {
                    match self.link.recv() {
                        Ok(envelope) => {
                            // Subscribers that went away are simply skipped
                            for subscriber in &self.subscribers {
                                if (subscriber.accepts)(&envelope.1) {
                                    let _ = subscriber.sender.send(envelope.clone());
                                }
                            }
                        }
                        Err(Error::ProtocolError(reason)) => {
                            log::debug!("Dropping undecodable message: {}", reason);
                        }
                        Err(e) => {
                            log::warn!("Downlink closed: {}", e);
                            return;
                        }
                    }
                }
            })
            .map_err(|e| Error::SystemError(format!("{:?}", e)))
    }
}

/// Start the uplink writer thread
///
/// Messages queued on the returned sender are stamped with the ground station header and written to the link.
pub(crate) fn spawn_uplink(
    link: Arc<dyn Link>,
    disconnect: Arc<AtomicBool>,
) -> Result<(Sender<MavMessage>, JoinHandle<()>)> {
    let (uplink, rx) = channel::unbounded::<MavMessage>();

    let handle = std::thread::Builder::new()
        .name("mavlink-uplink".to_owned())
        .spawn(move || {
            let mut sequence: u8 = 0;
            while !disconnect.load(Relaxed) {
                match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(message) => {
                        let header = MavHeader {
                            system_id: GCS_SYSTEM_ID,
                            component_id: GCS_COMPONENT_ID,
                            sequence,
                        };
                        sequence = sequence.wrapping_add(1);
                        if let Err(e) = link.send(&header, &message) {
                            log::warn!("Uplink closed: {}", e);
                            return;
                        }
                    }
                    Err(flume::RecvTimeoutError::Timeout) => (),
                    Err(flume::RecvTimeoutError::Disconnected) => return,
                }
            }
        })
        .map_err(|e| Error::SystemError(format!("{:?}", e)))?;

    Ok((uplink, handle))
}

#[async_trait]
pub(crate) trait WaitForMessage {
    /// Wait for the first message for which `filter` returns a value
    ///
    /// When `system_id` is set, messages from other systems are ignored.
    async fn wait_message<T, F>(&self, system_id: Option<u8>, filter: F) -> Result<T>
    where
        T: Send,
        F: FnMut(&MavHeader, &MavMessage) -> Option<T> + Send;
}

#[async_trait]
impl WaitForMessage for channel::Receiver<Envelope> {
    async fn wait_message<T, F>(&self, system_id: Option<u8>, mut filter: F) -> Result<T>
    where
        T: Send,
        F: FnMut(&MavHeader, &MavMessage) -> Option<T> + Send,
    {
        loop {
            let (header, message) = self.recv_async().await.ok().ok_or(Error::Disconnected)?;

            if system_id.map_or(false, |id| id != header.system_id) {
                continue;
            }
            if let Some(value) = filter(&header, &message) {
                return Ok(value);
            }
        }
    }
}
