use std::fmt;

use mavlink::common::{MavCmd, MavMessage, MavResult};
use mavlink::error::{MessageReadError, MessageWriteError};

use crate::mission::MissionStep;

/// [Result] alias for return types of the crate API
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum type
#[derive(Debug)]
pub enum Error {
    /// The connection URL could not be understood. The String contains the reason.
    InvalidConnectionUrl(String),
    /// The MAVLink connection could not be opened. The String contains the reason.
    ConnectionFailed(String),
    /// I/O error on an open link.
    LinkError(std::io::Error),
    /// A malformed or unknown message was received. The String contains the reason.
    ProtocolError(String),
    /// No system with an autopilot sent a heartbeat within the discovery timeout.
    NoAutopilotFound,
    /// The vehicle object is currently disconnected.
    Disconnected,
    /// Operation timed out waiting for response.
    Timeout,
    /// The autopilot temporarily rejected the command.
    Busy(MavCmd),
    /// The autopilot denied the command.
    CommandDenied(MavCmd),
    /// The autopilot does not support the command.
    Unsupported(MavCmd),
    /// The autopilot acknowledged the command with a failure result.
    CommandFailed {
        /// Command that was sent
        command: MavCmd,
        /// Result carried by the acknowledgement
        result: MavResult,
    },
    /// Offboard mode cannot start before a setpoint has been set.
    NoSetpointSet,
    /// An argument is out of its valid range. The String contains the reason.
    InvalidArgument(String),
    /// Error spawning or joining a background task.
    SystemError(String),
    /// A mission step failed.
    Mission {
        /// Step of the mission that failed
        step: MissionStep,
        /// Underlying error
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn in_step(self, step: MissionStep) -> Self {
        Error::Mission {
            step,
            source: Box::new(self),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConnectionUrl(reason) => write!(f, "invalid connection URL: {}", reason),
            Error::ConnectionFailed(reason) => write!(f, "connection failed: {}", reason),
            Error::LinkError(e) => write!(f, "link error: {}", e),
            Error::ProtocolError(reason) => write!(f, "protocol error: {}", reason),
            Error::NoAutopilotFound => f.write_str("no autopilot found"),
            Error::Disconnected => f.write_str("disconnected"),
            Error::Timeout => f.write_str("timeout"),
            Error::Busy(command) => write!(f, "{:?} temporarily rejected", command),
            Error::CommandDenied(command) => write!(f, "{:?} denied", command),
            Error::Unsupported(command) => write!(f, "{:?} unsupported", command),
            Error::CommandFailed { command, result } => write!(f, "{:?} failed with {:?}", command, result),
            Error::NoSetpointSet => f.write_str("no setpoint set"),
            Error::InvalidArgument(reason) => write!(f, "invalid argument: {}", reason),
            Error::SystemError(reason) => write!(f, "system error: {}", reason),
            Error::Mission { step, source } => write!(f, "{}: {}", step, source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::LinkError(e) => Some(e),
            Error::Mission { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::LinkError(error)
    }
}

impl From<MessageReadError> for Error {
    fn from(error: MessageReadError) -> Self {
        match error {
            MessageReadError::Io(e) => Self::LinkError(e),
            other => Self::ProtocolError(other.to_string()),
        }
    }
}

impl From<MessageWriteError> for Error {
    fn from(error: MessageWriteError) -> Self {
        Self::LinkError(std::io::Error::other(error.to_string()))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::SystemError(format!("{}", error))
    }
}

impl From<flume::RecvError> for Error {
    fn from(_: flume::RecvError) -> Self {
        self::Error::Disconnected
    }
}

impl From<flume::SendError<MavMessage>> for Error {
    fn from(_: flume::SendError<MavMessage>) -> Self {
        self::Error::Disconnected
    }
}
