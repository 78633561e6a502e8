//! # Connection URLs
//!
//! Vehicles are addressed with a URL naming the transport:
//!  - `tcp://[server_host][:server_port]` connects to a TCP server, for example a simulator
//!  - `udp://[bind_host][:bind_port]` listens for datagrams, `udp://:14540` is the PX4 SITL default
//!  - `serial:///path/to/serial/dev[:baudrate]` opens a serial port
//!
//! The URL is translated to the address format understood by [`mavlink::connect`].

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Default host of a TCP connection
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";
/// Default port of a TCP connection
pub const DEFAULT_TCP_PORT: u16 = 5760;
/// Default bind host of a UDP connection
pub const DEFAULT_UDP_HOST: &str = "0.0.0.0";
/// Default bind port of a UDP connection
pub const DEFAULT_UDP_PORT: u16 = 14540;
/// Default baudrate of a serial connection
pub const DEFAULT_SERIAL_BAUDRATE: u32 = 57600;

/// A parsed vehicle connection URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUrl {
    /// TCP client connection to `host:port`
    Tcp {
        /// Server host
        host: String,
        /// Server port
        port: u16,
    },
    /// UDP server bound to `host:port`
    Udp {
        /// Bind host
        host: String,
        /// Bind port
        port: u16,
    },
    /// Serial device
    Serial {
        /// Device path, for example `/dev/ttyUSB0`
        path: String,
        /// Line speed
        baudrate: u32,
    },
}

impl ConnectionUrl {
    /// Parse a connection URL
    ///
    /// Missing hosts, ports and baudrates are replaced by the defaults of the scheme.
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid(url, "missing scheme"))?;

        match scheme {
            "tcp" => {
                let (host, port) = split_host_port(url, rest, DEFAULT_TCP_HOST, DEFAULT_TCP_PORT)?;
                Ok(ConnectionUrl::Tcp { host, port })
            }
            "udp" => {
                let (host, port) = split_host_port(url, rest, DEFAULT_UDP_HOST, DEFAULT_UDP_PORT)?;
                Ok(ConnectionUrl::Udp { host, port })
            }
            "serial" => {
                let (path, baudrate) = match rest.rsplit_once(':') {
                    Some((path, baudrate)) => {
                        let baudrate = baudrate
                            .parse()
                            .map_err(|_| invalid(url, "baudrate is not a number"))?;
                        (path, baudrate)
                    }
                    None => (rest, DEFAULT_SERIAL_BAUDRATE),
                };
                if path.is_empty() {
                    return Err(invalid(url, "missing serial device path"));
                }
                Ok(ConnectionUrl::Serial {
                    path: path.to_owned(),
                    baudrate,
                })
            }
            other => Err(invalid(url, &format!("unsupported scheme '{}'", other))),
        }
    }

    /// Address string passed to [`mavlink::connect`]
    pub fn to_mavlink_address(&self) -> String {
        match self {
            ConnectionUrl::Tcp { host, port } => format!("tcpout:{}:{}", host, port),
            ConnectionUrl::Udp { host, port } => format!("udpin:{}:{}", host, port),
            ConnectionUrl::Serial { path, baudrate } => format!("serial:{}:{}", path, baudrate),
        }
    }
}

fn split_host_port(url: &str, rest: &str, default_host: &str, default_port: u16) -> Result<(String, u16)> {
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| invalid(url, "port is not a number"))?;
            (host, port)
        }
        None => (rest, default_port),
    };
    let host = if host.is_empty() { default_host } else { host };

    Ok((host.to_owned(), port))
}

fn invalid(url: &str, reason: &str) -> Error {
    Error::InvalidConnectionUrl(format!("{}: {}", url, reason))
}

impl FromStr for ConnectionUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionUrl::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            ConnectionUrl::Udp { host, port } => write!(f, "udp://{}:{}", host, port),
            ConnectionUrl::Serial { path, baudrate } => write!(f, "serial://{}:{}", path, baudrate),
        }
    }
}
