use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Failures of the persistent telemetry session. None of them are fatal to
/// the link; each one sends it back to connecting.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("unable to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("telemetry read failed: {0}")]
    Read(#[source] io::Error),

    #[error("device closed the telemetry connection")]
    Closed,
}

/// Why a group of telemetry lines was thrown away.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("field {index} ({name}) is not numeric: {value:?}")]
    NotNumeric {
        index: usize,
        name: &'static str,
        value: String,
    },

    #[error("unterminated line exceeded {0} bytes")]
    Overflow(usize),
}

/// Local failure to hand a relay command to the network.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("unable to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("could not write command: {0}")]
    Write(#[source] io::Error),

    #[error("command not sent within {0:?}")]
    TimedOut(std::time::Duration),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseRelayError {
    #[error("unknown relay target {0:?}, expected one of HOME, BATTERY, GRID, AUTO")]
    Target(String),

    #[error("unknown relay action {0:?}, expected TOGGLE")]
    Action(String),
}
