//! Error types for broker operations

use std::time::Duration;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::protocol::response::ResponseCode;

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Failures local to a single connection or registry operation.
///
/// Every variant maps onto exactly one response code, so handlers can answer
/// any failure without knowing where it came from.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Malformed or unparseable frame
    #[error("bad message: {0}")]
    BadMessage(String),

    /// Unknown monitor id
    #[error("there isn't any monitor with id: {0}")]
    NotFound(String),

    /// Network failure while contacting a monitor
    #[error("monitor unreachable: {0}")]
    Unreachable(String),

    /// Socket operation exceeded the connection timeout
    #[error("reached timeout of {:.1} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    /// Unrecognized client command
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Snapshot decode failure or broken invariant
    #[error("{0}")]
    Internal(String),

    /// I/O error on the local connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Response code used to answer this failure on the wire
    pub fn code(&self) -> ResponseCode {
        match self {
            BrokerError::BadMessage(_) => ResponseCode::BadMessage,
            BrokerError::NotFound(_) => ResponseCode::NotFound,
            BrokerError::Unreachable(_) => ResponseCode::Unreachable,
            BrokerError::Timeout(_) => ResponseCode::Timeout,
            BrokerError::UnknownCommand(_) => ResponseCode::UnknownCommand,
            BrokerError::Internal(_) | BrokerError::Io(_) => ResponseCode::Error,
        }
    }
}

impl From<LinesCodecError> for BrokerError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                BrokerError::BadMessage("line too long".to_string())
            }
            LinesCodecError::Io(e) => BrokerError::Io(e),
        }
    }
}

/// Startup configuration errors. These are fatal: the process exits.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the multicast group must be between [{min}-{max}], got {group}")]
    MulticastGroupOutOfRange {
        group: std::net::Ipv4Addr,
        min: std::net::Ipv4Addr,
        max: std::net::Ipv4Addr,
    },

    #[error(
        "data life time ({data_life_time}s) must be at least twice the connection timeout ({connection_timeout}s)"
    )]
    LifeTimeTooShort {
        data_life_time: f64,
        connection_timeout: f64,
    },

    #[error("connection timeout must be a positive number of seconds, got {0}")]
    InvalidTimeout(f64),

    #[error("{name} of {seconds}s is not a representable duration")]
    DurationOutOfRange { name: &'static str, seconds: f64 },

    #[error("monitor port range [{min}-{max}] is empty")]
    EmptyPortRange { min: u16, max: u16 },

    #[error("invalid configuration file: {0}")]
    InvalidFile(String),
}
