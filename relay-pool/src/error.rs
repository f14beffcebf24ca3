//! Error taxonomy for per-endpoint failures.
//!
//! Every variant describes one endpoint (or the pool configuration). Fan-out
//! operations contain these errors to the endpoint that produced them and log
//! them instead of returning them to the caller.

use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;

#[derive(Clone)]
pub enum PoolError {
    Connection { address: String, reason: String },
    ConnectTimeout { address: String, timeout: Duration },
    Subscribe { address: String, reason: String },
    Publish { address: String, reason: String },
    InvalidConfig(String),
}

impl PoolError {
    pub fn connection(address: &str, reason: impl Into<String>) -> Self {
        PoolError::Connection {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    pub fn subscribe(address: &str, reason: impl Into<String>) -> Self {
        PoolError::Subscribe {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    pub fn publish(address: &str, reason: impl Into<String>) -> Self {
        PoolError::Publish {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    /// Endpoint address the error belongs to, if any.
    pub fn address(&self) -> Option<&str> {
        match self {
            PoolError::Connection { address, .. }
            | PoolError::ConnectTimeout { address, .. }
            | PoolError::Subscribe { address, .. }
            | PoolError::Publish { address, .. } => Some(address),
            PoolError::InvalidConfig(_) => None,
        }
    }

    /// True for the failures that make an endpoint unavailable for one call.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            PoolError::Connection { .. } | PoolError::ConnectTimeout { .. }
        )
    }
}

impl Debug for PoolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Connection { address, reason } => {
                write!(f, "Connection({address:?}, {reason:?})")
            }
            PoolError::ConnectTimeout { address, timeout } => {
                write!(f, "ConnectTimeout({address:?}, {timeout:?})")
            }
            PoolError::Subscribe { address, reason } => {
                write!(f, "Subscribe({address:?}, {reason:?})")
            }
            PoolError::Publish { address, reason } => {
                write!(f, "Publish({address:?}, {reason:?})")
            }
            PoolError::InvalidConfig(reason) => write!(f, "InvalidConfig({reason:?})"),
        }
    }
}

impl Display for PoolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Connection { address, reason } => {
                write!(f, "Failed to connect to {address}: {reason}")
            }
            PoolError::ConnectTimeout { address, timeout } => {
                write!(
                    f,
                    "Connecting to {address} timed out after {} ms",
                    timeout.as_millis()
                )
            }
            PoolError::Subscribe { address, reason } => {
                write!(f, "Failed to open subscription on {address}: {reason}")
            }
            PoolError::Publish { address, reason } => {
                write!(f, "Publish rejected by {address}: {reason}")
            }
            PoolError::InvalidConfig(reason) => write!(f, "Invalid pool configuration: {reason}"),
        }
    }
}

impl Error for PoolError {}
