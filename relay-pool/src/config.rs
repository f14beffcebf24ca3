//! Pool-wide timeout configuration.

use crate::error::PoolError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_EOSE_TIMEOUT: Duration = Duration::from_millis(3400);
pub const DEFAULT_GET_TIMEOUT: Duration = Duration::from_millis(3400);

/// Share of the query timeout granted to a single connect attempt, in percent.
const CONNECT_TIMEOUT_PERCENT: u32 = 90;

/// Timeouts applied by every merged subscription and point query of a pool.
///
/// Only constructible through validating constructors, so both timeouts are
/// always non-zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    eose_timeout: Duration,
    get_timeout: Duration,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolConfigFile {
    eose_timeout_ms: Option<u64>,
    get_timeout_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            eose_timeout: DEFAULT_EOSE_TIMEOUT,
            get_timeout: DEFAULT_GET_TIMEOUT,
        }
    }
}

impl PoolConfig {
    pub fn new(eose_timeout: Duration, get_timeout: Duration) -> Result<Self, PoolError> {
        let config = Self {
            eose_timeout,
            get_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON document such as `{"eose_timeout_ms": 2000}`. Absent keys keep defaults.
    pub fn from_json_str(json: &str) -> Result<Self, PoolError> {
        let file: PoolConfigFile = serde_json::from_str(json).map_err(|error| {
            PoolError::InvalidConfig(format!("Unable to parse JSON: {error}"))
        })?;

        let mut config = Self::default();
        if let Some(ms) = file.eose_timeout_ms {
            config.eose_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.get_timeout_ms {
            config.get_timeout = Duration::from_millis(ms);
        }
        config.validate()?;

        debug!(?config, "parsed pool configuration");
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PoolError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|error| {
            PoolError::InvalidConfig(format!("Unable to read {}: {error}", path.display()))
        })?;
        Self::from_json_str(&data)
    }

    /// Upper bound between subscription start and the merged terminal signal.
    pub fn eose_timeout(&self) -> Duration {
        self.eose_timeout
    }

    /// Upper bound for [`crate::RelayPool::fetch_one`].
    pub fn get_timeout(&self) -> Duration {
        self.get_timeout
    }

    /// Connect timeouts handed to every endpoint the registry creates.
    ///
    /// A connect attempt gets 90% of the query timeout so it fails before a
    /// caller's own timeout would.
    pub fn connect_timeouts(&self) -> ConnectTimeouts {
        let connect = self.get_timeout * CONNECT_TIMEOUT_PERCENT / 100;
        ConnectTimeouts {
            connect,
            handshake: connect,
        }
    }

    fn validate(&self) -> Result<(), PoolError> {
        if self.eose_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "eose_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.get_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "get_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection timeouts for one endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectTimeouts {
    pub connect: Duration,
    pub handshake: Duration,
}
