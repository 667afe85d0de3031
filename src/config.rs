//! Server configuration.
//!
//! Everything has a default, so `Config::default()` is a working server on
//! `0.0.0.0:8000`. Override programmatically with the fluent setters, or load
//! a TOML file:
//!
//! ```toml
//! addr = "127.0.0.1:8080"
//! read_header_timeout_secs = 5
//! read_timeout_secs = 60
//! write_timeout_secs = 60
//! logging = true
//! metrics = true
//! metric_reset = true
//! metric_reset_interval_secs = 86400
//! metric_reset_offset_secs = 0
//! ```
//!
//! A timeout of zero disables it.
//!
//! The config is moved into the [`Server`](crate::Server) at construction and
//! cannot change once the listener starts.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// When to zero the metric store.
///
/// Resets fire every `interval`, aligned to wall-clock multiples of
/// `interval` shifted by `offset` (counted from the Unix epoch, UTC). The
/// default is once a day at 00:00 UTC.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResetSchedule {
    pub interval: Duration,
    pub offset: Duration,
}

impl ResetSchedule {
    pub fn every(interval: Duration) -> Self {
        Self { interval, offset: Duration::ZERO }
    }

    pub fn offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }
}

impl Default for ResetSchedule {
    fn default() -> Self {
        Self::every(DAY)
    }
}

/// Listener address, timeouts and feature flags.
#[derive(Clone, Debug)]
pub struct Config {
    /// `host:port`. A bare `:port` listens on all interfaces.
    pub addr: String,
    /// Time allowed for a client to send the complete request head. Zero
    /// disables it.
    pub read_header_timeout: Duration,
    /// Time allowed for reading the request body once the head has arrived.
    /// Zero disables it.
    pub read_timeout: Duration,
    /// Deadline for the handler to produce a response. Zero disables it.
    pub write_timeout: Duration,
    pub logging: bool,
    pub metrics: bool,
    /// `None` disables the periodic reset task.
    pub metric_reset: Option<ResetSchedule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: ":8000".to_owned(),
            read_header_timeout: Duration::from_secs(20),
            read_timeout: Duration::from_secs(10 * 60),
            write_timeout: Duration::from_secs(20 * 60),
            logging: true,
            metrics: true,
            metric_reset: Some(ResetSchedule::default()),
        }
    }
}

impl Config {
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn read_header_timeout(mut self, timeout: Duration) -> Self {
        self.read_header_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    pub fn metric_reset(mut self, schedule: Option<ResetSchedule>) -> Self {
        self.metric_reset = schedule;
        self
    }

    /// Reads a TOML config file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&text).map_err(|reason| Error::Config { path: path.to_owned(), reason })
    }

    fn from_toml(text: &str) -> Result<Self, String> {
        let file: ConfigFile = toml::from_str(text).map_err(|e| e.to_string())?;
        file.try_into()
    }
}

/// On-disk shape: durations in whole seconds, reset schedule flattened.
#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    addr: String,
    read_header_timeout_secs: u64,
    read_timeout_secs: u64,
    write_timeout_secs: u64,
    logging: bool,
    metrics: bool,
    metric_reset: bool,
    metric_reset_interval_secs: u64,
    metric_reset_offset_secs: u64,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let config = Config::default();
        let schedule = ResetSchedule::default();
        Self {
            addr: config.addr,
            read_header_timeout_secs: config.read_header_timeout.as_secs(),
            read_timeout_secs: config.read_timeout.as_secs(),
            write_timeout_secs: config.write_timeout.as_secs(),
            logging: config.logging,
            metrics: config.metrics,
            metric_reset: config.metric_reset.is_some(),
            metric_reset_interval_secs: schedule.interval.as_secs(),
            metric_reset_offset_secs: schedule.offset.as_secs(),
        }
    }
}

impl TryFrom<ConfigFile> for Config {
    type Error = String;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let metric_reset = if file.metric_reset {
            if file.metric_reset_interval_secs == 0 {
                return Err("metric_reset_interval_secs must be greater than zero".to_owned());
            }
            Some(
                ResetSchedule::every(Duration::from_secs(file.metric_reset_interval_secs))
                    .offset(Duration::from_secs(file.metric_reset_offset_secs)),
            )
        } else {
            None
        };

        Ok(Self {
            addr: file.addr,
            read_header_timeout: Duration::from_secs(file.read_header_timeout_secs),
            read_timeout: Duration::from_secs(file.read_timeout_secs),
            write_timeout: Duration::from_secs(file.write_timeout_secs),
            logging: file.logging,
            metrics: file.metrics,
            metric_reset,
        })
    }
}

/// `None` for a disabled (zero) timeout.
pub(crate) fn limit(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

/// Normalises `:8000` to `0.0.0.0:8000`; everything else passes through.
pub(crate) fn listen_addr(addr: &str) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_owned(),
    }
}
