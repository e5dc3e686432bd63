//! Key/value configuration.
//!
//! Configuration files hold one `KEY=VALUE` pair per line. Blank lines and
//! lines starting with `#` are ignored, as are lines without a `=`. Values run
//! to the end of the line and may themselves contain `=`.
//!
//! ```text
//! # server
//! NET_SERVER_PORT=7070
//! NET_SERVER_USING_THREAD_POOL=TRUE
//! NET_SERVER_THREAD_POOL=8
//! ```
use std::{
    collections::BTreeMap,
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use log::debug;
use thiserror::Error;

use crate::{
    env::Environment,
    protocol::{DEFAULT_MAX_LENGTH, DecodeOptions, UnknownTagPolicy},
};

pub const DEFAULT_CONFIG_FILE: &str = "config_netcore.txt";

pub const SERVER_ADDRESS: &str = "NET_SERVER_ADDRESS";
pub const SERVER_PORT: &str = "NET_SERVER_PORT";
pub const SERVER_LISTENER: &str = "NET_SERVER_LISTENER";
pub const SERVER_THREAD_POOL: &str = "NET_SERVER_THREAD_POOL";
pub const SERVER_USING_THREAD_POOL: &str = "NET_SERVER_USING_THREAD_POOL";
pub const SERVER_MAX_CONNECTIONS: &str = "NET_SERVER_MAX_CONNECTIONS";
pub const CLIENT_ADDRESS: &str = "NET_CLIENT_ADDRESS";
pub const CLIENT_PORT: &str = "NET_CLIENT_PORT";
pub const SOCKET_TIMEOUT_SECS: &str = "NET_SOCKET_TIMEOUT_SECS";
pub const MSG_SKIP_UNKNOWN_TAGS: &str = "NET_MSG_SKIP_UNKNOWN_TAGS";
pub const MSG_MAX_LENGTH: &str = "NET_MSG_MAX_LENGTH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't open config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("missing required value for {0}")]
    Missing(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&contents))
    }

    /// Loads `<root>/config/<file>`, or the default file name when `file` is `None`.
    pub fn from_env(env: &Environment, file: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(
            env.config_dir()
                .join(file.unwrap_or(DEFAULT_CONFIG_FILE)),
        )
    }

    pub fn parse(contents: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in contents.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    values.insert(key.to_string(), value.to_string());
                }
                None => debug!("skipping config line without '=': {line}"),
            }
        }
        Self { values }
    }

    /// Value for `key`, or an empty string when absent.
    pub fn get_value(&self, key: &str) -> String {
        self.values.get(key).cloned().unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Parses `key` when present, falling back to `default` otherwise.
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    /// Only the literal `TRUE` (any case) turns a flag on.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("TRUE"))
    }

    fn timeout(&self) -> Result<Option<Duration>, ConfigError> {
        let secs: u64 = self.parse_or(SOCKET_TIMEOUT_SECS, 0)?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }

    fn decode_options(&self) -> Result<DecodeOptions, ConfigError> {
        let unknown_tags = if self.flag(MSG_SKIP_UNKNOWN_TAGS) {
            UnknownTagPolicy::Skip
        } else {
            UnknownTagPolicy::Reject
        };
        Ok(DecodeOptions {
            unknown_tags,
            max_length: self.parse_or(MSG_MAX_LENGTH, DEFAULT_MAX_LENGTH)?,
        })
    }
}

/// How accepted connections are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Bounded: connections queue for one of `threads` workers.
    Pool { threads: usize },
    /// Unbounded: one new thread per connection.
    ThreadPerConnection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub address: SocketAddr,
    pub backlog: i32,
    pub dispatch: Dispatch,
    /// Connections beyond this count are closed right after accept.
    pub max_connections: Option<usize>,
    pub socket_timeout: Option<Duration>,
    pub decode: DecodeOptions,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            backlog: 128,
            dispatch: Dispatch::Pool { threads: 4 },
            max_connections: None,
            socket_timeout: None,
            decode: DecodeOptions::default(),
        }
    }
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let ip: IpAddr = config.parse_or(SERVER_ADDRESS, defaults.address.ip())?;
        let port: u16 = config.parse_or(SERVER_PORT, 0)?;

        let threads: usize = config.parse_or(SERVER_THREAD_POOL, 4)?;
        if threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: SERVER_THREAD_POOL.to_string(),
                value: "0".to_string(),
            });
        }
        let dispatch = if config.flag(SERVER_USING_THREAD_POOL) {
            Dispatch::Pool { threads }
        } else {
            Dispatch::ThreadPerConnection
        };

        let max: usize = config.parse_or(SERVER_MAX_CONNECTIONS, 0)?;
        Ok(Self {
            address: SocketAddr::new(ip, port),
            backlog: config.parse_or(SERVER_LISTENER, defaults.backlog)?,
            dispatch,
            max_connections: (max > 0).then_some(max),
            socket_timeout: config.timeout()?,
            decode: config.decode_options()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// `host:port`, resolved at connect time.
    pub address: String,
    pub socket_timeout: Option<Duration>,
    pub decode: DecodeOptions,
}

impl ClientSettings {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            socket_timeout: None,
            decode: DecodeOptions::default(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let host = config
            .get(CLIENT_ADDRESS)
            .ok_or_else(|| ConfigError::Missing(CLIENT_ADDRESS.to_string()))?;
        if config.get(CLIENT_PORT).is_none() {
            return Err(ConfigError::Missing(CLIENT_PORT.to_string()));
        }
        let port: u16 = config.parse_or(CLIENT_PORT, 0)?;
        Ok(Self {
            address: format!("{}:{port}", host.trim()),
            socket_timeout: config.timeout()?,
            decode: config.decode_options()?,
        })
    }
}
