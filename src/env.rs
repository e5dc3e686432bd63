use std::{
    env,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// Process variable naming the installation root.
pub const HOME_VAR: &str = "NETCORE_HOME";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),
}

/// Directory layout rooted at `$NETCORE_HOME`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    root: PathBuf,
}

impl Environment {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_env() -> Result<Self, EnvError> {
        Self::from_var(env::var_os(HOME_VAR))
    }

    fn from_var(value: Option<std::ffi::OsString>) -> Result<Self, EnvError> {
        match value {
            Some(root) if !root.is_empty() => Ok(Self::new(root)),
            _ => Err(EnvError::Missing(HOME_VAR)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }
}
