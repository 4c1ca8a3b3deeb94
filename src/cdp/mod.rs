//! Typed Chrome DevTools Protocol commands.
//!
//! Only the handful of methods the crate actually issues are modelled. Each
//! command is a `Serialize` params struct tied to its response type through
//! [`Command`], so a mismatched parameter is a compile error rather than a
//! host rejection.

pub mod accessibility;
pub mod browser;
pub mod dom;
pub mod runtime;
pub mod target;

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{NodemarkError, Result};

/// A single CDP method with its params (`Self`) and result type.
pub trait Command: Serialize {
    const METHOD: &'static str;
    type Response: DeserializeOwned;
}

/// Result shape of commands that answer with `{}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Empty {}

/// Protocol version requested at attach time, e.g. `1.3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    pub const DEFAULT: ProtocolVersion = ProtocolVersion { major: 1, minor: 3 };

    /// Whether a host speaking `host` accepts a session requesting `self`.
    pub fn is_supported_by(&self, host: &ProtocolVersion) -> bool {
        self.major == host.major && self.minor <= host.minor
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = NodemarkError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || NodemarkError::ConfigError(format!("Invalid protocol version: {:?}", s));
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = NodemarkError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(value: ProtocolVersion) -> Self {
        value.to_string()
    }
}
