//! Server endpoints — the thing the registry registers and discovers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the scheduler a registered endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Supervisor,
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supervisor => write!(f, "supervisor"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supervisor" => Ok(Self::Supervisor),
            "worker" => Ok(Self::Worker),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// `host:port` plus the bookkeeping the dispatcher and RPC fabric need.
///
/// Ordered over `(role, group, host, port)` so discovery snapshots are a
/// stable, sorted list — required for `ROUND_ROBIN`/`CONSISTENT_HASH`
/// routing to make consistent choices across supervisor replicas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub role: Role,
    pub host: String,
    pub port: u16,
    /// Worker group. `None` for supervisors (they aren't grouped).
    pub group: Option<String>,
    /// HTTP path prefix a worker's RPC routes are mounted under.
    pub context_path: Option<String>,
}

impl ServerEndpoint {
    pub fn new(role: Role, host: impl Into<String>, port: u16) -> Self {
        Self {
            role,
            host: host.into(),
            port,
            group: None,
            context_path: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_context_path(mut self, path: impl Into<String>) -> Self {
        self.context_path = Some(path.into());
        self
    }

    /// `host:port` — the key used in sorted sets and lock tables.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL this endpoint's RPC routes are served at.
    pub fn base_url(&self) -> String {
        match &self.context_path {
            Some(path) if !path.is_empty() => format!("http://{}{}", self.address(), path),
            _ => format!("http://{}", self.address()),
        }
    }

    /// Serialize to the wire format used on registry pub/sub channels:
    /// `host:port|group|contextPath` (empty fields omitted between pipes).
    pub fn to_wire(&self) -> String {
        format!(
            "{}|{}|{}",
            self.address(),
            self.group.as_deref().unwrap_or(""),
            self.context_path.as_deref().unwrap_or(""),
        )
    }

    /// Parse the wire format produced by [`Self::to_wire`].
    pub fn from_wire(role: Role, s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, '|');
        let addr = parts.next()?;
        let (host, port) = addr.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        let group = parts.next().filter(|s| !s.is_empty()).map(str::to_owned);
        let context_path = parts.next().filter(|s| !s.is_empty()).map(str::to_owned);
        Some(Self {
            role,
            host: host.to_owned(),
            port,
            group,
            context_path,
        })
    }
}

/// A change the registry observed in the peer set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    Registered(ServerEndpoint),
    Deregistered(ServerEndpoint),
}
