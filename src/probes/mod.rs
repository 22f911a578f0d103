//! Live reachability probes.
//!
//! A probe runs the host's `ping` as a child process. Its output is
//! classified line by line by the [`parser::OutputParser`] for the host
//! [`dialect::Dialect`], streamed as [`ReplyEvent`]s by a
//! [`session::ProbeSession`], and closed off with one [`SummaryEvent`] built
//! by [`summary::aggregate`] once the process has exited.

pub mod dialect;
pub mod launcher;
pub mod parser;
pub mod session;
pub mod summary;
pub mod target;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::dialect::Dialect;
pub use self::launcher::ProbeLauncher;
pub use self::session::{EventSink, ProbeSession, SessionOutcome, SinkClosed};
pub use self::target::{HostLookup, ResolvedTarget, SystemLookup};

/// Round-trip value reported when there was no successful measurement.
pub const NO_RTT: f64 = -1.0;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cannot resolve target: {0}")]
    ResolutionFailure(String),

    #[error("failed to start probe: {0}")]
    Launch(String),

    #[error("streaming unsupported")]
    StreamUnsupported,
}

/// Address family preference for a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    #[default]
    Auto,
    #[serde(alias = "v4", alias = "4")]
    Ipv4,
    #[serde(alias = "v6", alias = "6")]
    Ipv6,
}

impl FromStr for Family {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Family::Auto),
            "ipv4" | "v4" | "4" => Ok(Family::Ipv4),
            "ipv6" | "v6" | "6" => Ok(Family::Ipv6),
            other => Err(ProbeError::InvalidInput(format!(
                "unknown address family {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Auto => write!(f, "auto"),
            Family::Ipv4 => write!(f, "ipv4"),
            Family::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// Knobs a caller may set on a probe. Unset fields leave the tool's default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeOptions {
    pub count: Option<u32>,
    /// Payload size in bytes.
    pub size: Option<u32>,
    /// Seconds between packets.
    pub interval: Option<f64>,
    pub ttl: Option<u8>,
    #[serde(default)]
    pub no_fragment: bool,
}

impl ProbeOptions {
    pub fn validate(&self) -> Result<(), ProbeError> {
        if let Some(count) = self.count {
            if !(1..=1000).contains(&count) {
                return Err(ProbeError::InvalidInput(format!(
                    "count must be between 1 and 1000, got {}",
                    count
                )));
            }
        }
        if let Some(size) = self.size {
            if size > 65_500 {
                return Err(ProbeError::InvalidInput(format!(
                    "size must be at most 65500 bytes, got {}",
                    size
                )));
            }
        }
        if let Some(interval) = self.interval {
            if !interval.is_finite() || interval <= 0.0 {
                return Err(ProbeError::InvalidInput(format!(
                    "interval must be a positive number of seconds, got {}",
                    interval
                )));
            }
        }
        if self.ttl == Some(0) {
            return Err(ProbeError::InvalidInput("ttl must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// A probe as requested by a client, before resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub target: String,
    pub family: Family,
    pub options: ProbeOptions,
}

impl ProbeRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            family: Family::Auto,
            options: ProbeOptions::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ProbeError> {
        validate_target(&self.target)?;
        self.options.validate()
    }
}

/// Host names and IP literals only; nothing that could read as a flag.
pub fn validate_target(target: &str) -> Result<(), ProbeError> {
    if target.is_empty() {
        return Err(ProbeError::InvalidInput("target cannot be empty".to_string()));
    }
    if target.starts_with('-') {
        return Err(ProbeError::InvalidInput(
            "target cannot start with a hyphen".to_string(),
        ));
    }
    if target
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | ':' | '_'))
    {
        return Err(ProbeError::InvalidInput(format!(
            "target contains invalid characters: {:?}",
            target
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Received,
    Timeout,
    Unreachable,
    Failure,
}

/// One per-packet observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEvent {
    pub seq: u32,
    pub ttl: u8,
    /// Milliseconds, or [`NO_RTT`].
    pub time: f64,
    pub status: ReplyStatus,
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// End-of-run statistics. Fields the tool did not report stay zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryEvent {
    pub sent: u32,
    pub recv: u32,
    pub loss: f64,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ProbeEvent {
    Reply(ReplyEvent),
    Summary(SummaryEvent),
}

impl ProbeEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            ProbeEvent::Reply(_) => "reply",
            ProbeEvent::Summary(_) => "summary",
        }
    }
}
