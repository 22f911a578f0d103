//! DNS lookups with a short-lived result cache.
//!
//! [`Resolver`] validates a lookup, picks the name server, consults the
//! [`cache::DnsCache`] and only then hands the query to a [`QueryBackend`].

pub mod backend;
pub mod cache;
pub mod reverse;
pub mod servers;

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub use self::backend::{QueryBackend, TrustDnsBackend};
pub use self::cache::{Clock, DnsCache, LookupKey, ManualClock, SystemClock};

/// Upper bound for a single query against a name server.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a completed lookup (answer or error) stays in the cache.
pub const CACHE_TTL: Duration = Duration::from_secs(60);

/// Used when neither an override nor a system name server is available.
pub const FALLBACK_SERVER: &str = "8.8.8.8:53";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported record type {0:?}")]
    UnsupportedType(String),

    #[error("{0}")]
    ResolutionFailure(String),

    #[error("query failed: {0}")]
    TransientQuery(String),
}

impl DnsError {
    /// Whether a lookup ending in this error is remembered by the cache.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, DnsError::ResolutionFailure(_) | DnsError::TransientQuery(_))
    }
}

/// Record types the dashboard can look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    A,
    AAAA,
    MX,
    NS,
    PTR,
    TXT,
    SRV,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::MX => "MX",
            RecordType::NS => "NS",
            RecordType::PTR => "PTR",
            RecordType::TXT => "TXT",
            RecordType::SRV => "SRV",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "MX" => Ok(RecordType::MX),
            "NS" => Ok(RecordType::NS),
            "PTR" => Ok(RecordType::PTR),
            "TXT" => Ok(RecordType::TXT),
            "SRV" => Ok(RecordType::SRV),
            other => Err(DnsError::UnsupportedType(other.to_string())),
        }
    }
}

/// One answer record, shaped for the JSON API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    /// A / AAAA
    Address { address: String },
    /// MX
    MailExchange { host: String, priority: u16 },
    /// NS / PTR
    Host { host: String },
    /// TXT, character-strings joined
    Text { text: String },
    /// SRV
    Service {
        target: String,
        port: u16,
        priority: u16,
        weight: u16,
    },
}

/// Answer to a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupResult {
    pub server: String,
    pub records: Vec<Record>,
}

/// Caching DNS resolver.
pub struct Resolver<C: Clock = SystemClock> {
    backend: Arc<dyn QueryBackend>,
    cache: DnsCache<C>,
    system_servers: Vec<SocketAddr>,
}

impl Resolver<SystemClock> {
    /// Resolver backed by trust-dns, using the host's configured name servers.
    pub fn from_system() -> Self {
        Self::new(
            Arc::new(TrustDnsBackend::new(QUERY_TIMEOUT)),
            DnsCache::new(CACHE_TTL, SystemClock),
            servers::system_name_servers(),
        )
    }
}

impl<C: Clock> Resolver<C> {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        cache: DnsCache<C>,
        system_servers: Vec<SocketAddr>,
    ) -> Self {
        Self {
            backend,
            cache,
            system_servers,
        }
    }

    pub fn cache(&self) -> &DnsCache<C> {
        &self.cache
    }

    /// Look up `name` as `record_type`, through the cache.
    ///
    /// `record_type` is the raw user string; unknown types fail with
    /// [`DnsError::UnsupportedType`] before anything is cached.
    pub async fn resolve(
        &self,
        name: &str,
        record_type: &str,
        server_override: Option<&str>,
    ) -> Result<LookupResult, DnsError> {
        let record_type: RecordType = record_type.parse()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(DnsError::InvalidInput("name is required".to_string()));
        }

        let query_name = match record_type {
            RecordType::PTR => reverse::ptr_query_name(name)?,
            _ => name.to_string(),
        };
        if servers::is_special_use(&query_name) {
            return Err(DnsError::InvalidInput(format!(
                "{} is a special-use name and is never sent to a name server",
                query_name
            )));
        }
        let server = self.select_server(server_override)?;
        let server_label = server.to_string();
        let key = LookupKey::new(&query_name, record_type, &server_label);

        if let Some(outcome) = self.cache.get(&key) {
            debug!(
                name = %query_name,
                %record_type,
                server = %server_label,
                "dns cache hit"
            );
            return outcome.map(|records| LookupResult {
                server: server_label,
                records,
            });
        }

        debug!(
            name = %query_name,
            %record_type,
            server = %server_label,
            "dns cache miss, querying"
        );
        let outcome = self.backend.query(&query_name, record_type, server).await;

        match &outcome {
            Ok(records) => {
                info!(
                    name = %query_name,
                    %record_type,
                    server = %server_label,
                    answers = records.len(),
                    "dns lookup complete"
                );
                self.cache.insert(key, Ok(records.clone()));
            }
            Err(e) if e.is_cacheable() => {
                info!(
                    name = %query_name,
                    %record_type,
                    server = %server_label,
                    error = %e,
                    "dns lookup failed"
                );
                self.cache.insert(key, Err(e.clone()));
            }
            Err(_) => {}
        }

        outcome.map(|records| LookupResult {
            server: server_label,
            records,
        })
    }

    fn select_server(&self, server_override: Option<&str>) -> Result<SocketAddr, DnsError> {
        if let Some(raw) = server_override.map(str::trim).filter(|s| !s.is_empty()) {
            return servers::parse_server(raw);
        }
        match self.system_servers.first() {
            Some(addr) => Ok(*addr),
            None => servers::parse_server(FALLBACK_SERVER),
        }
    }
}
