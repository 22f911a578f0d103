//! Network side of a lookup.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use trust_dns_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::op::ResponseCode;
use trust_dns_resolver::proto::rr::{RData, RecordType as WireType};
use trust_dns_resolver::TokioAsyncResolver;

use super::{DnsError, Record, RecordType};

/// Performs one uncached query against one name server.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn query(
        &self,
        name: &str,
        record_type: RecordType,
        server: SocketAddr,
    ) -> Result<Vec<Record>, DnsError>;
}

/// trust-dns backed query against a single UDP name server.
pub struct TrustDnsBackend {
    timeout: Duration,
}

impl TrustDnsBackend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn resolver_for(&self, server: SocketAddr) -> TokioAsyncResolver {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(server, Protocol::Udp));

        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 1;
        opts.use_hosts_file = false;

        TokioAsyncResolver::tokio(config, opts)
    }
}

impl Default for TrustDnsBackend {
    fn default() -> Self {
        Self::new(super::QUERY_TIMEOUT)
    }
}

#[async_trait]
impl QueryBackend for TrustDnsBackend {
    async fn query(
        &self,
        name: &str,
        record_type: RecordType,
        server: SocketAddr,
    ) -> Result<Vec<Record>, DnsError> {
        let resolver = self.resolver_for(server);
        let fqdn = fully_qualified(name);

        let lookup = tokio::time::timeout(
            self.timeout,
            resolver.lookup(fqdn.as_str(), wire_type(record_type)),
        )
        .await
        .map_err(|_| DnsError::TransientQuery("timeout".to_string()))?;

        match lookup {
            Ok(answer) => Ok(answer.iter().filter_map(convert).collect()),
            Err(e) => classify_error(e),
        }
    }
}

fn fully_qualified(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

fn wire_type(record_type: RecordType) -> WireType {
    match record_type {
        RecordType::A => WireType::A,
        RecordType::AAAA => WireType::AAAA,
        RecordType::MX => WireType::MX,
        RecordType::NS => WireType::NS,
        RecordType::PTR => WireType::PTR,
        RecordType::TXT => WireType::TXT,
        RecordType::SRV => WireType::SRV,
    }
}

/// Answer sections can carry CNAMEs and other extras; only the asked-for
/// shapes survive.
fn convert(rdata: &RData) -> Option<Record> {
    match rdata {
        RData::A(a) => Some(Record::Address {
            address: a.0.to_string(),
        }),
        RData::AAAA(aaaa) => Some(Record::Address {
            address: aaaa.0.to_string(),
        }),
        RData::MX(mx) => Some(Record::MailExchange {
            host: mx.exchange().to_string(),
            priority: mx.preference(),
        }),
        RData::NS(ns) => Some(Record::Host {
            host: ns.0.to_string(),
        }),
        RData::PTR(ptr) => Some(Record::Host {
            host: ptr.0.to_string(),
        }),
        RData::TXT(txt) => Some(Record::Text {
            text: txt
                .txt_data()
                .iter()
                .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                .collect::<Vec<_>>()
                .join(""),
        }),
        RData::SRV(srv) => Some(Record::Service {
            target: srv.target().to_string(),
            port: srv.port(),
            priority: srv.priority(),
            weight: srv.weight(),
        }),
        _ => None,
    }
}

fn classify_error(e: ResolveError) -> Result<Vec<Record>, DnsError> {
    match e.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => {
            classify_response_code(*response_code)
        }
        ResolveErrorKind::Timeout => Err(DnsError::TransientQuery("timeout".to_string())),
        _ => Err(DnsError::TransientQuery(e.to_string())),
    }
}

fn classify_response_code(code: ResponseCode) -> Result<Vec<Record>, DnsError> {
    match code {
        ResponseCode::NoError => Ok(Vec::new()),
        ResponseCode::NXDomain => Err(DnsError::ResolutionFailure("NXDOMAIN".to_string())),
        other => Err(DnsError::ResolutionFailure(other.to_string())),
    }
}
