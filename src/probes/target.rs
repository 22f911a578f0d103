//! Turning a probe target into the single address the probe will hit.

use std::net::IpAddr;

use async_trait::async_trait;
use tracing::debug;

use super::{Family, ProbeError};

/// The one address a probe session targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTarget(IpAddr);

impl ResolvedTarget {
    pub fn new(ip: IpAddr) -> Self {
        Self(ip)
    }

    pub fn is_ipv6(&self) -> bool {
        self.0.is_ipv6()
    }
}

impl std::fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Host-name to address lookup, as the operating system sees it.
#[async_trait]
pub trait HostLookup: Send + Sync {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// Uses the platform resolver (hosts file, search domains, ...).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

#[async_trait]
impl HostLookup for SystemLookup {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Resolve `target` to one address of the requested family.
pub async fn resolve_target(
    target: &str,
    family: Family,
    lookup: &dyn HostLookup,
) -> Result<ResolvedTarget, ProbeError> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return pick(&[ip], family, target);
    }

    let ips = lookup
        .lookup(target)
        .await
        .map_err(|e| ProbeError::ResolutionFailure(format!("{}: {}", target, e)))?;
    debug!(%target, %family, candidates = ips.len(), "resolved probe target");
    pick(&ips, family, target)
}

fn pick(ips: &[IpAddr], family: Family, target: &str) -> Result<ResolvedTarget, ProbeError> {
    let chosen = match family {
        Family::Ipv4 => ips.iter().find(|ip| ip.is_ipv4()),
        Family::Ipv6 => ips.iter().find(|ip| ip.is_ipv6()),
        Family::Auto => ips.iter().find(|ip| ip.is_ipv4()).or_else(|| ips.first()),
    };
    chosen.copied().map(ResolvedTarget).ok_or_else(|| {
        ProbeError::ResolutionFailure(format!("no {} address for {}", family, target))
    })
}
