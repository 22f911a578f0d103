//! Saved name servers and probe targets.
//!
//! The lists live in the configuration file. Each successful change is
//! written back before the call returns.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::NetdashConfig;
use crate::dns::servers::normalize_server;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("value cannot be empty")]
    Empty,

    #[error("{0} is already saved")]
    Duplicate(String),

    #[error("{0} is not saved")]
    NotFound(String),

    #[error("invalid name server: {0}")]
    InvalidServer(String),

    #[error("failed to save settings: {0}")]
    Persist(String),
}

pub struct SettingsStore {
    config: RwLock<NetdashConfig>,
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(config: NetdashConfig, path: impl Into<PathBuf>) -> Self {
        Self {
            config: RwLock::new(config),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn dns_servers(&self) -> Vec<String> {
        self.config.read().await.dns.custom_servers.clone()
    }

    pub async fn ping_targets(&self) -> Vec<String> {
        self.config.read().await.ping.targets.clone()
    }

    pub async fn add_dns_server(&self, server: &str) -> Result<String, SettingsError> {
        let server = normalize(server)?;
        let mut config = self.config.write().await;
        if config.dns.custom_servers.contains(&server) {
            return Err(SettingsError::Duplicate(server));
        }
        config.dns.custom_servers.push(server.clone());
        self.persist(&config)?;
        info!(%server, "saved name server");
        Ok(server)
    }

    pub async fn remove_dns_server(&self, server: &str) -> Result<String, SettingsError> {
        let server = normalize(server)?;
        let mut config = self.config.write().await;
        let pos = config
            .dns
            .custom_servers
            .iter()
            .position(|s| *s == server)
            .ok_or_else(|| SettingsError::NotFound(server.clone()))?;
        config.dns.custom_servers.remove(pos);
        self.persist(&config)?;
        info!(%server, "removed name server");
        Ok(server)
    }

    pub async fn add_ping_target(&self, target: &str) -> Result<String, SettingsError> {
        let target = non_empty(target)?;
        let mut config = self.config.write().await;
        if config.ping.targets.iter().any(|t| t == target) {
            return Err(SettingsError::Duplicate(target.to_string()));
        }
        config.ping.targets.push(target.to_string());
        self.persist(&config)?;
        info!(%target, "saved probe target");
        Ok(target.to_string())
    }

    pub async fn remove_ping_target(&self, target: &str) -> Result<String, SettingsError> {
        let target = non_empty(target)?;
        let mut config = self.config.write().await;
        let pos = config
            .ping
            .targets
            .iter()
            .position(|t| t == target)
            .ok_or_else(|| SettingsError::NotFound(target.to_string()))?;
        config.ping.targets.remove(pos);
        self.persist(&config)?;
        info!(%target, "removed probe target");
        Ok(target.to_string())
    }

    /// Add servers given on the command line, skipping invalid ones and
    /// ones already saved. Returns how many were added.
    pub async fn merge_dns_servers(&self, servers: &[String]) -> Result<usize, SettingsError> {
        let mut config = self.config.write().await;
        let mut added = 0;
        for raw in servers {
            match normalize(raw) {
                Ok(server) if !config.dns.custom_servers.contains(&server) => {
                    config.dns.custom_servers.push(server);
                    added += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(server = %raw, error = %e, "ignoring name server"),
            }
        }
        if added > 0 {
            self.persist(&config)?;
            info!(added, "merged name servers");
        }
        Ok(added)
    }

    fn persist(&self, config: &NetdashConfig) -> Result<(), SettingsError> {
        config
            .save(&self.path)
            .map_err(|e| SettingsError::Persist(format!("{:#}", e)))
    }
}

fn non_empty(value: &str) -> Result<&str, SettingsError> {
    let value = value.trim();
    if value.is_empty() {
        Err(SettingsError::Empty)
    } else {
        Ok(value)
    }
}

fn normalize(server: &str) -> Result<String, SettingsError> {
    let server = non_empty(server)?;
    normalize_server(server).map_err(|_| SettingsError::InvalidServer(server.to_string()))
}
