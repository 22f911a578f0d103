use std::sync::Arc;

use crate::dns::Resolver;
use crate::probes::{HostLookup, ProbeLauncher};
use crate::settings::SettingsStore;

/// Shared handles for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<Resolver>,
    pub launcher: Arc<ProbeLauncher>,
    pub lookup: Arc<dyn HostLookup>,
    pub settings: Arc<SettingsStore>,
}
