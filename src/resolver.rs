use crate::config::{self, Settings};
use crate::error::{Result, ScanError};
use crate::traits::NetworkClient;
use crate::types::{ProbeTarget, Scheme, TargetKind};
use std::path::PathBuf;
use tracing::{debug, info, warn};

const TOO_MANY_REQUESTS: u16 = 429;

/// Where candidate targets come from, in the order they are tried.
#[derive(Debug, Clone)]
pub enum TargetSource {
    /// Candidates given directly (e.g. the configured speed domain)
    Inline(Vec<ProbeTarget>),
    /// Local line-oriented list
    File(PathBuf),
    /// Remote line-oriented list, fetched over HTTP
    Remote(String),
    /// List compiled into the binary
    Builtin,
}

impl TargetSource {
    async fn candidates(&self, client: &dyn NetworkClient, scheme: Scheme) -> Result<Vec<ProbeTarget>> {
        match self {
            TargetSource::Inline(targets) => Ok(targets.clone()),
            TargetSource::File(path) => config::read_target_list(path, scheme).await,
            TargetSource::Remote(url) => {
                let content = client.fetch_text(url).await?;
                config::parse_target_list(&content, scheme)
            }
            TargetSource::Builtin => Ok(config::builtin_targets(scheme)),
        }
    }
}

/// Source order for a run: explicit local list, else the configured speed
/// domain; then the remote list; then the built-in list.
pub fn candidate_sources(settings: &Settings, targets_file: Option<PathBuf>) -> Vec<TargetSource> {
    let mut sources = Vec::new();

    match targets_file.or_else(|| settings.targets_file.clone()) {
        Some(path) => sources.push(TargetSource::File(path)),
        None => sources.push(TargetSource::Inline(vec![ProbeTarget::new(
            &settings.speed_domain,
            settings.scheme(),
            TargetKind::Plain,
        )])),
    }
    if let Some(url) = &settings.targets_url {
        sources.push(TargetSource::Remote(url.clone()));
    }
    sources.push(TargetSource::Builtin);
    sources
}

/// Every candidate from every reachable source, first occurrence of a host wins.
pub async fn collect_candidates(
    client: &dyn NetworkClient,
    sources: &[TargetSource],
    scheme: Scheme,
) -> Vec<ProbeTarget> {
    let mut all: Vec<ProbeTarget> = Vec::new();
    for source in sources {
        match source.candidates(client, scheme).await {
            Ok(candidates) => {
                for target in candidates {
                    if !all.iter().any(|t| t.host == target.host) {
                        all.push(target);
                    }
                }
            }
            Err(e) => warn!("Target source {:?} unavailable: {}", source, e),
        }
    }
    all
}

/// Pick the first candidate that answers the liveness GET without a network
/// error and without a 429.
pub async fn resolve_target(
    client: &dyn NetworkClient,
    sources: &[TargetSource],
    scheme: Scheme,
) -> Result<ProbeTarget> {
    let mut tried = 0;

    for source in sources {
        let candidates = match source.candidates(client, scheme).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Target source {:?} unavailable: {}", source, e);
                continue;
            }
        };

        for target in candidates {
            tried += 1;
            match client.check(&target.liveness_url()).await {
                Ok(TOO_MANY_REQUESTS) => {
                    warn!("Target {} is rate limiting (429), trying next", target.host);
                }
                Ok(status) => {
                    info!("Selected probe target {} (status {})", target, status);
                    return Ok(target);
                }
                Err(e) => {
                    debug!("Target {} unreachable: {}", target.host, e);
                }
            }
        }
    }

    Err(ScanError::NoTargetAvailable { tried })
}
