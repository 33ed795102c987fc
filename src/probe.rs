use crate::client::{Payload, Transfer};
use crate::error::{FailureKind, Result, ScanError};
use crate::quota::Quota;
use crate::traits::{NetworkClient, ResultSink};
use crate::types::{Endpoint, Metric, ProbeMode, ProbeResult, ProbeTarget};
use indicatif::ProgressBar;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, trace, warn};

/// Per-probe knobs shared by every probe of a run.
#[derive(Debug, Clone, Copy)]
pub struct ProbeConfig {
    pub mode: ProbeMode,
    pub payload: Payload,
    pub timeout: Duration,
    pub concurrency: usize,
}

/// What happened to one endpoint.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// Succeeded while the quota had room; recorded in the sink.
    Accepted(ProbeResult),
    /// Succeeded, but the quota was already used up by other probes.
    Discarded,
    /// Never sent: the quota was already zero.
    Skipped,
    Rejected(ScanError),
}

/// Tally of the probes scheduled by one `run_batches` call.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub attempted: usize,
    pub skipped: usize,
    pub discarded: usize,
    pub rejected: usize,
    pub target_outages: usize,
    pub accepted: Vec<ProbeResult>,
}

impl BatchReport {
    fn tally(&mut self, outcome: ProbeOutcome) {
        match outcome {
            ProbeOutcome::Accepted(result) => {
                self.attempted += 1;
                self.accepted.push(result);
            }
            ProbeOutcome::Discarded => {
                self.attempted += 1;
                self.discarded += 1;
            }
            ProbeOutcome::Skipped => self.skipped += 1,
            ProbeOutcome::Rejected(e) => {
                self.attempted += 1;
                self.rejected += 1;
                if e.failure_kind() == FailureKind::TargetOutage {
                    self.target_outages += 1;
                }
            }
        }
    }

    fn collect(&mut self, joined: std::result::Result<ProbeOutcome, tokio::task::JoinError>) {
        match joined {
            Ok(outcome) => self.tally(outcome),
            Err(e) => {
                error!("Probe task failed: {}", e);
                self.attempted += 1;
                self.rejected += 1;
            }
        }
    }
}

/// `(bytes * 8) / (seconds * 1e6)`, rounded to two decimals.
pub fn throughput_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    let mbps = (bytes as f64 * 8.0) / (secs * 1_000_000.0);
    (mbps * 100.0).round() / 100.0
}

fn check_status(endpoint: Endpoint, transfer: &Transfer) -> Result<()> {
    match transfer.status {
        200 => Ok(()),
        429 | 500..=599 => Err(ScanError::probe(
            endpoint.addr(),
            FailureKind::TargetOutage,
            format!("target answered {}", transfer.status),
        )),
        status => Err(ScanError::probe(
            endpoint.addr(),
            FailureKind::EndpointRejected,
            format!("status {}", status),
        )),
    }
}

fn rejected(endpoint: Endpoint) -> impl FnOnce(ScanError) -> ScanError {
    move |e| match e {
        ScanError::Probe { .. } => e,
        other => ScanError::probe(endpoint.addr(), FailureKind::EndpointRejected, other.to_string()),
    }
}

/// Runs source-bound probes against one resolved target.
///
/// Cloning is cheap; every clone shares the same quota, sink and
/// concurrency limiter, so the ceiling holds across batches.
#[derive(Clone)]
pub struct Prober {
    client: Arc<dyn NetworkClient>,
    target: Arc<ProbeTarget>,
    quota: Arc<Quota>,
    sink: Arc<dyn ResultSink>,
    limiter: Arc<Semaphore>,
    config: ProbeConfig,
    progress: ProgressBar,
}

impl Prober {
    pub fn new(
        client: Arc<dyn NetworkClient>,
        target: Arc<ProbeTarget>,
        quota: Arc<Quota>,
        sink: Arc<dyn ResultSink>,
        config: ProbeConfig,
    ) -> Self {
        Self {
            client,
            target,
            quota,
            sink,
            limiter: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// Upload (and optionally download) from `endpoint`, under the per-probe timeout.
    async fn measure(&self, endpoint: Endpoint) -> Result<Metric> {
        let bound = self.client.bind(endpoint.addr()).map_err(rejected(endpoint))?;

        let upload = bound
            .upload(&self.target.upload_url(), self.config.payload)
            .await
            .map_err(rejected(endpoint))?;
        check_status(endpoint, &upload)?;

        let download_mbps = match self.config.mode {
            ProbeMode::Upload => None,
            ProbeMode::UploadDownload => {
                let size = self.config.payload.size;
                let download = bound
                    .download(&self.target.download_url(size), size)
                    .await
                    .map_err(rejected(endpoint))?;
                check_status(endpoint, &download)?;
                Some(throughput_mbps(download.bytes, download.elapsed))
            }
        };

        Ok(Metric {
            latency_ms: upload.elapsed.as_millis() as u64,
            upload_mbps: throughput_mbps(upload.bytes, upload.elapsed),
            download_mbps,
        })
    }

    /// Probe a single endpoint. Failures stay local to the endpoint.
    pub async fn probe(&self, endpoint: Endpoint) -> ProbeOutcome {
        if !self.quota.try_reserve() {
            trace!("{} skipped, quota filled", endpoint);
            return ProbeOutcome::Skipped;
        }

        let measured = match tokio::time::timeout(self.config.timeout, self.measure(endpoint)).await {
            Ok(res) => res,
            Err(_) => Err(ScanError::probe(
                endpoint.addr(),
                FailureKind::EndpointRejected,
                format!("timed out after {:?}", self.config.timeout),
            )),
        };
        self.progress.inc(1);

        let metric = match measured {
            Ok(metric) => metric,
            Err(e) => {
                debug!("{}", e);
                return ProbeOutcome::Rejected(e);
            }
        };

        if !self.quota.commit() {
            debug!("{} succeeded after quota was filled, discarding", endpoint);
            return ProbeOutcome::Discarded;
        }

        if let Err(e) = self.sink.record(endpoint).await {
            error!("Failed to record {}: {}", endpoint, e);
            // not kept, so the slot goes back to the next success
            self.quota.release();
            return ProbeOutcome::Rejected(e);
        }
        self.progress.set_message(format!("{}/{} accepted", self.quota.filled(), self.quota.target()));
        debug!(
            "{} accepted: {}ms, up {} Mbps",
            endpoint, metric.latency_ms, metric.upload_mbps
        );
        ProbeOutcome::Accepted(ProbeResult::accepted(endpoint, metric))
    }

    /// Feed batches into one pool of at most `concurrency` probes in flight.
    /// A freed slot takes the next endpoint even when it belongs to the next
    /// batch, and the next batch is only pulled once the current one is
    /// scheduled. Scheduling stops as soon as the quota is filled; probes
    /// already running finish.
    pub async fn run_batches<I>(&self, batches: I) -> BatchReport
    where
        I: IntoIterator<Item = Vec<Endpoint>>,
    {
        let mut report = BatchReport::default();
        let mut tasks = JoinSet::new();

        'batches: for (index, batch) in batches.into_iter().enumerate() {
            if self.quota.is_exhausted() {
                debug!("Quota filled, stopping enumeration before batch {}", index + 1);
                break;
            }
            trace!("Scheduling batch {} ({} endpoints)", index + 1, batch.len());

            let mut pending = batch.into_iter();
            while let Some(endpoint) = pending.next() {
                if self.quota.is_exhausted() {
                    report.skipped += 1 + pending.len();
                    break 'batches;
                }

                let permit = match self.limiter.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!("Concurrency limiter closed: {}", e);
                        report.skipped += 1 + pending.len();
                        break 'batches;
                    }
                };
                // the wait for a slot may have outlasted the quota
                if self.quota.is_exhausted() {
                    report.skipped += 1 + pending.len();
                    break 'batches;
                }

                let prober = self.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    prober.probe(endpoint).await
                });

                while let Some(joined) = tasks.try_join_next() {
                    report.collect(joined);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            report.collect(joined);
        }

        if report.attempted > 0 && report.target_outages == report.attempted {
            warn!(
                "Every probe hit a target-side failure; {} may be down or throttling",
                self.target.host
            );
        }
        report
    }
}
