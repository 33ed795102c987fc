use crate::client::Payload;
use crate::config::Settings;
use crate::error::{Result, ScanError};
use crate::probe::{ProbeConfig, Prober};
use crate::quota::Quota;
use crate::range::RangeExpander;
use crate::resolver::{self, TargetSource};
use crate::traits::{NetworkClient, ResultSink};
use crate::types::ScanSummary;
use indicatif::ProgressBar;
use std::sync::Arc;
use tracing::{debug, info};

/// Wires the resolver, expander, prober, quota and sink together for one run.
pub struct Scanner {
    client: Arc<dyn NetworkClient>,
    sink: Arc<dyn ResultSink>,
    settings: Settings,
    progress: ProgressBar,
}

impl Scanner {
    pub fn new(client: Arc<dyn NetworkClient>, sink: Arc<dyn ResultSink>, settings: Settings) -> Self {
        Self {
            client,
            sink,
            settings,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            mode: self.settings.mode,
            payload: Payload::new(self.settings.payload_bytes, self.settings.chunk_bytes),
            timeout: self.settings.timeout(),
            concurrency: self.settings.concurrency,
        }
    }

    /// Resolve the target, then stream batches through one prober pool until
    /// the ranges run out or the quota is filled.
    pub async fn run(
        &self,
        sources: &[TargetSource],
        expander: &RangeExpander,
        invalid_ranges: usize,
    ) -> Result<ScanSummary> {
        if expander.is_empty() {
            return Err(ScanError::NoInput);
        }
        self.settings.validate()?;

        let target = resolver::resolve_target(self.client.as_ref(), sources, self.settings.scheme()).await?;
        let prober = Prober::new(
            self.client.clone(),
            Arc::new(target.clone()),
            Arc::new(Quota::new(self.settings.count)),
            self.sink.clone(),
            self.probe_config(),
        )
        .with_progress(self.progress.clone());
        let quota = prober.quota();

        info!(
            "Probing up to {} addresses for {} endpoints ({} concurrent)",
            expander.total(),
            quota.target(),
            self.settings.concurrency
        );

        let report = prober.run_batches(expander.batches(self.settings.batch_size)).await;
        debug!(
            "{} attempted, {} accepted, {} rejected, {} discarded, {} skipped",
            report.attempted,
            report.accepted.len(),
            report.rejected,
            report.discarded,
            report.skipped
        );

        let mut accepted = report.accepted;
        accepted.sort_by_key(|r| r.timestamp);
        Ok(ScanSummary {
            target,
            attempted: report.attempted,
            accepted,
            invalid_ranges,
            quota_met: quota.is_exhausted(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::{parse_range, parse_ranges};
    use crate::testing::{FlakySink, MemorySink, Outcome, ScriptedClient};
    use crate::types::{Endpoint, ProbeTarget, Scheme, TargetKind};

    fn settings(count: usize, batch_size: usize, concurrency: usize) -> Settings {
        Settings {
            count,
            batch_size,
            concurrency,
            secure: true,
            ..Settings::default()
        }
    }

    fn sources(hosts: &[&str]) -> Vec<TargetSource> {
        vec![TargetSource::Inline(
            hosts
                .iter()
                .map(|h| ProbeTarget::new(h, Scheme::Https, TargetKind::Plain))
                .collect(),
        )]
    }

    #[tokio::test]
    async fn test_quota_of_two_over_four_addresses() -> Result<()> {
        let client = Arc::new(ScriptedClient::new().with_check("https://b.example/", Ok(200)));
        let sink = Arc::new(MemorySink::default());
        let scanner = Scanner::new(client.clone(), sink.clone(), settings(2, 256, 4));
        let expander = RangeExpander::new(vec![parse_range("203.0.113.0/30")?]);

        let summary = scanner.run(&sources(&["b.example"]), &expander, 0).await?;
        assert_eq!(summary.target.host, "b.example");
        assert_eq!(summary.accepted.len(), 2);
        assert_eq!(sink.recorded(), 2);
        assert!(summary.quota_met);
        assert!(summary.attempted <= 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_enumeration_stops_once_quota_is_filled() -> Result<()> {
        let client = Arc::new(ScriptedClient::new().with_check("https://a.example/", Ok(200)));
        let sink = Arc::new(MemorySink::default());
        // one probe at a time, batches of two: the quota is filled in the first batch
        let scanner = Scanner::new(client.clone(), sink.clone(), settings(1, 2, 1));
        let expander = RangeExpander::new(vec![parse_range("10.0.0.0/8")?]);

        let summary = scanner.run(&sources(&["a.example"]), &expander, 0).await?;
        assert_eq!(summary.accepted.len(), 1);
        assert_eq!(summary.attempted, 1);
        assert_eq!(client.probe_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_write_does_not_count_toward_quota() -> Result<()> {
        let client = Arc::new(ScriptedClient::new().with_check("https://a.example/", Ok(200)));
        let sink = Arc::new(FlakySink::failing(1));
        let scanner = Scanner::new(client, sink.clone(), settings(2, 256, 1));
        let expander = RangeExpander::new(vec![parse_range("203.0.113.0/30")?]);

        let summary = scanner.run(&sources(&["a.example"]), &expander, 0).await?;
        assert!(summary.quota_met);
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.accepted.len(), 2);
        assert_eq!(sink.recorded(), 2);
        assert_eq!(
            sink.entries(),
            vec![
                Endpoint("203.0.113.1".parse().unwrap()),
                Endpoint("203.0.113.2".parse().unwrap()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_no_target_means_no_probes() -> Result<()> {
        let client = Arc::new(
            ScriptedClient::new()
                .with_check("https://a.example/", Err("connection refused"))
                .with_check("https://b.example/", Err("timed out")),
        );
        let sink = Arc::new(MemorySink::default());
        let scanner = Scanner::new(client.clone(), sink.clone(), settings(5, 256, 4));
        let expander = RangeExpander::new(vec![parse_range("203.0.113.0/30")?]);

        let err = scanner
            .run(&sources(&["a.example", "b.example"]), &expander, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NoTargetAvailable { .. }));
        assert_eq!(client.probe_calls(), 0);
        assert_eq!(sink.recorded(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_lines_do_not_stop_valid_ones() -> Result<()> {
        let client = Arc::new(
            ScriptedClient::new()
                .with_check("https://a.example/", Ok(200))
                .with_default_upload(Outcome::Status(403))
                .with_upload("198.51.100.2", Outcome::Status(200)),
        );
        let sink = Arc::new(MemorySink::default());
        let scanner = Scanner::new(client, sink.clone(), settings(3, 256, 4));

        let (ranges, errors) = parse_ranges("198.51.100.0/30\n999.1.1.1/40\n198.51.100.9\n");
        assert_eq!(errors.len(), 1);
        let expander = RangeExpander::new(ranges);

        let summary = scanner.run(&sources(&["a.example"]), &expander, errors.len()).await?;
        assert_eq!(summary.invalid_ranges, 1);
        assert_eq!(summary.attempted, 5);
        assert!(!summary.quota_met);
        assert_eq!(sink.entries().len(), 1);
        assert_eq!(sink.entries()[0].to_string(), "198.51.100.2");
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_input_is_fatal() {
        let client = Arc::new(ScriptedClient::new().with_check("https://a.example/", Ok(200)));
        let sink = Arc::new(MemorySink::default());
        let scanner = Scanner::new(client, sink, settings(1, 256, 4));

        let err = scanner
            .run(&sources(&["a.example"]), &RangeExpander::new(Vec::new()), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NoInput));
    }
}
