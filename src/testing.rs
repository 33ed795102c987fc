//! Scripted `NetworkClient` for driving the resolver, prober and scanner in tests.

use crate::client::{Payload, Transfer};
use crate::error::{Result, ScanError};
use crate::traits::{BoundClient, NetworkClient, ResultSink};
use crate::types::Endpoint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// How a source-bound request from one endpoint behaves.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Status(u16),
    Fail(&'static str),
}

pub struct ScriptedClient {
    checks: HashMap<String, std::result::Result<u16, &'static str>>,
    texts: HashMap<String, String>,
    uploads: HashMap<IpAddr, Outcome>,
    default_upload: Outcome,
    download: Outcome,
    delay: Duration,
    slow: HashMap<IpAddr, Duration>,
    binds: AtomicUsize,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            checks: HashMap::new(),
            texts: HashMap::new(),
            uploads: HashMap::new(),
            default_upload: Outcome::Status(200),
            download: Outcome::Status(200),
            delay: Duration::ZERO,
            slow: HashMap::new(),
            binds: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_check(mut self, url: &str, result: std::result::Result<u16, &'static str>) -> Self {
        self.checks.insert(url.to_string(), result);
        self
    }

    pub fn with_text(mut self, url: &str, body: &str) -> Self {
        self.texts.insert(url.to_string(), body.to_string());
        self
    }

    pub fn with_upload(mut self, source: &str, outcome: Outcome) -> Self {
        let addr = source.parse().unwrap_or_else(|_| panic!("bad address {}", source));
        self.uploads.insert(addr, outcome);
        self
    }

    pub fn with_default_upload(mut self, outcome: Outcome) -> Self {
        self.default_upload = outcome;
        self
    }

    pub fn with_download(mut self, outcome: Outcome) -> Self {
        self.download = outcome;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests from `source` take `delay` instead of the common delay.
    pub fn with_slow(mut self, source: &str, delay: Duration) -> Self {
        let addr = source.parse().unwrap_or_else(|_| panic!("bad address {}", source));
        self.slow.insert(addr, delay);
        self
    }

    /// Number of source-bound requests issued (uploads + downloads).
    pub fn probe_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of source bindings handed out.
    pub fn bind_calls(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    /// Highest number of source-bound requests that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn bound_request(&self, source: IpAddr, outcome: Outcome, bytes: u64) -> Result<Transfer> {
        let delay = self.slow.get(&source).copied().unwrap_or(self.delay);
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Outcome::Status(status) => Ok(Transfer {
                status,
                bytes: if status == 200 { bytes } else { 0 },
                elapsed: delay.max(Duration::from_millis(1)),
            }),
            Outcome::Fail(reason) => Err(ScanError::Custom(reason.to_string())),
        }
    }
}

#[async_trait]
impl NetworkClient for ScriptedClient {
    async fn check(&self, url: &str) -> Result<u16> {
        match self.checks.get(url) {
            Some(Ok(status)) => Ok(*status),
            Some(Err(reason)) => Err(ScanError::Custom(reason.to_string())),
            None => Err(ScanError::Custom(format!("no route to {}", url))),
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.texts
            .get(url)
            .cloned()
            .ok_or_else(|| ScanError::Custom(format!("404 for {}", url)))
    }

    fn bind(&self, source: IpAddr) -> Result<Box<dyn BoundClient + '_>> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedBinding { client: self, source }))
    }
}

struct ScriptedBinding<'a> {
    client: &'a ScriptedClient,
    source: IpAddr,
}

#[async_trait]
impl BoundClient for ScriptedBinding<'_> {
    async fn upload(&self, _url: &str, payload: Payload) -> Result<Transfer> {
        let outcome = self
            .client
            .uploads
            .get(&self.source)
            .copied()
            .unwrap_or(self.client.default_upload);
        self.client.bound_request(self.source, outcome, payload.size).await
    }

    async fn download(&self, _url: &str, limit: u64) -> Result<Transfer> {
        self.client
            .bound_request(self.source, self.client.download, limit)
            .await
    }
}

/// In-memory sink keeping accepted endpoints in arrival order.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Endpoint>>,
}

impl MemorySink {
    pub fn entries(&self) -> Vec<Endpoint> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn recorded(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn record(&self, endpoint: Endpoint) -> Result<()> {
        self.entries
            .lock()
            .map_err(|e| ScanError::Custom(e.to_string()))?
            .push(endpoint);
        Ok(())
    }
}

/// Sink whose first `failures` writes fail, then behaves like `MemorySink`.
pub struct FlakySink {
    failures: AtomicUsize,
    inner: MemorySink,
}

impl FlakySink {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            inner: MemorySink::default(),
        }
    }

    pub fn entries(&self) -> Vec<Endpoint> {
        self.inner.entries()
    }

    pub fn recorded(&self) -> usize {
        self.inner.recorded()
    }
}

#[async_trait]
impl ResultSink for FlakySink {
    async fn record(&self, endpoint: Endpoint) -> Result<()> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ScanError::Custom(format!("disk full writing {}", endpoint)));
        }
        self.inner.record(endpoint).await
    }
}
