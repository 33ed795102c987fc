use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::SystemTime;

/// One parsed line of the range file: a CIDR block or a bare address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRange {
    pub spec: String, // 原始输入, 例如: "203.0.113.0/30"
    pub net: IpNet,
}

impl AddressRange {
    pub fn first(&self) -> IpAddr {
        self.net.network()
    }

    pub fn last(&self) -> IpAddr {
        self.net.broadcast()
    }

    /// Number of addresses in the block, saturating at `u128::MAX` for a full IPv6 /0.
    pub fn size(&self) -> u128 {
        let host_bits = u32::from(self.net.max_prefix_len() - self.net.prefix_len());
        1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
    }
}

/// A single candidate source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(pub IpAddr);

impl Endpoint {
    pub fn addr(&self) -> IpAddr {
        self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn from_secure(secure: bool) -> Self {
        if secure {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Marker for targets that only answer on dedicated speed-test paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetKind {
    /// Every request goes to "/".
    #[default]
    Plain,
    /// GET "/__down?bytes=N" and POST "/__up".
    SpeedTest,
}

/// The server every probe is sent to. Resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub scheme: Scheme,
    pub kind: TargetKind,
}

impl ProbeTarget {
    pub fn new(host: &str, scheme: Scheme, kind: TargetKind) -> Self {
        Self {
            host: host.to_string(),
            scheme,
            kind,
        }
    }

    fn base(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.host)
    }

    pub fn liveness_url(&self) -> String {
        self.download_url(0)
    }

    pub fn upload_url(&self) -> String {
        match self.kind {
            TargetKind::Plain => format!("{}/", self.base()),
            TargetKind::SpeedTest => format!("{}/__up", self.base()),
        }
    }

    pub fn download_url(&self, bytes: u64) -> String {
        match self.kind {
            TargetKind::Plain => format!("{}/", self.base()),
            TargetKind::SpeedTest => format!("{}/__down?bytes={}", self.base(), bytes),
        }
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/", self.base())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeMode {
    /// Upload the synthetic payload only
    #[default]
    Upload,
    /// Upload, then download the same amount
    UploadDownload,
}

/// What a successful probe measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metric {
    pub latency_ms: u64,
    pub upload_mbps: f64,
    pub download_mbps: Option<f64>,
}

/// Outcome of exactly one probe attempt.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub endpoint: Endpoint,
    pub success: bool,
    pub metric: Option<Metric>,
    pub timestamp: SystemTime,
}

impl ProbeResult {
    pub fn accepted(endpoint: Endpoint, metric: Metric) -> Self {
        Self {
            endpoint,
            success: true,
            metric: Some(metric),
            timestamp: SystemTime::now(),
        }
    }
}

/// Totals reported at the end of a run.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub target: ProbeTarget,
    pub attempted: usize,
    pub accepted: Vec<ProbeResult>,
    pub invalid_ranges: usize,
    pub quota_met: bool,
}
