use crate::error::{Result, ScanError};
use crate::types::{AddressRange, Endpoint};
use ipnet::{IpAddrRange, IpNet, Ipv4AddrRange, Ipv6AddrRange};
use std::net::IpAddr;
use std::path::Path;
use tokio::fs;
use tracing::warn;

/// Parse one CIDR block or bare address. Host bits in a CIDR are masked off,
/// so "10.0.0.7/24" covers 10.0.0.0 - 10.0.0.255.
pub fn parse_range(spec: &str) -> Result<AddressRange> {
    let spec = spec.trim();
    let invalid = |reason: String| ScanError::InvalidRange {
        spec: spec.to_string(),
        reason,
    };

    let net = if spec.contains('/') {
        spec.parse::<IpNet>().map_err(|e| invalid(e.to_string()))?
    } else {
        let addr = spec.parse::<IpAddr>().map_err(|e| invalid(e.to_string()))?;
        IpNet::from(addr)
    };

    Ok(AddressRange {
        spec: spec.to_string(),
        net: net.trunc(),
    })
}

/// Parse a line-oriented range file. Bad lines come back as `InvalidRange`
/// errors next to the ranges that did parse; they never abort the whole input.
pub fn parse_ranges(content: &str) -> (Vec<AddressRange>, Vec<ScanError>) {
    let mut ranges = Vec::new();
    let mut errors = Vec::new();

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        match parse_range(line) {
            Ok(range) => ranges.push(range),
            Err(e) => {
                warn!("{}", e);
                errors.push(e);
            }
        }
    }

    (ranges, errors)
}

pub async fn load_ranges(path: &Path) -> Result<(Vec<AddressRange>, Vec<ScanError>)> {
    let content = fs::read_to_string(path).await?;
    Ok(parse_ranges(&content))
}

fn addresses(net: &IpNet) -> IpAddrRange {
    match net {
        IpNet::V4(n) => IpAddrRange::from(Ipv4AddrRange::new(n.network(), n.broadcast())),
        IpNet::V6(n) => IpAddrRange::from(Ipv6AddrRange::new(n.network(), n.broadcast())),
    }
}

/// Lazily walks a list of ranges. Each call to `endpoints` or `batches`
/// starts again from the first address of the first range.
#[derive(Debug, Clone)]
pub struct RangeExpander {
    ranges: Vec<AddressRange>,
}

impl RangeExpander {
    pub fn new(ranges: Vec<AddressRange>) -> Self {
        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of addresses across all ranges (saturating).
    pub fn total(&self) -> u128 {
        self.ranges
            .iter()
            .fold(0u128, |acc, r| acc.saturating_add(r.size()))
    }

    /// Ascending addresses within a range, ranges in input order.
    pub fn endpoints(&self) -> impl Iterator<Item = Endpoint> + '_ {
        self.ranges
            .iter()
            .flat_map(|r| addresses(&r.net))
            .map(Endpoint)
    }

    /// Endpoints grouped into batches of at most `size`. Only the current
    /// batch is ever held in memory.
    pub fn batches(&self, size: usize) -> impl Iterator<Item = Vec<Endpoint>> + '_ {
        let size = size.max(1);
        let mut endpoints = self.endpoints();
        std::iter::from_fn(move || {
            let batch: Vec<Endpoint> = endpoints.by_ref().take(size).collect();
            (!batch.is_empty()).then_some(batch)
        })
    }
}
