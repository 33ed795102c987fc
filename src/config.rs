use crate::error::{Result, ScanError};
use crate::types::{ProbeMode, ProbeTarget, Scheme, TargetKind};
use directories::ProjectDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

// Include the built-in target list at compile time
const TARGETS_TXT: &str = include_str!("../assets/targets.txt");

const SETTINGS_FILE: &str = "settings.toml";
const SPEEDTEST_MARKER: &str = "speedtest";

/// Persisted run settings (`settings.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How many accepted endpoints to collect before stopping
    pub count: usize,
    /// Domain of the personal server the probes are sent to
    pub speed_domain: String,
    pub secure: bool,
    pub timeout_secs: u64,
    pub concurrency: usize,
    pub payload_bytes: u64,
    pub chunk_bytes: usize,
    pub mode: ProbeMode,
    pub batch_size: usize,
    pub targets_file: Option<PathBuf>,
    pub targets_url: Option<String>,
    pub output: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            count: 5,
            speed_domain: "speedtest.example.com".to_string(),
            secure: true,
            timeout_secs: 5,
            concurrency: 100,
            payload_bytes: 100 * 1024,
            chunk_bytes: 8 * 1024,
            mode: ProbeMode::Upload,
            batch_size: 256,
            targets_file: None,
            targets_url: None,
            output: PathBuf::from("accepted.txt"),
        }
    }
}

impl Settings {
    /// Default location: ~/.config/edgeprobe/settings.toml (platform equivalent),
    /// falling back to the working directory.
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("", "", "edgeprobe")
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
            .unwrap_or_else(|| PathBuf::from(".").join(SETTINGS_FILE))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, toml::to_string_pretty(self)?).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.count == 0, "count must be greater than 0"),
            (self.concurrency == 0, "concurrency must be greater than 0"),
            (self.chunk_bytes == 0, "chunk_bytes must be greater than 0"),
            (self.batch_size == 0, "batch_size must be greater than 0"),
            (self.timeout_secs == 0, "timeout_secs must be greater than 0"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, msg)) => Err(ScanError::Custom(msg.to_string())),
            None => Ok(()),
        }
    }

    pub fn scheme(&self) -> Scheme {
        Scheme::from_secure(self.secure)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Parse a candidate target list. Blank lines and `#` comments are ignored,
/// malformed lines are logged and skipped.
pub fn parse_target_list(content: &str, scheme: Scheme) -> Result<Vec<ProbeTarget>> {
    // <name|[ipv6]>[:port] [marker]
    let re = Regex::new(
        r"^(?P<host>(?:[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?|\[[0-9A-Fa-f:.]+\])(?::\d{1,5})?)(?:\s+(?P<marker>\S+))?$",
    )?;

    let mut targets = Vec::new();
    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        let Some(caps) = re.captures(line) else {
            warn!(
                line = lineno + 1,
                entry = line,
                "skipping malformed target entry, expected `<host>[:port] [speedtest]` (IPv6 in brackets)"
            );
            continue;
        };

        let kind = match caps.name("marker").map(|m| m.as_str()) {
            None => TargetKind::Plain,
            Some(SPEEDTEST_MARKER) => TargetKind::SpeedTest,
            Some(other) => {
                warn!(line = lineno + 1, marker = other, "unknown target marker");
                continue;
            }
        };
        targets.push(ProbeTarget::new(&caps["host"], scheme, kind));
    }
    Ok(targets)
}

pub async fn read_target_list(path: &Path, scheme: Scheme) -> Result<Vec<ProbeTarget>> {
    let content = fs::read_to_string(path).await?;
    parse_target_list(&content, scheme)
}

pub async fn write_target_list(path: &Path, targets: &[ProbeTarget]) -> Result<()> {
    let mut content = String::new();
    for target in targets {
        content.push_str(&target.host);
        if target.kind == TargetKind::SpeedTest {
            content.push(' ');
            content.push_str(SPEEDTEST_MARKER);
        }
        content.push('\n');
    }
    fs::write(path, content).await?;
    Ok(())
}

/// The list compiled into the binary, used when nothing else is reachable.
pub fn builtin_targets(scheme: Scheme) -> Vec<ProbeTarget> {
    parse_target_list(TARGETS_TXT, scheme).unwrap_or_default()
}
