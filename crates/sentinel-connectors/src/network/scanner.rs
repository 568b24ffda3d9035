//! Nmap execution and output parsing.
//!
//! nmap is spawned with `-oX -` so its XML report arrives on stdout;
//! quick-xml deserializes it into the minimal shape the connector
//! consumes — hosts, their addresses, port states, and service probes.
//! The [`NmapRunner`] seam lets tests feed canned output instead of
//! spawning processes.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use sentinel_core::SentinelError;

/// Predefined scan profiles mapping to nmap flag sets.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanProfile {
    /// Ping sweep only: `-sn`
    Quick,
    /// SYN scan + service version, top 1000 ports: `-sS -sV`
    #[default]
    Standard,
    /// Full scan: `-sS -sV -O -A -p-`
    Deep,
}

impl ScanProfile {
    /// Return the nmap flags for this profile.
    pub fn nmap_flags(&self) -> Vec<&'static str> {
        match self {
            Self::Quick => vec!["-sn"],
            Self::Standard => vec!["-sS", "-sV", "--top-ports", "1000"],
            Self::Deep => vec!["-sS", "-sV", "-O", "-A", "-p-"],
        }
    }

    pub fn parse(s: &str) -> Result<Self, SentinelError> {
        match s.to_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "standard" => Ok(Self::Standard),
            "deep" => Ok(Self::Deep),
            other => Err(SentinelError::Config(format!(
                "invalid scan profile: {other}. Choose: quick, standard, deep"
            ))),
        }
    }
}

// ── Output model ──────────────────────────────────────────────────

/// One scan's parsed `-oX` report.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct ScanOutput {
    #[serde(rename = "host", default)]
    pub hosts: Vec<ScannedHost>,
}

impl ScanOutput {
    /// Hosts that answered the probe.
    pub fn live_hosts(&self) -> impl Iterator<Item = &ScannedHost> {
        self.hosts.iter().filter(|h| h.is_up())
    }
}

/// A host element of the report.
#[derive(Debug, Clone, Deserialize)]
pub struct ScannedHost {
    status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    addresses: Vec<AddressEntry>,
    hostnames: Option<HostnameList>,
    ports: Option<PortList>,
    os: Option<OsDetection>,
}

impl ScannedHost {
    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }

    pub fn ipv4(&self) -> Option<&str> {
        self.address_of_type("ipv4")
    }

    pub fn mac(&self) -> Option<&str> {
        self.address_of_type("mac")
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostnames
            .as_ref()?
            .entries
            .first()
            .map(|h| h.name.as_str())
    }

    /// nmap orders OS matches by accuracy; take the best guess.
    pub fn os_name(&self) -> Option<&str> {
        self.os.as_ref()?.guesses.first().map(|g| g.name.as_str())
    }

    pub fn ports(&self) -> &[PortEntry] {
        self.ports
            .as_ref()
            .map(|p| p.entries.as_slice())
            .unwrap_or(&[])
    }

    fn address_of_type(&self, addr_type: &str) -> Option<&str> {
        self.addresses
            .iter()
            .find_map(|a| (a.addr_type == addr_type).then_some(a.addr.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct HostStatus {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AddressEntry {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype")]
    addr_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct HostnameList {
    #[serde(rename = "hostname", default)]
    entries: Vec<HostnameEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct HostnameEntry {
    #[serde(rename = "@name")]
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PortList {
    #[serde(rename = "port", default)]
    entries: Vec<PortEntry>,
}

/// One scanned port with its state and, when identified, the service
/// probe result.
#[derive(Debug, Clone, Deserialize)]
pub struct PortEntry {
    #[serde(rename = "@protocol")]
    pub protocol: String,
    #[serde(rename = "@portid")]
    pub number: u16,
    state: PortStatus,
    pub service: Option<ServiceProbe>,
}

impl PortEntry {
    pub fn state(&self) -> &str {
        &self.state.state
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PortStatus {
    #[serde(rename = "@state")]
    state: String,
}

/// Service identification from `-sV`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceProbe {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@product")]
    pub product: Option<String>,
    #[serde(rename = "@version")]
    pub version: Option<String>,
    #[serde(rename = "@extrainfo")]
    pub extra_info: Option<String>,
}

impl ServiceProbe {
    /// "product version" when both were probed, either alone otherwise.
    pub fn version_label(&self) -> Option<String> {
        match (&self.product, &self.version) {
            (Some(p), Some(v)) => Some(format!("{p} {v}")),
            (Some(p), None) => Some(p.clone()),
            (None, Some(v)) => Some(v.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OsDetection {
    #[serde(rename = "osmatch", default)]
    guesses: Vec<OsGuess>,
}

#[derive(Debug, Clone, Deserialize)]
struct OsGuess {
    #[serde(rename = "@name")]
    name: String,
}

/// Parse `-oX` report bytes.
pub fn parse_scan_output(xml: &[u8]) -> Result<ScanOutput, SentinelError> {
    quick_xml::de::from_reader(xml)
        .map_err(|e| SentinelError::Internal(format!("nmap xml parse: {e}")))
}

// ── Execution ─────────────────────────────────────────────────────

/// Seam over nmap execution.
#[async_trait]
pub trait NmapRunner: Send + Sync {
    /// Verify nmap is available; returns its version banner.
    async fn verify(&self) -> Result<String, SentinelError>;

    /// Scan the target and return the parsed report.
    async fn scan(&self, target: &str, profile: &ScanProfile)
        -> Result<ScanOutput, SentinelError>;
}

/// Runner that spawns the real nmap binary.
pub struct ProcessNmapRunner {
    nmap_path: String,
}

impl ProcessNmapRunner {
    pub fn new(nmap_path: &str) -> Self {
        Self {
            nmap_path: nmap_path.to_string(),
        }
    }
}

#[async_trait]
impl NmapRunner for ProcessNmapRunner {
    async fn verify(&self) -> Result<String, SentinelError> {
        let output = Command::new(&self.nmap_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                SentinelError::Config(format!("nmap not found at {}: {e}", self.nmap_path))
            })?;

        String::from_utf8(output.stdout)
            .map_err(|e| SentinelError::Internal(format!("nmap version output: {e}")))
    }

    async fn scan(
        &self,
        target: &str,
        profile: &ScanProfile,
    ) -> Result<ScanOutput, SentinelError> {
        let start = Instant::now();
        let flags = profile.nmap_flags();

        tracing::info!(
            target = %target,
            profile = ?profile,
            "Starting nmap scan"
        );

        let output = Command::new(&self.nmap_path)
            .args(&flags)
            .arg("-oX")
            .arg("-")
            .arg("--noninteractive")
            .arg(target)
            .output()
            .await
            .map_err(|e| {
                SentinelError::Config(format!("nmap not found at {}: {e}", self.nmap_path))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(SentinelError::Transient(format!(
                "nmap exited with code {}: {stderr}",
                output.status.code().unwrap_or(-1)
            )));
        }

        let report = parse_scan_output(&output.stdout)?;
        tracing::info!(
            target = %target,
            hosts_up = report.live_hosts().count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Nmap scan complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sS -sV 192.168.50.0/28">
  <host>
    <status state="up" reason="syn-ack"/>
    <address addr="192.168.50.4" addrtype="ipv4"/>
    <address addr="DE:AD:BE:EF:00:04" addrtype="mac"/>
    <hostnames>
      <hostname name="db-01.corp" type="PTR"/>
    </hostnames>
    <ports>
      <port protocol="tcp" portid="5432">
        <state state="open" reason="syn-ack"/>
        <service name="postgresql" product="PostgreSQL" version="15.6"/>
      </port>
      <port protocol="tcp" portid="8443">
        <state state="open" reason="syn-ack"/>
        <service name="https" product="Caddy"/>
      </port>
      <port protocol="tcp" portid="25">
        <state state="filtered" reason="no-response"/>
      </port>
    </ports>
    <os>
      <osmatch name="Debian 12" accuracy="96"/>
      <osmatch name="Debian 11" accuracy="88"/>
    </os>
  </host>
  <host>
    <status state="down" reason="no-response"/>
    <address addr="192.168.50.9" addrtype="ipv4"/>
  </host>
</nmaprun>"#;

    #[test]
    fn report_exposes_live_hosts_with_ports_and_probes() {
        let report = parse_scan_output(REPORT_XML.as_bytes()).unwrap();
        assert_eq!(report.hosts.len(), 2);

        let live: Vec<_> = report.live_hosts().collect();
        assert_eq!(live.len(), 1);

        let host = live[0];
        assert_eq!(host.ipv4(), Some("192.168.50.4"));
        assert_eq!(host.mac(), Some("DE:AD:BE:EF:00:04"));
        assert_eq!(host.hostname(), Some("db-01.corp"));
        assert_eq!(host.os_name(), Some("Debian 12"));

        let ports = host.ports();
        assert_eq!(ports.len(), 3);
        assert_eq!(ports[0].number, 5432);
        assert_eq!(ports[0].state(), "open");
        assert_eq!(ports[2].state(), "filtered");
        assert!(ports[2].service.is_none());
    }

    #[test]
    fn bare_host_has_no_optional_sections() {
        let report = parse_scan_output(REPORT_XML.as_bytes()).unwrap();
        let down = &report.hosts[1];

        assert!(!down.is_up());
        assert_eq!(down.ipv4(), Some("192.168.50.9"));
        assert_eq!(down.mac(), None);
        assert_eq!(down.hostname(), None);
        assert_eq!(down.os_name(), None);
        assert!(down.ports().is_empty());
    }

    #[test]
    fn version_label_joins_what_the_probe_found() {
        let report = parse_scan_output(REPORT_XML.as_bytes()).unwrap();
        let host = report.live_hosts().next().unwrap();
        let labels: Vec<Option<String>> = host
            .ports()
            .iter()
            .map(|p| p.service.as_ref().and_then(|s| s.version_label()))
            .collect();

        assert_eq!(labels[0].as_deref(), Some("PostgreSQL 15.6"));
        assert_eq!(labels[1].as_deref(), Some("Caddy"));
        assert_eq!(labels[2], None);
    }

    #[test]
    fn malformed_report_is_an_error() {
        let result = parse_scan_output(b"<nmaprun><host></nmaprun>");
        assert!(matches!(result, Err(SentinelError::Internal(_))));
    }

    #[test]
    fn profiles_map_to_flags_and_parse() {
        assert_eq!(ScanProfile::parse("quick").unwrap(), ScanProfile::Quick);
        assert_eq!(ScanProfile::parse("DEEP").unwrap(), ScanProfile::Deep);
        assert!(ScanProfile::parse("stealth").is_err());

        assert_eq!(ScanProfile::Quick.nmap_flags(), vec!["-sn"]);
        assert!(ScanProfile::Deep.nmap_flags().contains(&"-p-"));
    }
}
