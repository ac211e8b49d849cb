use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use tally_reconcile::{exporter_for, ReconcileConfig};
use tally_ring::RingConfig;
use tally_server::ServerConfig;
use tally_types::{PeerAddress, ResourceKind, DEFAULT_SERVICE_NAME};

use crate::cli::RunArgs;

/// Everything `tally run` needs, as read from TOML.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub ring: RingConfig,
    pub reconcile: ReconcileConfig,
    pub server: ServerConfig,
    pub membership: MembershipConfig,
    pub store: StoreConfig,
    pub kinds: KindsConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Address this replica appears under in the endpoints; required.
    pub self_address: Option<String>,
    pub service_name: String,
    pub service_namespace: Option<String>,
    /// Polled endpoints object. Takes precedence over `static_peers`.
    pub endpoints_file: Option<PathBuf>,
    /// Used when no endpoints file is set. Empty means a ring of one.
    pub static_peers: Vec<String>,
    pub poll_interval_secs: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            self_address: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_namespace: None,
            endpoints_file: None,
            static_peers: Vec::new(),
            poll_interval_secs: 5,
        }
    }
}

impl MembershipConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub reports_dir: PathBuf,
    pub poll_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("reports"),
            poll_interval_secs: 10,
        }
    }
}

impl StoreConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindsConfig {
    pub cis_benchmarks_enabled: bool,
    pub config_audits_enabled: bool,
    pub vulnerability_scans_enabled: bool,
    pub cis_target_labels: String,
    pub config_audit_target_labels: String,
    pub vulnerability_target_labels: String,
}

impl Default for KindsConfig {
    fn default() -> Self {
        Self {
            cis_benchmarks_enabled: true,
            config_audits_enabled: true,
            vulnerability_scans_enabled: true,
            cis_target_labels: String::new(),
            config_audit_target_labels: String::new(),
            vulnerability_target_labels: String::new(),
        }
    }
}

impl KindsConfig {
    /// Enabled kinds paired with their target-label selection.
    pub fn enabled(&self) -> Vec<(ResourceKind, &str)> {
        let mut kinds = Vec::new();
        if self.cis_benchmarks_enabled {
            kinds.push((ResourceKind::CisKubeBenchReport, self.cis_target_labels.as_str()));
        }
        if self.config_audits_enabled {
            kinds.push((
                ResourceKind::ConfigAuditReport,
                self.config_audit_target_labels.as_str(),
            ));
        }
        if self.vulnerability_scans_enabled {
            kinds.push((
                ResourceKind::VulnerabilityReport,
                self.vulnerability_target_labels.as_str(),
            ));
        }
        kinds
    }
}

impl ExporterConfig {
    /// Read `path`, or start from defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Apply command-line overrides on top of file values.
    pub fn apply(&mut self, args: &RunArgs) {
        if let Some(addr) = args.bind_addr {
            self.server.bind_addr = addr;
        }
        if let Some(addr) = &args.self_address {
            self.membership.self_address = Some(addr.clone());
        }
        if let Some(name) = &args.service_name {
            self.membership.service_name = name.clone();
        }
        if let Some(ns) = &args.service_namespace {
            self.membership.service_namespace = Some(ns.clone());
        }
        if let Some(file) = &args.endpoints_file {
            self.membership.endpoints_file = Some(file.clone());
        }
        if !args.peers.is_empty() {
            self.membership.static_peers = args.peers.clone();
        }
        if let Some(dir) = &args.reports_dir {
            self.store.reports_dir = dir.clone();
        }
        if let Some(p) = args.max_jitter_percent {
            self.reconcile.max_jitter_percent = p;
        }
        if let Some(labels) = &args.cis_target_labels {
            self.kinds.cis_target_labels = labels.clone();
        }
        if let Some(labels) = &args.config_audit_target_labels {
            self.kinds.config_audit_target_labels = labels.clone();
        }
        if let Some(labels) = &args.vulnerability_target_labels {
            self.kinds.vulnerability_target_labels = labels.clone();
        }
        if args.disable_cis {
            self.kinds.cis_benchmarks_enabled = false;
        }
        if args.disable_config_audit {
            self.kinds.config_audits_enabled = false;
        }
        if args.disable_vulnerability {
            self.kinds.vulnerability_scans_enabled = false;
        }
    }

    /// Reject anything that would fail later or silently misbehave.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.ring.validate().context("[ring]")?;
        self.reconcile.validate().context("[reconcile]")?;

        self.self_address()?;
        for peer in &self.membership.static_peers {
            peer.parse::<PeerAddress>()
                .with_context(|| format!("[membership] static peer {peer:?}"))?;
        }
        if self.membership.endpoints_file.is_some() {
            if self.membership.service_namespace.as_deref().unwrap_or("").is_empty() {
                bail!("[membership] service_namespace is required with an endpoints file");
            }
            if self.membership.poll_interval_secs == 0 {
                bail!("[membership] poll_interval_secs must be positive");
            }
        }
        if self.store.poll_interval_secs == 0 {
            bail!("[store] poll_interval_secs must be positive");
        }

        let kinds = self.kinds.enabled();
        if kinds.is_empty() {
            bail!("[kinds] at least one report kind must be enabled");
        }
        for (kind, selection) in kinds {
            exporter_for(kind, selection).with_context(|| format!("[kinds] {kind} target labels"))?;
        }
        Ok(())
    }

    pub fn self_address(&self) -> anyhow::Result<PeerAddress> {
        let raw = self
            .membership
            .self_address
            .as_deref()
            .context("[membership] self_address is required (or pass --self-address)")?;
        raw.parse()
            .with_context(|| format!("[membership] self_address {raw:?}"))
    }

    /// Static peers, always including this replica.
    pub fn static_peers(&self) -> anyhow::Result<Vec<PeerAddress>> {
        let me = self.self_address()?;
        let mut peers = Vec::with_capacity(self.membership.static_peers.len() + 1);
        for raw in &self.membership.static_peers {
            peers.push(raw.parse::<PeerAddress>()?);
        }
        if !peers.contains(&me) {
            peers.push(me);
        }
        Ok(peers)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
