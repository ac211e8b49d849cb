use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tally",
    about = "Sharded Prometheus exporter for security scan reports",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML configuration file; flags override its values
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the exporter until interrupted
    Run(RunArgs),
    /// List the labels each report kind can expose
    Labels(LabelsArgs),
    /// Load and validate configuration, then print the effective values
    CheckConfig(RunArgs),
}

/// Flags that override configuration file values.
#[derive(Args, Clone, Debug, Default)]
pub struct RunArgs {
    /// Address the metrics endpoint listens on
    #[arg(long)]
    pub bind_addr: Option<SocketAddr>,

    /// This replica's address as listed in the service endpoints
    #[arg(long, alias = "pod-ip")]
    pub self_address: Option<String>,

    /// Service whose endpoints list the exporter replicas
    #[arg(long)]
    pub service_name: Option<String>,

    #[arg(long)]
    pub service_namespace: Option<String>,

    /// JSON endpoints object kept in sync with the service
    #[arg(long)]
    pub endpoints_file: Option<PathBuf>,

    /// Fixed peer addresses, used when no endpoints file is given
    #[arg(long, value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Directory holding report objects
    #[arg(long)]
    pub reports_dir: Option<PathBuf>,

    /// Spread of the requeue interval in percent (0-99)
    #[arg(long)]
    pub max_jitter_percent: Option<u8>,

    /// `all` or a comma-separated list of CIS benchmark labels
    #[arg(long)]
    pub cis_target_labels: Option<String>,

    /// `all` or a comma-separated list of config audit labels
    #[arg(long)]
    pub config_audit_target_labels: Option<String>,

    /// `all` or a comma-separated list of image vulnerability labels
    #[arg(long, alias = "target-labels")]
    pub vulnerability_target_labels: Option<String>,

    #[arg(long)]
    pub disable_cis: bool,

    #[arg(long)]
    pub disable_config_audit: bool,

    #[arg(long)]
    pub disable_vulnerability: bool,
}

#[derive(Args)]
pub struct LabelsArgs {
    /// Only list this kind (e.g. `cis`, `config-audit`, `vulnerability`)
    #[arg(long)]
    pub kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::try_parse_from(["tally", "run"]).unwrap();
        if let Command::Run(args) = cli.command {
            assert!(args.bind_addr.is_none());
            assert!(args.peers.is_empty());
            assert!(!args.disable_cis);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "tally",
            "run",
            "--pod-ip",
            "10.0.0.1",
            "--peers",
            "10.0.0.1,10.0.0.2",
            "--bind-addr",
            "127.0.0.1:9000",
            "--max-jitter-percent",
            "25",
        ])
        .unwrap();
        if let Command::Run(args) = cli.command {
            assert_eq!(args.self_address.as_deref(), Some("10.0.0.1"));
            assert_eq!(args.peers, vec!["10.0.0.1", "10.0.0.2"]);
            assert_eq!(args.bind_addr.unwrap().port(), 9000);
            assert_eq!(args.max_jitter_percent, Some(25));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_vulnerability_flags() {
        let cli = Cli::try_parse_from([
            "tally",
            "run",
            "--target-labels",
            "all",
            "--disable-vulnerability",
        ])
        .unwrap();
        if let Command::Run(args) = cli.command {
            assert_eq!(args.vulnerability_target_labels.as_deref(), Some("all"));
            assert!(args.disable_vulnerability);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_labels_kind() {
        let cli = Cli::try_parse_from(["tally", "labels", "--kind", "cis"]).unwrap();
        if let Command::Labels(args) = cli.command {
            assert_eq!(args.kind.as_deref(), Some("cis"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tally", "check-config", "--config", "tally.toml", "-v"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("tally.toml")));
        assert!(matches!(cli.command, Command::CheckConfig(_)));
    }

    #[test]
    fn rejects_unparseable_bind_addr() {
        assert!(Cli::try_parse_from(["tally", "run", "--bind-addr", "nowhere"]).is_err());
    }
}
