use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use loport::prober::TcpConnector;
use loport::resolver::{ProcfsTable, SystemUsers};
use loport::scanner::{self, ScanContext};
use loport::services::{ServiceDb, DEFAULT_SERVICES_PATH};
use loport::{ports, report};

use anyhow::Result;
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

/// loport — localhost TCP port inventory: state, service and owning process of every open loopback port.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "loport",
    version,
    about = "Localhost TCP port inventory: state, service and owning process of every open loopback port.",
    long_about = "Probes TCP ports on 127.0.0.1, classifies each reachable port as LISTENING, \
    ESTABLISHED or OPEN, names its service from the system service database and attributes it \
    to the process holding it. Run as root to see processes owned by other users."
)]
struct Cli {
    /// Ports or inclusive ranges to scan, comma separated (e.g. 22,80,8000-8010). All ports when omitted.
    #[arg(long, conflicts_with = "ports_file")]
    ports: Option<String>,

    /// Path to a ports list file (one port or range per line, `#` comments).
    #[arg(long = "ports-file")]
    ports_file: Option<PathBuf>,

    /// Max ports inspected at once. 1 scans strictly in ascending order.
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Socket connect timeout in milliseconds. Platform default when omitted.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Service database in /etc/services format.
    #[arg(long = "services-file", default_value = DEFAULT_SERVICES_PATH)]
    services_file: PathBuf,

    /// Mount point of the process filesystem.
    #[arg(long = "proc-root", default_value = "/proc")]
    proc_root: PathBuf,

    /// Print results as pretty JSON instead of a table.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Also write results as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ports = selected_ports(&cli)?;

    let services = ServiceDb::load_or_empty(&cli.services_file);
    let ctx = Arc::new(ScanContext::new(
        services,
        ProcfsTable::new(&cli.proc_root),
        SystemUsers,
    ));
    let connector = TcpConnector::new(cli.timeout_ms.map(Duration::from_millis));

    if !cli.json {
        println!(
            "Scanning 127.0.0.1: {} port(s), concurrency {}...",
            ports.len(),
            cli.concurrency.max(1)
        );
    }

    let results = scanner::scan_ports(&ports, cli.concurrency, connector, ctx).await?;

    if cli.json {
        println!("{}", report::results_json(&results)?);
    } else {
        report::print_results_table(&results);
    }

    if let Some(path) = cli.output.as_deref() {
        report::write_results_json(path, &results)?;
        if !cli.json {
            println!("Wrote JSON results to {}", path.display());
        }
    }

    Ok(())
}

/// Ports named on the command line, or every port when none are.
fn selected_ports(cli: &Cli) -> Result<Vec<u16>> {
    match (&cli.ports_file, &cli.ports) {
        (Some(path), _) => ports::load_ports_from_path(path),
        (None, Some(spec)) => ports::parse_ports_str(spec),
        (None, None) => Ok(ports::full_range()),
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_scan_everything_sequentially() {
        let cli = Cli::try_parse_from(["loport"]).unwrap();
        assert_eq!(cli.ports, None);
        assert_eq!(cli.ports_file, None);
        assert_eq!(cli.concurrency, 1);
        assert_eq!(cli.timeout_ms, None);
        assert_eq!(cli.services_file, PathBuf::from("/etc/services"));
    }

    #[test]
    fn omitted_ports_select_full_range() {
        let cli = Cli::try_parse_from(["loport"]).unwrap();
        let ports = selected_ports(&cli).unwrap();
        assert_eq!(ports.len(), 65535);
        assert_eq!((ports[0], ports[65534]), (1, 65535));

        let cli = Cli::try_parse_from(["loport", "--ports", "443,22"]).unwrap();
        assert_eq!(selected_ports(&cli).unwrap(), vec![443, 22]);
    }

    #[test]
    fn ports_and_ports_file_conflict() {
        let res = Cli::try_parse_from(["loport", "--ports", "22", "--ports-file", "p.txt"]);
        assert!(res.is_err());
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["loport", "-vv", "--json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
    }
}
