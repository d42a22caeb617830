#![cfg(target_os = "linux")]

mod common;

use loport::prober::TcpConnector;
use loport::report::render_table;
use loport::resolver::{ProcfsTable, SystemUsers};
use loport::scanner::{scan_ports, ScanContext};
use loport::services::ServiceDb;
use loport::types::PortState;
use std::sync::Arc;
use std::time::Duration;

fn context(services: &str) -> Arc<ScanContext<ProcfsTable, SystemUsers>> {
    Arc::new(ScanContext::new(
        ServiceDb::parse(services),
        ProcfsTable::default(),
        SystemUsers,
    ))
}

fn connector() -> TcpConnector {
    TcpConnector::new(Some(Duration::from_secs(2)))
}

#[tokio::test]
async fn single_fixture_port_yields_one_row() {
    let binder = common::PortBinder::spawn();

    let report = scan_ports(&[binder.port], 1, connector(), context(""))
        .await
        .unwrap();

    assert_eq!(report.scanned_total, 1);
    assert_eq!(report.open_count, 1);
    assert_eq!(report.entries.len(), 1);

    let entry = &report.entries[0];
    assert_eq!(entry.port, binder.port);
    assert_eq!(entry.state, PortState::Listening);
    assert_eq!(entry.service_name, None);
    let process = entry.owning_process.as_ref().expect("owner found");
    assert_eq!(process.pid, binder.pid());
    assert_eq!(process.name, "port-binder");
    assert_eq!(process.owner, common::current_owner());

    let table = render_table(&report);
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 3);
    let cols: Vec<&str> = lines[2].split_whitespace().collect();
    assert_eq!(cols[0], binder.port.to_string());
    assert_eq!(cols[1], "LISTENING");
    assert_eq!(cols[2], "unknown");
    assert_eq!(cols[3], "port-binder");
}

#[tokio::test]
async fn registered_service_name_is_reported() {
    let binder = common::PortBinder::spawn();
    let services = format!("fixture-svc {}/tcp\n", binder.port);

    let report = scan_ports(&[binder.port], 1, connector(), context(&services))
        .await
        .unwrap();

    assert_eq!(report.entries[0].service_name.as_deref(), Some("fixture-svc"));
}

#[tokio::test]
async fn no_open_ports_renders_header_only() {
    let ports = [common::closed_port(), common::closed_port(), common::closed_port()];

    let report = scan_ports(&ports, 1, connector(), context(""))
        .await
        .unwrap();

    assert_eq!(report.open_count, 0);
    assert!(report.entries.is_empty());
    assert_eq!(render_table(&report).lines().count(), 2);
}

#[tokio::test]
async fn concurrent_scan_keeps_ascending_order() {
    let a = common::PortBinder::spawn();
    let b = common::PortBinder::spawn();
    let mut ports = vec![b.port, a.port, common::closed_port()];
    ports.reverse();

    let report = scan_ports(&ports, 8, connector(), context(""))
        .await
        .unwrap();

    let mut expected = vec![a.port, b.port];
    expected.sort_unstable();
    let got: Vec<u16> = report.entries.iter().map(|e| e.port).collect();
    assert_eq!(got, expected);
    assert!(report
        .entries
        .iter()
        .all(|e| e.state == PortState::Listening && e.owning_process.is_some()));
}
