use crate::resolver::UNKNOWN;
use crate::types::{PortProbeResult, ProcessInfo, ScanReport};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const COL_PORT: usize = 8;
const COL_STATE: usize = 12;
const COL_SERVICE: usize = 20;

/// Header and separator rows of the results table.
pub fn table_header() -> String {
    format!(
        "{:<COL_PORT$} {:<COL_STATE$} {:<COL_SERVICE$} {}\n{:-<COL_PORT$} {:-<COL_STATE$} {:-<COL_SERVICE$} {:-<30}\n",
        "PORT", "STATE", "SERVICE", "PROCESS", "", "", "", ""
    )
}

/// One table row: port, state, service, process. Missing fields render as "unknown".
pub fn format_row(entry: &PortProbeResult) -> String {
    let service = entry.service_name.as_deref().unwrap_or(UNKNOWN);
    let process = entry
        .owning_process
        .as_ref()
        .map(format_process)
        .unwrap_or_else(|| UNKNOWN.to_string());
    format!(
        "{:<COL_PORT$} {:<COL_STATE$} {:<COL_SERVICE$} {}",
        entry.port,
        entry.state.as_str(),
        service,
        process
    )
}

fn format_process(p: &ProcessInfo) -> String {
    format!("{:<15}  PID: {:<6}  User: {:<8}", p.name, p.pid, p.owner)
        .trim_end()
        .to_string()
}

/// Render the full table. Only reachable ports get a row.
pub fn render_table(report: &ScanReport) -> String {
    let mut out = table_header();
    for e in report.entries.iter().filter(|e| e.reachable) {
        out.push_str(&format_row(e));
        out.push('\n');
    }
    out
}

/// Print the scan banner and table to stdout.
pub fn print_results_table(report: &ScanReport) {
    println!(
        "\nOpen ports: {} (scanned: {}, skipped: {})",
        report.open_count, report.scanned_done, report.skipped
    );
    print!("{}", render_table(report));
}

pub fn write_results_json(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create output file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.flush()?;
    Ok(())
}

pub fn results_json(report: &ScanReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
