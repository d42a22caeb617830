use crate::prober::{self, Connector};
use crate::resolver::{self, ProcessTable, UserDb};
use crate::services::ServiceDb;
use crate::types::{Pid, Port, PortProbeResult, ScanReport};
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info};
use ::time::{format_description::well_known, OffsetDateTime};

/// Read-only state shared by every port inspection of one scan.
#[derive(Debug)]
pub struct ScanContext<T, U> {
    /// The scanner's own pid, never reported as an owner.
    pub self_pid: Pid,
    pub services: ServiceDb,
    pub table: T,
    pub users: U,
}

impl<T, U> ScanContext<T, U> {
    /// Context for the current process.
    pub fn new(services: ServiceDb, table: T, users: U) -> Self {
        Self {
            self_pid: std::process::id(),
            services,
            table,
            users,
        }
    }
}

/// Probe one port and, if reachable, name its service and owning process.
///
/// `None` means the port was skipped because no endpoint could be created.
pub async fn inspect_port<C, T, U>(
    connector: &C,
    ctx: &Arc<ScanContext<T, U>>,
    port: Port,
) -> Option<PortProbeResult>
where
    C: Connector,
    T: ProcessTable + Send + Sync + 'static,
    U: UserDb + Send + Sync + 'static,
{
    let state = prober::probe_port(connector, port).await?;
    if !state.is_reachable() {
        return Some(PortProbeResult::unreachable(port));
    }

    let service_name = ctx.services.lookup(port, "tcp").map(str::to_owned);

    let resolve_ctx = ctx.clone();
    let owning_process = tokio::task::spawn_blocking(move || {
        resolver::resolve_owner(
            &resolve_ctx.table,
            &resolve_ctx.users,
            port,
            resolve_ctx.self_pid,
        )
    })
    .await
    .unwrap_or_else(|e| {
        debug!(port, error = %e, "process lookup task failed");
        None
    });

    Some(PortProbeResult {
        port,
        reachable: true,
        state,
        service_name,
        owning_process,
    })
}

/// Scan the given loopback ports, at most `concurrency` at a time.
///
/// With a concurrency of 1 ports are inspected strictly one after another in
/// ascending order. Both probes of a port always run inside that port's task.
/// Entries are returned in ascending port order and only for reachable ports.
/// There is no cancellation: the scan runs until every port has been tried.
pub async fn scan_ports<C, T, U>(
    ports: &[Port],
    concurrency: usize,
    connector: C,
    ctx: Arc<ScanContext<T, U>>,
) -> Result<ScanReport>
where
    C: Connector + Clone + Send + Sync + 'static,
    T: ProcessTable + Send + Sync + 'static,
    U: UserDb + Send + Sync + 'static,
{
    let mut ports = ports.to_vec();
    ports.sort_unstable();
    ports.dedup();

    let total = ports.len() as u64;
    let started_at = now_iso_like();
    info!(total, concurrency, "scan started");

    let scanned_done = Arc::new(AtomicU64::new(0));
    let skipped = Arc::new(AtomicU64::new(0));
    let open_count = Arc::new(AtomicU64::new(0));
    let entries = Arc::new(Mutex::new(Vec::new()));

    let sem = Arc::new(Semaphore::new(concurrency.clamp(1, 5_000)));
    let mut set = JoinSet::new();

    for port in ports {
        let permit = sem.clone().acquire_owned().await?;
        let connector = connector.clone();
        let ctx = ctx.clone();
        let entries = entries.clone();
        let scanned_done = scanned_done.clone();
        let skipped = skipped.clone();
        let open_count = open_count.clone();

        set.spawn(async move {
            let _permit = permit;

            match inspect_port(&connector, &ctx, port).await {
                Some(result) => {
                    scanned_done.fetch_add(1, Ordering::Relaxed);
                    if result.reachable {
                        open_count.fetch_add(1, Ordering::Relaxed);
                        entries.lock().await.push(result);
                    }
                }
                None => {
                    skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            debug!(error = %e, "port task failed");
        }
    }

    let mut entries = std::mem::take(&mut *entries.lock().await);
    entries.sort_by_key(|e| e.port);

    let report = ScanReport {
        started_at,
        scanned_total: total,
        scanned_done: scanned_done.load(Ordering::Relaxed),
        skipped: skipped.load(Ordering::Relaxed),
        open_count: open_count.load(Ordering::Relaxed),
        entries,
    };
    info!(
        scanned = report.scanned_done,
        open = report.open_count,
        skipped = report.skipped,
        "scan finished"
    );
    Ok(report)
}

fn now_iso_like() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
