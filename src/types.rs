use serde::{Deserialize, Serialize};
use std::fmt;

pub type Pid = u32;
pub type Port = u16;

/// Coarse connection state derived from the two-probe heuristic.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortState {
    /// Two independent connections succeeded.
    Listening,
    /// The first connection succeeded, the second was refused.
    Established,
    /// Reachable, but the second probe could not be attempted.
    Open,
    /// The first connection failed.
    Unreachable,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortState::Listening => "LISTENING",
            PortState::Established => "ESTABLISHED",
            PortState::Open => "OPEN",
            PortState::Unreachable => "UNREACHABLE",
        }
    }

    pub fn is_reachable(&self) -> bool {
        !matches!(self, PortState::Unreachable)
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The process found holding a port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub name: String,
    pub pid: Pid,
    pub owner: String,
}

/// Outcome of inspecting one loopback port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortProbeResult {
    pub port: Port,
    pub reachable: bool,
    pub state: PortState,
    pub service_name: Option<String>,
    pub owning_process: Option<ProcessInfo>,
}

impl PortProbeResult {
    /// A port whose first connection attempt failed. Nothing else is looked up.
    pub fn unreachable(port: Port) -> Self {
        Self {
            port,
            reachable: false,
            state: PortState::Unreachable,
            service_name: None,
            owning_process: None,
        }
    }
}

/// Aggregate results and progress counters for one scan pass.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ScanReport {
    pub started_at: String,
    pub scanned_total: u64,
    pub scanned_done: u64,
    pub skipped: u64,
    pub open_count: u64,
    pub entries: Vec<PortProbeResult>,
}
