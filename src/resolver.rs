//! Attribute an open loopback port to the process holding it.
//!
//! The live process registry is walked in whatever order it yields pids. For
//! each pid the kernel TCP tables visible to that process are searched for the
//! target local port, and the match is confirmed only if the process holds a
//! descriptor to one of the matching socket inodes. The first confirmed process
//! wins; when several processes share the socket (e.g. after `fork`) which one
//! is reported depends on enumeration order.
//!
//! Every failure along the way (vanished process, permission denied, parse
//! error) is treated as "not this process" and the walk continues.

use anyhow::Result;
use std::collections::HashSet;
use tracing::{debug, trace};

use crate::types::{Pid, Port, ProcessInfo};

/// Placeholder for fields that could not be resolved.
pub const UNKNOWN: &str = "unknown";

/// One row of a kernel TCP table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketEntry {
    pub local_port: Port,
    pub inode: u64,
}

/// Name (comm) and real uid of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub uid: u32,
}

/// Read access to the live process registry.
pub trait ProcessTable {
    /// Pids currently visible, in registry order.
    fn pids(&self) -> Result<Vec<Pid>>;

    /// TCP table rows visible from `pid`'s network namespace.
    fn tcp_sockets(&self, pid: Pid) -> Result<Vec<SocketEntry>>;

    /// Inodes of the sockets `pid` holds descriptors to.
    fn socket_inodes(&self, pid: Pid) -> Result<HashSet<u64>>;

    fn identity(&self, pid: Pid) -> Result<Identity>;
}

/// uid to username mapping.
pub trait UserDb {
    fn username(&self, uid: u32) -> Option<String>;
}

/// Find the process holding `port`, ignoring `self_pid`.
///
/// Never fails: `None` means no attribution could be made.
pub fn resolve_owner<T, U>(table: &T, users: &U, port: Port, self_pid: Pid) -> Option<ProcessInfo>
where
    T: ProcessTable + ?Sized,
    U: UserDb + ?Sized,
{
    let pids = match table.pids() {
        Ok(pids) => pids,
        Err(e) => {
            debug!(port, error = %e, "process registry unavailable");
            return None;
        }
    };

    for pid in pids {
        if pid == self_pid {
            continue;
        }
        if !holds_port(table, pid, port) {
            continue;
        }

        match table.identity(pid) {
            Ok(identity) => {
                let owner = users
                    .username(identity.uid)
                    .unwrap_or_else(|| UNKNOWN.to_string());
                debug!(port, pid, name = %identity.name, %owner, "port attributed");
                return Some(ProcessInfo {
                    name: identity.name,
                    pid,
                    owner,
                });
            }
            Err(e) => trace!(pid, error = %e, "unreadable status record"),
        }
    }

    debug!(port, "no owning process found");
    None
}

fn holds_port<T: ProcessTable + ?Sized>(table: &T, pid: Pid, port: Port) -> bool {
    let inodes: HashSet<u64> = match table.tcp_sockets(pid) {
        Ok(entries) => entries
            .into_iter()
            .filter(|e| e.local_port == port)
            .map(|e| e.inode)
            .collect(),
        Err(e) => {
            trace!(pid, error = %e, "unreadable tcp table");
            return false;
        }
    };
    if inodes.is_empty() {
        return false;
    }

    match table.socket_inodes(pid) {
        Ok(held) => !held.is_disjoint(&inodes),
        Err(e) => {
            trace!(pid, error = %e, "unreadable descriptor table");
            false
        }
    }
}

/// Rows of the IPv4 and IPv6 tables together; fails only if neither was readable.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn merge_tables<E, X>(v4: Result<Vec<E>, X>, v6: Result<Vec<E>, X>) -> Result<Vec<E>>
where
    X: Into<anyhow::Error>,
{
    match (v4, v6) {
        (Ok(mut v4), Ok(v6)) => {
            v4.extend(v6);
            Ok(v4)
        }
        (Ok(rows), Err(_)) | (Err(_), Ok(rows)) => Ok(rows),
        (Err(e), Err(_)) => Err(e.into()),
    }
}

#[cfg(target_os = "linux")]
pub use self::linux::{ProcfsTable, SystemUsers};

#[cfg(target_os = "linux")]
mod linux {
    use super::{merge_tables, Identity, ProcessTable, SocketEntry, UserDb};
    use crate::types::Pid;
    use anyhow::Result;
    use procfs::process::{FDTarget, Process};
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};

    /// [`ProcessTable`] backed by a procfs mount.
    #[derive(Debug, Clone)]
    pub struct ProcfsTable {
        root: PathBuf,
    }

    impl ProcfsTable {
        pub fn new(root: impl AsRef<Path>) -> Self {
            Self {
                root: root.as_ref().to_path_buf(),
            }
        }

        fn process(&self, pid: Pid) -> Result<Process> {
            Ok(Process::new_with_root(self.root.join(pid.to_string()))?)
        }
    }

    impl Default for ProcfsTable {
        fn default() -> Self {
            Self::new("/proc")
        }
    }

    impl ProcessTable for ProcfsTable {
        fn pids(&self) -> Result<Vec<Pid>> {
            let processes = procfs::process::all_processes_with_root(&self.root)?;
            Ok(processes
                .filter_map(|p| p.ok())
                .map(|p| p.pid() as Pid)
                .collect())
        }

        fn tcp_sockets(&self, pid: Pid) -> Result<Vec<SocketEntry>> {
            let process = self.process(pid)?;
            // Dual-stack listeners show up only in tcp6.
            let entries = merge_tables(process.tcp(), process.tcp6())?;
            Ok(entries
                .into_iter()
                .map(|e| SocketEntry {
                    local_port: e.local_address.port(),
                    inode: e.inode,
                })
                .collect())
        }

        fn socket_inodes(&self, pid: Pid) -> Result<HashSet<u64>> {
            let process = self.process(pid)?;
            let mut inodes = HashSet::new();
            for fd in process.fd()? {
                let Ok(fd) = fd else { continue };
                if let FDTarget::Socket(inode) = fd.target {
                    inodes.insert(inode);
                }
            }
            Ok(inodes)
        }

        fn identity(&self, pid: Pid) -> Result<Identity> {
            let process = self.process(pid)?;
            // The stat comm field carries the raw comm record, unlike the escaped `Name:`.
            let name = process.stat()?.comm;
            let uid = process.status()?.ruid;
            Ok(Identity { name, uid })
        }
    }

    /// [`UserDb`] backed by the system passwd database.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemUsers;

    impl UserDb for SystemUsers {
        fn username(&self, uid: u32) -> Option<String> {
            users::get_user_by_uid(uid).map(|u| u.name().to_string_lossy().into_owned())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use self::unsupported::{ProcfsTable, SystemUsers};

// Without procfs every port is reported without an owner.
#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::{Identity, ProcessTable, SocketEntry, UserDb};
    use crate::types::Pid;
    use anyhow::{bail, Result};
    use std::collections::HashSet;
    use std::path::Path;

    #[derive(Debug, Clone, Default)]
    pub struct ProcfsTable;

    impl ProcfsTable {
        pub fn new(_root: impl AsRef<Path>) -> Self {
            Self
        }
    }

    impl ProcessTable for ProcfsTable {
        fn pids(&self) -> Result<Vec<Pid>> {
            bail!("process attribution requires procfs")
        }

        fn tcp_sockets(&self, _pid: Pid) -> Result<Vec<SocketEntry>> {
            bail!("process attribution requires procfs")
        }

        fn socket_inodes(&self, _pid: Pid) -> Result<HashSet<u64>> {
            bail!("process attribution requires procfs")
        }

        fn identity(&self, _pid: Pid) -> Result<Identity> {
            bail!("process attribution requires procfs")
        }
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemUsers;

    impl UserDb for SystemUsers {
        fn username(&self, _uid: u32) -> Option<String> {
            None
        }
    }
}
