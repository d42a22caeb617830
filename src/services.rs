use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::types::Port;

/// System location of the service database.
pub const DEFAULT_SERVICES_PATH: &str = "/etc/services";

/// Static `(port, protocol) -> name` table in the `/etc/services` format.
#[derive(Debug, Clone, Default)]
pub struct ServiceDb {
    by_port: HashMap<(Port, String), String>,
}

impl ServiceDb {
    /// Parse service database content.
    ///
    /// Each line is `name port/proto [aliases...]`, with `#` comments. Malformed
    /// lines are ignored. When a `(port, proto)` pair appears more than once the
    /// first entry wins.
    pub fn parse(s: &str) -> Self {
        let mut by_port = HashMap::new();

        for raw_line in s.lines() {
            let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
            let mut fields = line.split_whitespace();
            let (Some(name), Some(port_proto)) = (fields.next(), fields.next()) else {
                continue;
            };
            let Some((port, proto)) = port_proto.split_once('/') else {
                continue;
            };
            let Ok(port) = port.parse::<Port>() else {
                continue;
            };
            by_port
                .entry((port, proto.to_ascii_lowercase()))
                .or_insert_with(|| name.to_string());
        }

        Self { by_port }
    }

    /// Load and parse a service database file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("failed to read service database: {}", path.as_ref().display())
        })?;
        Ok(Self::parse(&content))
    }

    /// Load a service database, falling back to an empty one if it cannot be read.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        match Self::load(&path) {
            Ok(db) => db,
            Err(e) => {
                warn!("{e:#}; service names will be reported as unknown");
                Self::default()
            }
        }
    }

    /// Service name registered for `port` under `proto` (e.g. `"tcp"`).
    pub fn lookup(&self, port: Port, proto: &str) -> Option<&str> {
        self.by_port
            .get(&(port, proto.to_ascii_lowercase()))
            .map(String::as_str)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.by_port.len()
    }
}
