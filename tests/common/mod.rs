#![allow(dead_code)]

use assert_cmd::cargo::CommandCargoExt;
use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};

/// A running `port-binder` process listening on 127.0.0.1.
pub struct PortBinder {
    pub child: Child,
    pub port: u16,
}

impl PortBinder {
    pub fn spawn() -> Self {
        let mut child = Command::cargo_bin("port-binder")
            .unwrap()
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();

        // The binder prints its port only once it is listening.
        let mut line = String::new();
        BufReader::new(child.stdout.take().unwrap())
            .read_line(&mut line)
            .unwrap();
        let port = line.trim().parse().unwrap();

        PortBinder { child, port }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for PortBinder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A loopback port that nothing listens on, as far as can be arranged.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// The name the user database gives the current user, or the placeholder.
#[cfg(target_os = "linux")]
pub fn current_owner() -> String {
    users::get_current_username()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| loport::resolver::UNKNOWN.to_string())
}
