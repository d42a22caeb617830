//! Library crate for loport: localhost TCP port inventory.
pub mod ports;
pub mod prober;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod services;
pub mod types;
