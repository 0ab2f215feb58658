//! `fleet-agent` library crate.
//!
//! The shim that runs on each worker machine: it registers with the
//! controller, heartbeats, serves the controller's start/stop/resume
//! commands and reports job progress back. The binary entrypoint lives in
//! `main.rs`.

pub mod config;
pub mod controller;
pub mod executor;
pub mod runtime;
pub mod server;
