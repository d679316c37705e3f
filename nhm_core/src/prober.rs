//! Periodic user-land liveness checks.
//!
//! The prober runs four check classes in a fixed order and stops at the
//! first failure: monitored files must exist, monitored programs must have
//! a running process, monitored process commands must exit with status 0,
//! and monitored endpoints must answer an identity round-trip. Endpoint
//! probes are created lazily on first use and retained across ticks until
//! released.

use crate::config::UserlandSettings;
use crate::error::NhmResult;
use async_trait::async_trait;
use std::path::Path;
use std::process::{Command, Stdio};
use sysinfo::System;
use tracing::{error, info, warn};

/// Live connection to a monitored endpoint.
#[async_trait]
pub trait EndpointProbe: Send {
    /// Identity round-trip; any error marks the endpoint as dead.
    async fn get_id(&mut self) -> NhmResult<String>;
}

/// Creates endpoint probes from configured addresses.
#[async_trait]
pub trait EndpointDialer: Send + Sync {
    async fn dial(&self, addr: &str) -> NhmResult<Box<dyn EndpointProbe>>;
}

/// A monitored endpoint with its lazily created probe.
struct CheckedEndpoint {
    addr: String,
    probe: Option<Box<dyn EndpointProbe>>,
}

pub struct UserlandProber {
    files: Vec<String>,
    progs: Vec<String>,
    procs: Vec<String>,
    endpoints: Vec<CheckedEndpoint>,
    dialer: Box<dyn EndpointDialer>,
    system: System,
}

impl UserlandProber {
    /// Allocate the check state from the configuration. No connections are
    /// opened here; endpoint probes are dialed on first use.
    pub fn new(settings: &UserlandSettings, dialer: Box<dyn EndpointDialer>) -> Self {
        let endpoints = settings
            .monitored_dbus
            .iter()
            .map(|addr| CheckedEndpoint {
                addr: addr.clone(),
                probe: None,
            })
            .collect();

        Self {
            files: settings.monitored_files.clone(),
            progs: settings.monitored_progs.clone(),
            procs: settings.monitored_procs.clone(),
            endpoints,
            dialer,
            system: System::new(),
        }
    }

    /// Run all configured checks in order, short-circuiting at the first
    /// failure. The outcome is logged; no restart is triggered here.
    pub async fn run_checks(&mut self) -> bool {
        info!("userland check started");

        for file in &self.files {
            if !Path::new(file).exists() {
                warn!(file = %file, "userland check failed: monitored file does not exist");
                return false;
            }
        }

        if !self.progs.is_empty() {
            self.system.refresh_processes();
            for prog in &self.progs {
                if !is_program_running(&self.system, prog) {
                    warn!(prog = %prog, "userland check failed: monitored program not running");
                    return false;
                }
            }
        }

        for proc in &self.procs {
            if !is_process_ok(proc) {
                warn!(proc = %proc, "userland check failed: monitored process returned invalid");
                return false;
            }
        }

        for endpoint in &mut self.endpoints {
            if !check_endpoint(self.dialer.as_ref(), endpoint).await {
                warn!(addr = %endpoint.addr, "userland check failed: monitored endpoint returned invalid");
                return false;
            }
        }

        info!("userland check successfully finished");
        true
    }

    /// Drop the cached endpoint probes. Called at shutdown.
    pub fn release_endpoints(&mut self) {
        for endpoint in &mut self.endpoints {
            endpoint.probe = None;
        }
    }
}

/// True if any running process executes `prog` (by executable path).
fn is_program_running(system: &System, prog: &str) -> bool {
    let wanted = Path::new(prog);
    system
        .processes()
        .values()
        .any(|process| process.exe() == Some(wanted))
}

/// Spawn `command` with discarded output and require exit status 0.
fn is_process_ok(command: &str) -> bool {
    match Command::new(command)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(err) => {
            error!(command = %command, error = %err, "monitored process could not be started");
            false
        }
    }
}

async fn check_endpoint(dialer: &dyn EndpointDialer, endpoint: &mut CheckedEndpoint) -> bool {
    if endpoint.probe.is_none() {
        match dialer.dial(&endpoint.addr).await {
            Ok(probe) => endpoint.probe = Some(probe),
            Err(err) => {
                error!(addr = %endpoint.addr, error = %err, "failed to connect to monitored endpoint");
                return false;
            }
        }
    }

    let Some(probe) = endpoint.probe.as_mut() else {
        return false;
    };
    match probe.get_id().await {
        Ok(_) => true,
        Err(err) => {
            error!(addr = %endpoint.addr, error = %err, "identity call to monitored endpoint failed");
            false
        }
    }
}
