//! Java debugger tunnel.

use std::sync::Arc;

use droid_device::{Device, ForwardTarget, Process};

use crate::error::SessionError;

pub const DEFAULT_JDWP_PORT: u16 = 8700;

/// Exposes the JDWP endpoint of one VM process on a local port for `jdb`.
#[derive(Debug)]
pub struct JdwpSetup {
    device: Arc<Device>,
    process: Arc<Process>,
    host: String,
    port: u16,
}

impl JdwpSetup {
    pub fn new(process: Arc<Process>, port: u16) -> Result<Self, SessionError> {
        let device = process
            .device()
            .ok_or(SessionError::DeviceGone { pid: process.pid })?;
        Ok(Self {
            device,
            process,
            host: "localhost".to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn establish_tunnel(&self) -> Result<(), SessionError> {
        tracing::info!(port = self.port, pid = self.process.pid, "forwarding jdwp");
        self.device
            .bridge()
            .forward(self.port, ForwardTarget::Jdwp(self.process.pid))
            .map_err(SessionError::Tunnel)
    }

    pub fn teardown_tunnel(&self) -> Result<(), SessionError> {
        self.device
            .bridge()
            .clear_all_forwards()
            .map_err(SessionError::Tunnel)
    }

    /// `jdb` needs no preparatory commands.
    pub fn build_init_script(&self) -> Vec<String> {
        Vec::new()
    }

    /// Arguments for `jdb` to attach through the tunnel.
    pub fn attach_args(&self) -> Vec<String> {
        vec![
            "-connect".to_string(),
            format!(
                "com.sun.jdi.SocketAttach:hostname={},port={}",
                self.host, self.port
            ),
        ]
    }
}
