//! The [`Device`] model.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::bridge::DeviceBridge;
use crate::error::DeviceError;
use crate::process::DeviceProcessRegistry;
use crate::properties::{self, parse_properties};

/// Default deadline for shell and transfer calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// API level assumed when the device does not report a usable one.
const FALLBACK_SDK_VERSION: u32 = 9;

/// Attributes derived from the device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFlags {
    pub emulator: bool,
    pub over_network: bool,
}

/// A connected device: its id, property map and process table.
pub struct Device {
    id: String,
    bridge: Arc<dyn DeviceBridge>,
    properties: RwLock<Arc<HashMap<String, String>>>,
    processes: DeviceProcessRegistry,
    timeout: Duration,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("flags", &self.flags())
            .field("properties", &self.properties().len())
            .finish()
    }
}

impl Device {
    /// Create the device and load its properties.
    pub fn connect(
        id: impl Into<String>,
        bridge: Arc<dyn DeviceBridge>,
    ) -> Result<Arc<Self>, DeviceError> {
        Self::connect_with_timeout(id, bridge, DEFAULT_TIMEOUT)
    }

    pub fn connect_with_timeout(
        id: impl Into<String>,
        bridge: Arc<dyn DeviceBridge>,
        timeout: Duration,
    ) -> Result<Arc<Self>, DeviceError> {
        let id = id.into();
        let device = Arc::new_cyclic(|owner| Self {
            id,
            processes: DeviceProcessRegistry::new(bridge.clone(), owner.clone(), timeout),
            bridge,
            properties: RwLock::new(Arc::new(HashMap::new())),
            timeout,
        });
        device.refresh_properties()?;
        tracing::info!(id = %device.id, "device connected");
        Ok(device)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_emulator(&self) -> bool {
        self.id.starts_with("emulator-")
    }

    pub fn is_over_network(&self) -> bool {
        self.id.contains('.')
    }

    pub fn flags(&self) -> DeviceFlags {
        DeviceFlags {
            emulator: self.is_emulator(),
            over_network: self.is_over_network(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn bridge(&self) -> &Arc<dyn DeviceBridge> {
        &self.bridge
    }

    /// Replace the property map with a fresh `getprop` listing.
    pub fn refresh_properties(&self) -> Result<usize, DeviceError> {
        let output = self.bridge.execute("getprop", "", self.timeout)?;
        if !output.success() {
            return Err(DeviceError::CommandFailed {
                command: "getprop".into(),
                code: output.exit_code,
            });
        }
        let props = parse_properties(&output.stdout)?;
        let count = props.len();
        *self
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(props);
        tracing::debug!(id = %self.id, count, "properties loaded");
        Ok(count)
    }

    /// The current property map.
    pub fn properties(&self) -> Arc<HashMap<String, String>> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.properties().get(key).cloned()
    }

    pub fn sdk_version(&self) -> u32 {
        self.property(properties::SDK_VERSION)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(FALLBACK_SDK_VERSION)
    }

    /// ABIs the device can run, most preferred first.
    pub fn supported_cpu_abis(&self) -> Vec<String> {
        if let Some(list) = self.property(properties::CPU_ABI_LIST) {
            let abis: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if !abis.is_empty() {
                return abis;
            }
        }
        [properties::CPU_ABI, properties::CPU_ABI2]
            .iter()
            .filter_map(|key| self.property(key))
            .filter(|abi| !abi.trim().is_empty())
            .collect()
    }

    /// Run a shell command and return its stdout, failing on a non-zero exit.
    pub fn shell(&self, command: &str, args: &str) -> Result<String, DeviceError> {
        let output = self.bridge.execute(command, args, self.timeout)?;
        if !output.success() {
            return Err(DeviceError::CommandFailed {
                command: format!("{command} {args}").trim_end().to_string(),
                code: output.exit_code,
            });
        }
        Ok(output.stdout)
    }

    pub fn push(&self, local: &Path, remote: &str) -> Result<(), DeviceError> {
        Ok(self.bridge.push_file(local, remote, self.timeout)?)
    }

    /// Returns `false` when the remote path does not exist.
    pub fn pull(&self, remote: &str, local: &Path) -> Result<bool, DeviceError> {
        Ok(self.bridge.pull_file(remote, local, self.timeout)?)
    }

    pub fn processes(&self) -> &DeviceProcessRegistry {
        &self.processes
    }
}
