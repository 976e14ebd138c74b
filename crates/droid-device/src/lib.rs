//! The remote side of droidbridge.
//!
//! This crate defines the capabilities used to reach an Android device
//! (remote shell, file transfer, port forwarding), an `adb`-backed
//! implementation plus a scripted in-memory one, and the [`Device`] model
//! with its property map and process registry.

pub mod adb;
pub mod bridge;
pub mod device;
pub mod error;
pub mod process;
pub mod properties;
pub mod scripted;

pub use adb::{parse_device_list, AdbBridge};
pub use bridge::{
    DeviceBridge, FileTransfer, ForwardTarget, LineListener, PortForward, RemoteShell,
    ShellOutput, ShellStream,
};
pub use device::{Device, DeviceFlags};
pub use error::{DeviceError, ShellError};
pub use process::{DeviceProcessRegistry, Process, ProcessSnapshot, RefreshOutcome};
pub use scripted::{BridgeCall, ScriptedBridge};
