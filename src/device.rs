//! Device identity used for license binding.
//!
//! The fingerprint combines host identifiers into a stable id that survives
//! restarts but changes when the machine or OS account changes.

use sha2::{Digest, Sha256};
use std::env;
use std::fs;

/// Supplies the fingerprint of the current device.
pub trait DeviceIdentity: Send + Sync {
    /// Stable device fingerprint.
    fn device_id(&self) -> String;
}

/// Fingerprint derived from hostname, OS, architecture and machine id.
#[derive(Debug, Clone, Default)]
pub struct HostDeviceIdentity;

impl DeviceIdentity for HostDeviceIdentity {
    fn device_id(&self) -> String {
        fingerprint(&collect_hardware_ids())
    }
}

/// Fixed fingerprint, for embedding hosts that derive it elsewhere.
#[derive(Debug, Clone)]
pub struct FixedDeviceIdentity(pub String);

impl DeviceIdentity for FixedDeviceIdentity {
    fn device_id(&self) -> String {
        self.0.clone()
    }
}

/// Hash identifier components into an uppercase 32-hex-char fingerprint.
pub fn fingerprint(components: &[String]) -> String {
    let hash = Sha256::digest(components.join("|").as_bytes());
    hex::encode_upper(&hash[..16])
}

fn collect_hardware_ids() -> Vec<String> {
    let mut ids = vec![
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default(),
        env::consts::OS.to_string(),
        env::consts::ARCH.to_string(),
    ];

    if let Some(machine_id) = read_machine_id() {
        ids.push(machine_id);
    }
    ids
}

fn read_machine_id() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .find_map(|path| fs::read_to_string(path).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
