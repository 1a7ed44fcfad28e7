//! Device Resolver
//!
//! Resolves the "default" pseudo-device-id into a concrete, stable device
//! id, and probes output devices before committing to them. Binding to a
//! concrete id instead of leaving a stream on "default" avoids audio
//! stalling when the window loses focus on several platforms.

use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use thiserror::Error;
use tracing::warn;

use crate::audio::AudioDevice;

pub const DEFAULT_DEVICE_ID: &str = "default";

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no devices of the requested kind are available")]
    NoneAvailable,
    #[error("device enumeration failed: {0}")]
    EnumerationFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

/// Resolves "default" device selections to a concrete device and
/// remembers (for this session) whether output-device probing has failed,
/// so it is not retried on every call.
pub struct DeviceResolver {
    output_probe_suppressed: AtomicBool,
}

impl Default for DeviceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceResolver {
    pub fn new() -> Self {
        Self {
            output_probe_suppressed: AtomicBool::new(false),
        }
    }

    /// Resolve a selected device id against the enumerated device list.
    ///
    /// If `selected` is `None` or equals [`DEFAULT_DEVICE_ID`], applies the
    /// resolution algorithm: (1) a device sharing the default entry's
    /// group id, (2) the first non-default device with a non-empty label,
    /// (3) the first non-default device. Otherwise returns `selected`
    /// unchanged (it already names a concrete device).
    pub fn resolve_name(
        &self,
        selected: Option<&str>,
        host: &Host,
        kind: DeviceKind,
    ) -> Result<Option<String>, DeviceError> {
        match selected {
            None | Some(DEFAULT_DEVICE_ID) => {
                let devices = Self::enumerate_names(host, kind)?;
                Ok(Self::pick_default(&devices))
            }
            Some(name) => Ok(Some(name.to_string())),
        }
    }

    /// cpal has no notion of "group id" the way browsers do; the closest
    /// analogue is the default device's own name, which this crate treats
    /// as step (1) of the algorithm collapsing onto step (2)/(3) directly
    /// since cpal exposes no stable cross-device grouping.
    fn pick_default(names: &[String]) -> Option<String> {
        names
            .iter()
            .find(|n| !n.is_empty())
            .cloned()
            .or_else(|| names.first().cloned())
    }

    fn enumerate_names(host: &Host, kind: DeviceKind) -> Result<Vec<String>, DeviceError> {
        let devices: Vec<Device> = match kind {
            DeviceKind::Input => host
                .input_devices()
                .map_err(|e| DeviceError::EnumerationFailed(e.to_string()))?
                .collect(),
            DeviceKind::Output => host
                .output_devices()
                .map_err(|e| DeviceError::EnumerationFailed(e.to_string()))?
                .collect(),
        };

        Ok(devices.iter().filter_map(|d| d.name().ok()).collect())
    }

    /// Probe an output device by opening and immediately dropping a
    /// throwaway output stream. On failure, suppresses further probing for
    /// the remainder of the session and signals the caller to fall back to
    /// "default".
    pub fn probe_output(&self, host: &Host, device_name: &str) -> bool {
        if self.output_probe_suppressed.load(Ordering::Relaxed) {
            return true;
        }

        let Ok(mut devices) = host.output_devices() else {
            return true;
        };

        let Some(device) = devices.find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
        else {
            return true;
        };

        if device.default_output_config().is_err() {
            warn!(device = device_name, "output device probe failed, suppressing further probes");
            self.output_probe_suppressed.store(true, Ordering::Relaxed);
            return false;
        }

        true
    }

    pub fn output_probe_suppressed(&self) -> bool {
        self.output_probe_suppressed.load(Ordering::Relaxed)
    }
}

/// List microphone input devices as [`AudioDevice`]s, matching the
/// `AudioDeviceList` shape used elsewhere in this crate.
pub fn enumerate_input_devices(host: &Host) -> Result<Vec<AudioDevice>, DeviceError> {
    enumerate_devices(host, DeviceKind::Input)
}

/// List speaker/headphone output devices as [`AudioDevice`]s.
pub fn enumerate_output_devices(host: &Host) -> Result<Vec<AudioDevice>, DeviceError> {
    enumerate_devices(host, DeviceKind::Output)
}

fn enumerate_devices(host: &Host, kind: DeviceKind) -> Result<Vec<AudioDevice>, DeviceError> {
    let default_name = match kind {
        DeviceKind::Input => host.default_input_device(),
        DeviceKind::Output => host.default_output_device(),
    }
    .and_then(|d| d.name().ok());

    let devices: Vec<Device> = match kind {
        DeviceKind::Input => host
            .input_devices()
            .map_err(|e| DeviceError::EnumerationFailed(e.to_string()))?
            .collect(),
        DeviceKind::Output => host
            .output_devices()
            .map_err(|e| DeviceError::EnumerationFailed(e.to_string()))?
            .collect(),
    };

    Ok(devices
        .iter()
        .filter_map(|d| d.name().ok())
        .map(|name| AudioDevice {
            is_default: Some(&name) == default_name.as_ref(),
            device_id: name.clone(),
            label: name,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_default_prefers_non_empty_label() {
        let names = vec![String::new(), "Headset".to_string(), "Speakers".to_string()];
        assert_eq!(DeviceResolver::pick_default(&names), Some("Headset".to_string()));
    }

    #[test]
    fn pick_default_falls_back_to_first() {
        let names = vec![String::new()];
        assert_eq!(DeviceResolver::pick_default(&names), Some(String::new()));
    }

    #[test]
    fn pick_default_empty_list() {
        let names: Vec<String> = vec![];
        assert_eq!(DeviceResolver::pick_default(&names), None);
    }

    #[test]
    fn resolve_name_passes_through_concrete_id() {
        let resolver = DeviceResolver::new();
        let host = cpal::default_host();
        let resolved = resolver
            .resolve_name(Some("My Microphone"), &host, DeviceKind::Input)
            .unwrap();
        assert_eq!(resolved, Some("My Microphone".to_string()));
    }
}
