//! Toolchain locations and device enumeration through the Flutter tool.

use std::sync::Arc;

use async_trait::async_trait;
use drover_core::{Device, DeviceLister, DroverError, TargetPlatform};
use serde::Deserialize;
use tracing::debug;

use crate::process::{CommandSpec, ProcessRunner};

/// Environment variable the binary reads the Flutter command from.
pub const FLUTTER_COMMAND_ENV: &str = "DROVER_FLUTTER_COMMAND";

/// Commands used to reach the platform toolchains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub flutter: String,
    pub adb: String,
    pub xcodebuild: String,
    pub xcrun: String,
    pub ideviceinstaller: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            flutter: "flutter".to_string(),
            adb: "adb".to_string(),
            xcodebuild: "xcodebuild".to_string(),
            xcrun: "xcrun".to_string(),
            ideviceinstaller: "ideviceinstaller".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MachineDevice {
    name: String,
    id: String,
    #[serde(rename = "targetPlatform")]
    target_platform: String,
    #[serde(default)]
    emulator: bool,
    #[serde(rename = "isSupported", default = "default_true")]
    is_supported: bool,
}

fn default_true() -> bool {
    true
}

/// Lists devices with `flutter devices --machine`.
pub struct FlutterDeviceLister {
    runner: Arc<dyn ProcessRunner>,
    flutter: String,
}

impl FlutterDeviceLister {
    pub fn new(runner: Arc<dyn ProcessRunner>, toolchain: &Toolchain) -> Self {
        Self {
            runner,
            flutter: toolchain.flutter.clone(),
        }
    }
}

#[async_trait]
impl DeviceLister for FlutterDeviceLister {
    async fn list(&self) -> drover_core::Result<Vec<Device>> {
        let spec = CommandSpec::new(&self.flutter).args(["devices", "--machine"]);
        let output = self
            .runner
            .run_checked(&spec)
            .await
            .map_err(|e| DroverError::DeviceListing(e.to_string()))?;
        parse_machine_devices(&output.stdout)
    }
}

/// Parse `flutter devices --machine` output, skipping unsupported platforms.
pub fn parse_machine_devices(stdout: &str) -> drover_core::Result<Vec<Device>> {
    // The tool may print banners before the JSON array.
    let json = stdout
        .find('[')
        .map(|start| &stdout[start..])
        .ok_or_else(|| DroverError::DeviceListing("no device list in output".to_string()))?;

    let machine: Vec<MachineDevice> = serde_json::from_str(json)
        .map_err(|e| DroverError::DeviceListing(format!("unparseable device list: {}", e)))?;

    let devices = machine
        .into_iter()
        .filter(|d| d.is_supported)
        .filter_map(|d| {
            let platform = platform_of(&d.target_platform)?;
            Some(Device::new(d.id, d.name, platform, !d.emulator))
        })
        .collect::<Vec<_>>();

    debug!(count = devices.len(), "Parsed machine device list");
    Ok(devices)
}

fn platform_of(target_platform: &str) -> Option<TargetPlatform> {
    if target_platform.starts_with("android") {
        Some(TargetPlatform::Android)
    } else if target_platform == "ios" {
        Some(TargetPlatform::Ios)
    } else if target_platform == "darwin" {
        Some(TargetPlatform::Macos)
    } else {
        None
    }
}
